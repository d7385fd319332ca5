//! Atomic Operations Module
//!
//! All-or-nothing groups of page changes.
//!
//! ## Flow
//! ```text
//!  start ──► page_mut / allocate_page (copy-on-write overlay)
//!    │
//!    ├── commit ──► WAL append (page images) ──► publish to PageStore
//!    │                                             │
//!    │                                 WAL ≥ limit ▼
//!    │                                         checkpoint (files + truncate)
//!    │
//!    └── rollback / drop ──► overlay discarded
//! ```

mod manager;
mod operation;
mod store;

pub use manager::{AtomicOperationsManager, OperationStats};
pub use operation::{AtomicOperation, OperationId};
pub use store::{PageRead, PageStore, StoreSnapshot};
