//! # AtlasCluster
//!
//! A paginated record cluster with:
//! - Variable-length, versioned records on fixed 64 KiB pages
//! - Stable cluster positions with tombstone reuse
//! - Page-level atomic operations (commit / rollback)
//! - Write-Ahead Logging (WAL) of committed page images and crash recovery
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │             (data directory, recovery, clusters)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  PaginatedCluster                            │
//! │   position map  ·  free space map  ·  record pages           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ AtomicOperation (page overlay)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │              AtomicOperationsManager                         │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  PageStore  │
//!   │  (Append)   │          │ (dirty+disk)│
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod page;
pub mod wal;
pub mod atomic;
pub mod cluster;
pub mod engine;
pub mod structural;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClusterError, Result};
pub use config::{Config, WalSyncStrategy};
pub use engine::Engine;
pub use atomic::{AtomicOperation, AtomicOperationsManager};
pub use cluster::{ClusterStatistics, PaginatedCluster, PhysicalPosition, RawBuffer, RecordVersion};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasCluster
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
