//! Structural Operations Module
//!
//! Cluster-membership changes that travel between nodes in a binary form
//! and are applied to a [`SharedConfiguration`]. Independent of the record
//! storage; kept as a consumer of the same error and codec conventions.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Request Types
//! - 0x01: NODE_JOIN  - Payload: identity
//! - 0x02: NODE_LEAVE - Payload: identity
//!
//! Identity = id (u16 length + UTF-8) + name (u16 length + UTF-8).
//! All integers are big-endian.

mod codec;
mod configuration;
mod operation;

pub use codec::{
    decode_operation, encode_operation, read_operation, write_operation, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};
pub use configuration::{NodeConfiguration, NodeIdentity, SharedConfiguration};
pub use operation::{RequestType, StructuralOperation};
