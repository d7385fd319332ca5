//! Structural operation definitions
//!
//! Changes to the shared cluster-membership configuration. Each variant has
//! a numeric request type used as its wire tag.

use super::{NodeIdentity, SharedConfiguration};

/// Request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    NodeJoin = 0x01,
    NodeLeave = 0x02,
}

impl RequestType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(RequestType::NodeJoin),
            0x02 => Some(RequestType::NodeLeave),
            _ => None,
        }
    }
}

/// A structural change to apply to the shared configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralOperation {
    /// A node enters the cluster
    NodeJoin { identity: NodeIdentity },

    /// A node leaves the cluster
    NodeLeave { identity: NodeIdentity },
}

impl StructuralOperation {
    /// Get the request type
    pub fn request_type(&self) -> RequestType {
        match self {
            StructuralOperation::NodeJoin { .. } => RequestType::NodeJoin,
            StructuralOperation::NodeLeave { .. } => RequestType::NodeLeave,
        }
    }

    /// Apply the change. Returns `false` when it was already in effect
    /// (joining a known node, or removing an unknown one).
    pub fn apply(&self, configuration: &mut SharedConfiguration) -> bool {
        match self {
            StructuralOperation::NodeJoin { identity } => configuration.add_node(identity.clone()),
            StructuralOperation::NodeLeave { identity } => configuration.remove_node(identity),
        }
    }
}
