//! Record value types
//!
//! Plain values handed to and returned from the cluster. None of them keep
//! a reference into page memory.

/// Location and metadata of one logical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalPosition {
    pub cluster_position: u64,
    pub record_type: u8,
    /// Length of the whole logical payload in bytes
    pub record_size: u32,
    pub record_version: i32,
}

impl PhysicalPosition {
    pub fn new(cluster_position: u64) -> Self {
        Self {
            cluster_position,
            record_type: 0,
            record_size: 0,
            record_version: 0,
        }
    }
}

/// Payload and metadata of a record, as read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer {
    pub buffer: Vec<u8>,
    pub version: i32,
    pub record_type: u8,
}

/// Reserved record version values
pub struct RecordVersion;

impl RecordVersion {
    /// Passed to `update_record` when the caller wants the update skipped
    pub const SKIP_UPDATE: i32 = -2;
}
