//! Error types for AtlasCluster
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ClusterError
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Unified error type for AtlasCluster operations
#[derive(Debug, Error)]
pub enum ClusterError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Page / Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    /// Page or position map content is inconsistent (bad CRC, broken chain,
    /// dangling map entry). Fatal for the caller.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Record of {size} bytes exceeds the maximum of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Cluster Errors
    // -------------------------------------------------------------------------
    #[error("Position {0} is not allocated or already holds a record")]
    PositionNotAllocated(u64),

    #[error("Cluster already exists: {0}")]
    ClusterExists(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    // -------------------------------------------------------------------------
    // Atomic Operation Errors
    // -------------------------------------------------------------------------
    #[error("Thread already runs atomic operation {0}")]
    NestedOperation(u64),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
