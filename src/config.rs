//! Configuration for AtlasCluster
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{ClusterError, Result};

/// Main configuration for an AtlasCluster storage instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, cluster files)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── atomic.wal        (write-ahead log of committed operations)
    ///     ├── {cluster}.pcl     (state page + data pages)
    ///     ├── {cluster}.cpm     (position map buckets)
    ///     └── {cluster}.fsm     (free space map)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// WAL size (in bytes) after which a commit triggers a checkpoint.
    /// Also bounds the number of committed pages held in memory.
    pub wal_checkpoint_bytes: u64,

    // -------------------------------------------------------------------------
    // Page Cache Configuration
    // -------------------------------------------------------------------------
    /// Number of clean pages kept in memory after being read or checkpointed
    pub page_cache_pages: usize,
}

/// WAL sync strategy
///
/// Pages only reach their data files during a checkpoint, after the WAL has
/// been synced, so every strategy keeps the files consistent. The strategy
/// only decides how many of the most recent commits a crash may lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every commit (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced commits (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./atlascluster_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            wal_checkpoint_bytes: 64 * 1024 * 1024, // 64 MB
            page_cache_pages: 1024,                 // 64 MB of 64 KiB pages
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(ClusterError::Config(
                "EveryNEntries requires a count of at least 1".to_string(),
            ));
        }
        if self.wal_checkpoint_bytes == 0 {
            return Err(ClusterError::Config(
                "wal_checkpoint_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers a checkpoint (in bytes)
    pub fn wal_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.config.wal_checkpoint_bytes = bytes;
        self
    }

    /// Set the number of clean pages to cache (0 disables caching)
    pub fn page_cache_pages(mut self, pages: usize) -> Self {
        self.config.page_cache_pages = pages;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
