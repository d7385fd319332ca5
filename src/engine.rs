//! Engine Module
//!
//! Entry point that ties the storage layers together.
//!
//! ## Responsibilities
//! - Own the data directory, the WAL and the atomic operations manager
//! - Run crash recovery on startup
//! - Create, open and drop clusters by name
//! - Checkpoint on close

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::atomic::{AtomicOperationsManager, PageStore};
use crate::cluster::{PaginatedCluster, DATA_FILE_EXTENSION};
use crate::config::Config;
use crate::error::{ClusterError, Result};
use crate::wal::{WalRecovery, WalWriter};

/// The storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Atomic operations**: serialized by the manager; one at a time,
///   at most one per thread
/// - **Reads**: any number of threads, each read sees one committed state
/// - `clusters`: RwLock over the open-cluster registry
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Operations, WAL and committed pages (shared with every cluster)
    manager: Arc<AtomicOperationsManager>,

    /// Clusters opened through this engine
    clusters: RwLock<HashMap<String, Arc<PaginatedCluster>>>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "atomic.wal";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Recover committed operations from the WAL if it exists
    /// 3. Replay them into the data files and checkpoint
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        // Step 2: Scan the WAL, cutting off any torn tail
        let entries = if wal_path.exists() {
            let (entries, recovery_result) = WalRecovery::recover(&wal_path)?;
            if recovery_result.entries_corrupted > 0 {
                warn!(
                    corrupted = recovery_result.entries_corrupted,
                    last_lsn = recovery_result.last_lsn,
                    "WAL had corrupt entries; replaying the valid prefix"
                );
            }
            if recovery_result.entries_recovered > 0 {
                info!(
                    entries = recovery_result.entries_recovered,
                    last_lsn = recovery_result.last_lsn,
                    "WAL recovery"
                );
            }
            entries
        } else {
            Vec::new()
        };

        // Step 3: Page store + WAL writer + manager
        let store = PageStore::open(&config.data_dir, config.page_cache_pages)?;
        let wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        let manager = Arc::new(AtomicOperationsManager::new(
            store,
            wal,
            config.wal_checkpoint_bytes,
        ));

        // Step 4: Replay committed pages and make them durable in the data files
        manager.replay(entries)?;

        info!(data_dir = %config.data_dir.display(), "Engine opened");
        Ok(Self {
            config,
            manager,
            clusters: RwLock::new(HashMap::new()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    // =========================================================================
    // Clusters
    // =========================================================================

    /// Create a new cluster
    pub fn create_cluster(&self, name: &str) -> Result<Arc<PaginatedCluster>> {
        validate_cluster_name(name)?;
        let mut clusters = self.clusters.write();
        if clusters.contains_key(name) {
            return Err(ClusterError::ClusterExists(name.to_string()));
        }
        let cluster = Arc::new(PaginatedCluster::create(Arc::clone(&self.manager), name)?);
        clusters.insert(name.to_string(), Arc::clone(&cluster));
        Ok(cluster)
    }

    /// Open an existing cluster (cached after the first call)
    pub fn open_cluster(&self, name: &str) -> Result<Arc<PaginatedCluster>> {
        validate_cluster_name(name)?;
        if let Some(cluster) = self.clusters.read().get(name) {
            return Ok(Arc::clone(cluster));
        }

        let mut clusters = self.clusters.write();
        if let Some(cluster) = clusters.get(name) {
            return Ok(Arc::clone(cluster));
        }
        let cluster = Arc::new(PaginatedCluster::open(Arc::clone(&self.manager), name)?);
        clusters.insert(name.to_string(), Arc::clone(&cluster));
        Ok(cluster)
    }

    /// Delete a cluster and its files
    pub fn drop_cluster(&self, name: &str) -> Result<()> {
        validate_cluster_name(name)?;
        let cached = self.clusters.write().remove(name);
        let cluster = match cached {
            Some(cluster) => cluster,
            None => Arc::new(PaginatedCluster::open(Arc::clone(&self.manager), name)?),
        };
        cluster.remove_files()
    }

    /// Names of all clusters in the data directory, sorted
    pub fn cluster_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.data_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Write all committed pages to the data files and truncate the WAL
    pub fn checkpoint(&self) -> Result<()> {
        self.manager.checkpoint()
    }

    /// Close the engine gracefully
    ///
    /// Checkpoints so the next open has nothing to replay
    pub fn close(self) -> Result<()> {
        self.clusters.write().clear();
        self.manager.checkpoint()?;
        info!(data_dir = %self.config.data_dir.display(), "Engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the atomic operations manager
    pub fn manager(&self) -> &Arc<AtomicOperationsManager> {
        &self.manager
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Cluster names become file names, so keep them to a safe alphabet
fn validate_cluster_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ClusterError::Config(format!("Invalid cluster name: {:?}", name)))
    }
}
