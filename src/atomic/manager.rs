//! Atomic Operations Manager
//!
//! Starts, commits and rolls back atomic operations, and owns the WAL and
//! the committed page store.
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
//!
//! - **Operations**: serialized by `write_lock`
//!   - Only ONE atomic operation at a time; starting blocks until the
//!     previous one ends
//!   - Lock order: write_lock → wal → store state
//!
//! - **Reads outside an operation**: no write_lock needed
//!   - Take a store snapshot (read lock) for the whole logical read
//!   - Commit publishes under the store write lock, so readers never see a
//!     half-applied operation
//!
//! - **Nesting**: a thread that already runs an operation gets
//!   [`ClusterError::NestedOperation`] instead of deadlocking on itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::operation::{AtomicOperation, OperationId};
use super::store::PageStore;
use crate::error::{ClusterError, Result};
use crate::page::{FileId, PageBuffer, PageKey};
use crate::wal::{Operation, PageImage, WalEntry, WalWriter};

/// Counters describing operation traffic since the manager was created
#[derive(Debug, Default)]
struct OperationMetrics {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    checkpoints: AtomicU64,
}

/// Point-in-time copy of the operation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationStats {
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub checkpoints: u64,
}

/// Coordinates atomic operations over a [`PageStore`]
pub struct AtomicOperationsManager {
    /// Committed pages (internal RwLock)
    store: PageStore,

    /// Write-ahead log, one entry per committed operation
    wal: Mutex<WalWriter>,

    /// Serializes atomic operations
    write_lock: Mutex<()>,

    /// Operation running on each thread
    active: Mutex<HashMap<ThreadId, OperationId>>,

    next_operation_id: AtomicU64,

    /// WAL size that triggers a checkpoint after commit
    checkpoint_bytes: u64,

    metrics: OperationMetrics,
}

impl AtomicOperationsManager {
    pub fn new(store: PageStore, wal: WalWriter, checkpoint_bytes: u64) -> Self {
        Self {
            store,
            wal: Mutex::new(wal),
            write_lock: Mutex::new(()),
            active: Mutex::new(HashMap::new()),
            next_operation_id: AtomicU64::new(1),
            checkpoint_bytes,
            metrics: OperationMetrics::default(),
        }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    // =========================================================================
    // Operation Lifecycle
    // =========================================================================

    /// Start an atomic operation on the current thread.
    ///
    /// Blocks while another thread runs an operation.
    pub fn start_atomic_operation(&self, label: &str) -> Result<AtomicOperation<'_>> {
        self.ensure_no_operation()?;

        let guard = self.write_lock.lock();
        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(thread::current().id(), id);
        self.metrics.started.fetch_add(1, Ordering::Relaxed);

        debug!(op = id, label, "Operation started");
        Ok(AtomicOperation::new(id, label, self, guard))
    }

    /// Run `f` inside an operation: commit on `Ok`, roll back on `Err`
    pub fn execute<T, F>(&self, label: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut AtomicOperation<'_>) -> Result<T>,
    {
        let mut operation = self.start_atomic_operation(label)?;
        match f(&mut operation) {
            Ok(value) => {
                operation.commit()?;
                Ok(value)
            }
            Err(e) => {
                operation.rollback();
                Err(e)
            }
        }
    }

    /// Commit (`rollback == false`) or roll back an operation
    pub fn end_atomic_operation(&self, operation: AtomicOperation<'_>, rollback: bool) -> Result<()> {
        if rollback {
            operation.rollback();
        } else {
            operation.commit()?;
        }
        Ok(())
    }

    /// Operation running on the current thread, if any
    pub fn current_operation(&self) -> Option<OperationId> {
        self.active.lock().get(&thread::current().id()).copied()
    }

    pub(crate) fn ensure_no_operation(&self) -> Result<()> {
        match self.current_operation() {
            Some(existing) => Err(ClusterError::NestedOperation(existing)),
            None => Ok(()),
        }
    }

    pub(super) fn unregister(&self, id: OperationId) {
        self.active.lock().retain(|_, active| *active != id);
    }

    pub(super) fn record_rollback(&self) {
        self.metrics.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Log the pages, publish them, checkpoint if the WAL grew too large.
    /// Called with the writer lock held by the committing operation.
    pub(super) fn commit_pages(
        &self,
        id: OperationId,
        label: &str,
        overlay: std::collections::BTreeMap<PageKey, Arc<PageBuffer>>,
    ) -> Result<Option<u64>> {
        if overlay.is_empty() {
            self.metrics.committed.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let mut wal = self.wal.lock();
        let lsn = wal.current_lsn();

        let mut names: HashMap<FileId, String> = HashMap::new();
        let mut images = Vec::with_capacity(overlay.len());
        let mut pages = Vec::with_capacity(overlay.len());
        for (key, mut page) in overlay {
            Arc::make_mut(&mut page).set_lsn(lsn);
            let file = match names.get(&key.file) {
                Some(name) => name.clone(),
                None => {
                    let name = self.store.file_name(key.file)?;
                    names.insert(key.file, name.clone());
                    name
                }
            };
            images.push(PageImage {
                file,
                index: key.index,
                data: page.as_bytes().to_vec(),
            });
            pages.push((key, page));
        }

        let page_count = pages.len();
        wal.append(Operation::Commit {
            operation_id: id,
            label: label.to_string(),
            pages: images,
        })?;
        self.store.publish(pages)?;
        self.metrics.committed.fetch_add(1, Ordering::Relaxed);
        debug!(op = id, lsn, pages = page_count, "Commit logged and published");

        // The operation is durable and visible from here on; a failed
        // checkpoint is retried after the next commit.
        if wal.size_bytes() >= self.checkpoint_bytes {
            if let Err(e) = self.checkpoint_locked(&mut wal) {
                warn!(op = id, lsn, error = %e, "Automatic checkpoint failed");
            }
        }
        Ok(Some(lsn))
    }

    // =========================================================================
    // Checkpoint / Recovery
    // =========================================================================

    /// Write all committed pages to their files and truncate the WAL
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_no_operation()?;
        let _write_guard = self.write_lock.lock();
        let mut wal = self.wal.lock();
        self.checkpoint_locked(&mut wal)
    }

    fn checkpoint_locked(&self, wal: &mut WalWriter) -> Result<()> {
        wal.sync()?;
        let pages = self.store.checkpoint()?;
        wal.truncate()?;
        self.metrics.checkpoints.fetch_add(1, Ordering::Relaxed);
        info!(pages, "Checkpoint: pages written, WAL truncated");
        Ok(())
    }

    /// Re-apply committed operations found in the WAL, then checkpoint.
    ///
    /// Page images are full after-images, so replaying an entry whose pages
    /// already reached disk is harmless.
    pub fn replay(&self, entries: Vec<WalEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _write_guard = self.write_lock.lock();

        let count = entries.len();
        for entry in entries {
            let Operation::Commit { pages, .. } = entry.operation;
            let mut batch = Vec::with_capacity(pages.len());
            for image in pages {
                let file = self.store.open_file(&image.file)?;
                batch.push((
                    PageKey::new(file, image.index),
                    Arc::new(PageBuffer::from_vec(image.data)?),
                ));
            }
            self.store.publish(batch)?;
        }

        let mut wal = self.wal.lock();
        self.checkpoint_locked(&mut wal)?;
        info!(entries = count, "WAL replay complete");
        Ok(())
    }

    /// Checkpoint, then delete a file. The checkpoint guarantees no WAL
    /// entry can resurrect the file on the next recovery.
    pub fn drop_file(&self, name: &str) -> Result<()> {
        self.ensure_no_operation()?;
        let _write_guard = self.write_lock.lock();
        let mut wal = self.wal.lock();
        self.checkpoint_locked(&mut wal)?;
        self.store.drop_file(name)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> OperationStats {
        OperationStats {
            started: self.metrics.started.load(Ordering::Relaxed),
            committed: self.metrics.committed.load(Ordering::Relaxed),
            rolled_back: self.metrics.rolled_back.load(Ordering::Relaxed),
            checkpoints: self.metrics.checkpoints.load(Ordering::Relaxed),
        }
    }

    /// Current WAL size in bytes
    pub fn wal_size(&self) -> u64 {
        self.wal.lock().size_bytes()
    }
}
