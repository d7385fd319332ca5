//! Atomic Operation
//!
//! A unit of work over pages. Every page the operation touches is copied
//! into a private overlay on first write; nothing becomes visible to other
//! threads until commit, and rollback simply discards the overlay.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, trace};

use super::manager::AtomicOperationsManager;
use super::store::PageRead;
use crate::error::{ClusterError, Result};
use crate::page::{FileId, PageBuffer, PageIndex, PageKey};

/// Identifier of an atomic operation (unique per manager lifetime)
pub type OperationId = u64;

/// An in-flight atomic operation.
///
/// Holds the manager's writer lock for its whole lifetime. Dropping an
/// operation that was neither committed nor rolled back rolls it back.
pub struct AtomicOperation<'a> {
    id: OperationId,
    label: String,
    manager: &'a AtomicOperationsManager,
    /// Pages changed by this operation, in key order
    overlay: BTreeMap<PageKey, Arc<PageBuffer>>,
    /// Page counts of files this operation has grown
    page_counts: HashMap<FileId, u32>,
    finished: bool,
    _writer: MutexGuard<'a, ()>,
}

impl<'a> AtomicOperation<'a> {
    pub(super) fn new(
        id: OperationId,
        label: &str,
        manager: &'a AtomicOperationsManager,
        writer: MutexGuard<'a, ()>,
    ) -> Self {
        Self {
            id,
            label: label.to_string(),
            manager,
            overlay: BTreeMap::new(),
            page_counts: HashMap::new(),
            finished: false,
            _writer: writer,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of pages changed so far
    pub fn changed_pages(&self) -> usize {
        self.overlay.len()
    }

    /// Writable copy of a page, private to this operation
    pub fn page_mut(&mut self, key: PageKey) -> Result<&mut PageBuffer> {
        if !self.overlay.contains_key(&key) {
            let page = self.manager.store().snapshot().read_page(key)?;
            self.overlay.insert(key, page);
        }
        let page = self
            .overlay
            .get_mut(&key)
            .ok_or_else(|| ClusterError::Storage(format!("Page {:?} missing from overlay", key)))?;
        Ok(Arc::make_mut(page))
    }

    /// Append a zeroed page to a file, returning its index
    pub fn allocate_page(&mut self, file: FileId) -> Result<PageIndex> {
        let index = self.page_count(file)?;
        self.page_counts.insert(file, index + 1);
        self.overlay
            .insert(PageKey::new(file, index), Arc::new(PageBuffer::zeroed()));
        trace!(op = self.id, file, index, "Page allocated");
        Ok(index)
    }

    /// Make every change durable and visible. Returns the commit LSN, or
    /// `None` if the operation changed nothing.
    pub fn commit(mut self) -> Result<Option<u64>> {
        self.finished = true;
        let overlay = std::mem::take(&mut self.overlay);
        let result = self.manager.commit_pages(self.id, &self.label, overlay);
        match &result {
            Ok(lsn) => debug!(op = self.id, label = %self.label, lsn = ?lsn, "Operation committed"),
            Err(e) => debug!(op = self.id, label = %self.label, error = %e, "Commit failed"),
        }
        result
    }

    /// Discard every change
    pub fn rollback(mut self) {
        self.finish_rollback();
    }

    fn finish_rollback(&mut self) {
        self.finished = true;
        let pages = self.overlay.len();
        self.overlay.clear();
        self.page_counts.clear();
        self.manager.record_rollback();
        debug!(op = self.id, label = %self.label, pages, "Operation rolled back");
    }
}

impl PageRead for AtomicOperation<'_> {
    fn read_page(&self, key: PageKey) -> Result<Arc<PageBuffer>> {
        if let Some(page) = self.overlay.get(&key) {
            return Ok(Arc::clone(page));
        }
        self.manager.store().snapshot().read_page(key)
    }

    fn page_count(&self, file: FileId) -> Result<u32> {
        if let Some(&count) = self.page_counts.get(&file) {
            return Ok(count);
        }
        self.manager.store().snapshot().page_count(file)
    }
}

impl Drop for AtomicOperation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish_rollback();
        }
        self.manager.unregister(self.id);
    }
}

impl std::fmt::Debug for AtomicOperation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicOperation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("changed_pages", &self.overlay.len())
            .finish()
    }
}
