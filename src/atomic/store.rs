//! Page Store
//!
//! Committed view of every registered page file.
//!
//! ## Responsibilities
//! - Register files by name, hand out stable [`FileId`]s
//! - Hold committed pages that are not yet checkpointed (the dirty table)
//! - Read pages from disk with CRC verification, through a small clean cache
//! - Write dirty pages back to their files during a checkpoint
//!
//! ## Concurrency
//! - `state`: RwLock. Readers take a [`StoreSnapshot`] (read lock) for a
//!   whole logical read; publishing a commit takes the write lock, so a
//!   reader sees all of a commit or none of it.
//! - `cache`: separate Mutex, only ever holds copies of committed pages.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::error::{ClusterError, Result};
use crate::page::{FileId, PageBuffer, PageIndex, PageKey, PAGE_SIZE};

/// Read access to pages, committed or as seen from inside an operation
pub trait PageRead {
    fn read_page(&self, key: PageKey) -> Result<Arc<PageBuffer>>;

    /// Number of pages in a file
    fn page_count(&self, file: FileId) -> Result<u32>;
}

// =============================================================================
// Paged File
// =============================================================================

/// One registered data file
struct PagedFile {
    name: String,
    file: Mutex<File>,
    /// Committed page count, including dirty pages beyond the end of file
    pages: u32,
}

impl PagedFile {
    fn open(path: &Path, name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            warn!(file = name, len, "Data file ends with a partial page");
        }
        Ok(Self {
            name: name.to_string(),
            file: Mutex::new(file),
            pages: (len / PAGE_SIZE as u64) as u32,
        })
    }

    fn read(&self, index: PageIndex) -> Result<PageBuffer> {
        let mut page = PageBuffer::zeroed();
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(index as u64 * PAGE_SIZE as u64))?;
            file.read_exact(page.as_bytes_mut())?;
        }
        if !page.verify_checksum() {
            return Err(ClusterError::Corruption(format!(
                "Checksum mismatch on page {} of {}",
                index, self.name
            )));
        }
        Ok(page)
    }

    fn write(&self, index: PageIndex, page: &PageBuffer) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(index as u64 * PAGE_SIZE as u64))?;
        file.write_all(page.as_bytes())?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

// =============================================================================
// Clean Page Cache
// =============================================================================

/// FIFO cache of clean committed pages
struct PageCache {
    pages: HashMap<PageKey, Arc<PageBuffer>>,
    order: VecDeque<PageKey>,
    capacity: usize,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            pages: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &PageKey) -> Option<Arc<PageBuffer>> {
        self.pages.get(key).cloned()
    }

    fn insert(&mut self, key: PageKey, page: Arc<PageBuffer>) {
        if self.capacity == 0 {
            return;
        }
        if self.pages.insert(key, page).is_none() {
            self.order.push_back(key);
        }
        while self.pages.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.pages.remove(&old);
                }
                None => break,
            }
        }
    }

    fn evict_file(&mut self, file: FileId) {
        self.pages.retain(|key, _| key.file != file);
        self.order.retain(|key| key.file != file);
    }
}

// =============================================================================
// Page Store
// =============================================================================

struct StoreState {
    files: HashMap<FileId, PagedFile>,
    names: HashMap<String, FileId>,
    /// Committed pages not yet written to their files
    dirty: HashMap<PageKey, Arc<PageBuffer>>,
    next_file_id: FileId,
}

/// Committed page state shared by all readers and the single writer
pub struct PageStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
    cache: Mutex<PageCache>,
}

impl PageStore {
    pub fn open(dir: &Path, cache_pages: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(StoreState {
                files: HashMap::new(),
                names: HashMap::new(),
                dirty: HashMap::new(),
                next_file_id: 1,
            }),
            cache: Mutex::new(PageCache::new(cache_pages)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a file (creating it if missing). Idempotent.
    pub fn open_file(&self, name: &str) -> Result<FileId> {
        let mut state = self.state.write();
        if let Some(&id) = state.names.get(name) {
            return Ok(id);
        }
        let file = PagedFile::open(&self.dir.join(name), name)?;
        let id = state.next_file_id;
        state.next_file_id += 1;
        debug!(file = name, id, pages = file.pages, "Page file registered");
        state.files.insert(id, file);
        state.names.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn file_id(&self, name: &str) -> Option<FileId> {
        self.state.read().names.get(name).copied()
    }

    /// Registered or present on disk
    pub fn file_exists(&self, name: &str) -> bool {
        self.state.read().names.contains_key(name) || self.dir.join(name).exists()
    }

    pub fn file_name(&self, file: FileId) -> Result<String> {
        self.state
            .read()
            .files
            .get(&file)
            .map(|f| f.name.clone())
            .ok_or_else(|| ClusterError::Storage(format!("Unknown file id {}", file)))
    }

    /// Unregister a file, forget its pages and delete it from disk
    pub fn drop_file(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if let Some(id) = state.names.remove(name) {
            state.files.remove(&id);
            state.dirty.retain(|key, _| key.file != id);
            self.cache.lock().evict_file(id);
        }
        let path = self.dir.join(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        debug!(file = name, "Page file dropped");
        Ok(())
    }

    /// Consistent read view, held for the duration of one logical read
    pub fn snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            state: self.state.read(),
            cache: &self.cache,
        }
    }

    /// Make committed pages visible to readers, atomically
    pub(crate) fn publish(
        &self,
        pages: impl IntoIterator<Item = (PageKey, Arc<PageBuffer>)>,
    ) -> Result<()> {
        let mut state = self.state.write();
        for (key, page) in pages {
            let file = state
                .files
                .get_mut(&key.file)
                .ok_or_else(|| ClusterError::Storage(format!("Unknown file id {}", key.file)))?;
            file.pages = file.pages.max(key.index + 1);
            state.dirty.insert(key, page);
        }
        Ok(())
    }

    /// Number of committed pages waiting for a checkpoint
    pub fn dirty_pages(&self) -> usize {
        self.state.read().dirty.len()
    }

    /// Write every dirty page to its file and fsync.
    ///
    /// The WAL covering these pages must be synced before this runs.
    pub(crate) fn checkpoint(&self) -> Result<usize> {
        let mut state = self.state.write();
        if state.dirty.is_empty() {
            return Ok(0);
        }

        let mut keys: Vec<PageKey> = state.dirty.keys().copied().collect();
        keys.sort();

        let state = &mut *state;
        let mut touched = Vec::new();
        for key in &keys {
            let Some(page) = state.dirty.get_mut(key) else {
                continue;
            };
            Arc::make_mut(page).stamp_checksum();
            let file = state
                .files
                .get(&key.file)
                .ok_or_else(|| ClusterError::Storage(format!("Unknown file id {}", key.file)))?;
            file.write(key.index, &**page)?;
            if touched.last() != Some(&key.file) {
                touched.push(key.file);
            }
        }
        for id in &touched {
            if let Some(file) = state.files.get(id) {
                file.sync()?;
            }
        }

        let written = keys.len();
        let mut cache = self.cache.lock();
        for (key, page) in state.dirty.drain() {
            cache.insert(key, page);
        }
        debug!(pages = written, files = touched.len(), "Checkpoint complete");
        Ok(written)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Committed state under a read lock
pub struct StoreSnapshot<'a> {
    state: RwLockReadGuard<'a, StoreState>,
    cache: &'a Mutex<PageCache>,
}

impl PageRead for StoreSnapshot<'_> {
    fn read_page(&self, key: PageKey) -> Result<Arc<PageBuffer>> {
        if let Some(page) = self.state.dirty.get(&key) {
            return Ok(Arc::clone(page));
        }
        if let Some(page) = self.cache.lock().get(&key) {
            return Ok(page);
        }

        let file = self
            .state
            .files
            .get(&key.file)
            .ok_or_else(|| ClusterError::Storage(format!("Unknown file id {}", key.file)))?;
        if key.index >= file.pages {
            return Err(ClusterError::Storage(format!(
                "Page {} is beyond the end of {} ({} pages)",
                key.index, file.name, file.pages
            )));
        }
        let page = Arc::new(file.read(key.index)?);
        self.cache.lock().insert(key, Arc::clone(&page));
        Ok(page)
    }

    fn page_count(&self, file: FileId) -> Result<u32> {
        self.state
            .files
            .get(&file)
            .map(|f| f.pages)
            .ok_or_else(|| ClusterError::Storage(format!("Unknown file id {}", file)))
    }
}
