//! Cluster Module
//!
//! Paginated record storage: variable-length, versioned records on
//! fixed-size pages, addressed by stable cluster positions.
//!
//! ## Files
//! ```text
//! {name}.pcl   page 0: ClusterStatePage, pages 1..: ClusterPage (records)
//! {name}.cpm   PositionMapBucket pages
//! {name}.fsm   FreeSpaceMapPage pages (one tier byte per data page)
//! ```
//!
//! ## Record chains
//! A payload up to `MAX_RECORD_SIZE` bytes is one entry. Larger payloads are
//! cut into `MAX_RECORD_SIZE` chunks plus a remainder; each entry points at
//! the next one and the position map points at the head.
//!
//! Every mutation takes the caller's [`AtomicOperation`] explicitly. Reads
//! without an operation see the last committed state; the `*_in` variants
//! see the operation's own uncommitted writes.

mod free_space;
mod position_map;
mod record;

pub use record::{PhysicalPosition, RawBuffer, RecordVersion};

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::atomic::{AtomicOperation, AtomicOperationsManager, PageRead};
use crate::error::{ClusterError, Result};
use crate::page::{
    ClusterPage, ClusterStatePage, EntryHeader, FileId, MapEntry, MapEntryStatus, PageIndex,
    PageKey, PageKind, MAX_RECORD_SIZE, STATE_PAGE_INDEX,
};

use free_space::FreeSpaceMap;
use position_map::PositionMap;

/// Extension of the data file (state page + record pages)
pub const DATA_FILE_EXTENSION: &str = "pcl";
/// Extension of the position map file
pub const MAP_FILE_EXTENSION: &str = "cpm";
/// Extension of the free space map file
pub const FREE_SPACE_FILE_EXTENSION: &str = "fsm";

/// Counters kept in the state page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClusterState {
    pub entries: u64,
    pub positions_size: u64,
    pub free_positions: u64,
    pub lowest_free: Option<u64>,
}

/// Snapshot of a cluster's counters and file sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterStatistics {
    /// Occupied positions
    pub entries: u64,
    /// Allocation cursor: positions ever issued
    pub positions_size: u64,
    /// Tombstoned positions waiting for reuse
    pub free_positions: u64,
    /// Record pages (state page excluded)
    pub data_pages: u32,
    /// Position map bucket pages
    pub map_pages: u32,
}

/// A paginated record cluster
pub struct PaginatedCluster {
    name: String,
    manager: Arc<AtomicOperationsManager>,
    data_file: FileId,
    map: PositionMap,
    free_space: FreeSpaceMap,
}

impl PaginatedCluster {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a new, empty cluster
    pub fn create(manager: Arc<AtomicOperationsManager>, name: &str) -> Result<Self> {
        let data_name = file_name(name, DATA_FILE_EXTENSION);
        if manager.store().file_exists(&data_name) {
            return Err(ClusterError::ClusterExists(name.to_string()));
        }

        // Checked before any file is created
        manager.ensure_no_operation()?;

        let cluster = Self::register(manager, name)?;
        let initialized = cluster.manager.execute("create cluster", |op| {
            let index = op.allocate_page(cluster.data_file)?;
            if index != STATE_PAGE_INDEX {
                return Err(ClusterError::Storage(format!(
                    "Data file of {} is not empty",
                    cluster.name
                )));
            }
            ClusterStatePage::new(op.page_mut(cluster.state_key())?.as_bytes_mut()).init();
            Ok(())
        });
        if let Err(e) = initialized {
            if let Err(cleanup) = cluster.forget_files() {
                warn!(cluster = name, error = %cleanup, "Could not remove files of failed cluster");
            }
            return Err(e);
        }

        info!(cluster = name, "Cluster created");
        Ok(cluster)
    }

    /// Open an existing cluster
    pub fn open(manager: Arc<AtomicOperationsManager>, name: &str) -> Result<Self> {
        if !manager.store().file_exists(&file_name(name, DATA_FILE_EXTENSION)) {
            return Err(ClusterError::ClusterNotFound(name.to_string()));
        }

        let cluster = Self::register(manager, name)?;
        {
            let snapshot = cluster.manager.store().snapshot();
            let page = snapshot.read_page(cluster.state_key())?;
            page.expect_kind(PageKind::ClusterState, cluster.state_key())?;
            ClusterStatePage::new(page.as_bytes()).validate()?;
        }

        let state = cluster.state()?;
        info!(
            cluster = name,
            entries = state.entries,
            positions = state.positions_size,
            "Cluster opened"
        );
        Ok(cluster)
    }

    fn register(manager: Arc<AtomicOperationsManager>, name: &str) -> Result<Self> {
        let store = manager.store();
        let data_file = store.open_file(&file_name(name, DATA_FILE_EXTENSION))?;
        let map_file = store.open_file(&file_name(name, MAP_FILE_EXTENSION))?;
        let fsm_file = store.open_file(&file_name(name, FREE_SPACE_FILE_EXTENSION))?;
        Ok(Self {
            name: name.to_string(),
            manager,
            data_file,
            map: PositionMap::new(map_file),
            free_space: FreeSpaceMap::new(fsm_file),
        })
    }

    /// Flush committed pages of every cluster to disk
    pub fn close(self) -> Result<()> {
        self.manager.checkpoint()?;
        debug!(cluster = %self.name, "Cluster closed");
        Ok(())
    }

    /// Remove the cluster and its files
    pub fn delete(self) -> Result<()> {
        self.remove_files()
    }

    /// Unregister and delete the files of a cluster that never committed
    fn forget_files(&self) -> Result<()> {
        for extension in [
            DATA_FILE_EXTENSION,
            MAP_FILE_EXTENSION,
            FREE_SPACE_FILE_EXTENSION,
        ] {
            self.manager
                .store()
                .drop_file(&file_name(&self.name, extension))?;
        }
        Ok(())
    }

    pub(crate) fn remove_files(&self) -> Result<()> {
        for extension in [
            DATA_FILE_EXTENSION,
            MAP_FILE_EXTENSION,
            FREE_SPACE_FILE_EXTENSION,
        ] {
            self.manager.drop_file(&file_name(&self.name, extension))?;
        }
        info!(cluster = %self.name, "Cluster deleted");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Arc<AtomicOperationsManager> {
        &self.manager
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Store a new record.
    ///
    /// Without `preallocated` the record takes the lowest tombstoned position,
    /// or the next new one. With it, the position must still be reserved and
    /// empty, otherwise nothing is written.
    pub fn create_record(
        &self,
        op: &mut AtomicOperation<'_>,
        payload: &[u8],
        version: i32,
        record_type: u8,
        preallocated: Option<&PhysicalPosition>,
    ) -> Result<PhysicalPosition> {
        let record_size = checked_record_size(payload)?;
        let mut state = self.load_state(&*op)?;

        let position = match preallocated {
            Some(reserved) => {
                let position = reserved.cluster_position;
                match self.map.get(&*op, position)? {
                    Some(entry) if entry.status == MapEntryStatus::Allocated => position,
                    _ => return Err(ClusterError::PositionNotAllocated(position)),
                }
            }
            None => self.map.allocate(op, &mut state)?,
        };

        let (page, slot) = self.write_chain(op, payload, version, record_type)?;
        self.map.set(op, position, MapEntry::filled(page, slot))?;
        state.entries += 1;
        self.store_state(op, &state)?;

        trace!(
            cluster = %self.name,
            position,
            size = record_size,
            page,
            slot,
            "Record created"
        );
        Ok(PhysicalPosition {
            cluster_position: position,
            record_type,
            record_size,
            record_version: version,
        })
    }

    /// Reserve a position without a payload
    pub fn allocate_position(
        &self,
        op: &mut AtomicOperation<'_>,
        record_type: u8,
    ) -> Result<PhysicalPosition> {
        let mut state = self.load_state(&*op)?;
        let position = self.map.allocate(op, &mut state)?;
        self.store_state(op, &state)?;

        trace!(cluster = %self.name, position, "Position allocated");
        Ok(PhysicalPosition {
            cluster_position: position,
            record_type,
            record_size: 0,
            record_version: 0,
        })
    }

    /// Replace the payload, version and type of an occupied position.
    ///
    /// Returns `false` without writing anything when `version` is
    /// [`RecordVersion::SKIP_UPDATE`] or the position is not occupied.
    pub fn update_record(
        &self,
        op: &mut AtomicOperation<'_>,
        position: u64,
        payload: &[u8],
        version: i32,
        record_type: u8,
    ) -> Result<bool> {
        if version == RecordVersion::SKIP_UPDATE {
            return Ok(false);
        }
        checked_record_size(payload)?;

        let entry = match self.map.get(&*op, position)? {
            Some(entry) if entry.status == MapEntryStatus::Filled => entry,
            _ => return Ok(false),
        };

        self.delete_chain(op, entry.page, entry.slot)?;
        let (page, slot) = self.write_chain(op, payload, version, record_type)?;
        self.map.set(op, position, MapEntry::filled(page, slot))?;

        trace!(cluster = %self.name, position, size = payload.len(), "Record updated");
        Ok(true)
    }

    /// Delete the record at `position`. `false` if there was none.
    pub fn delete_record(&self, op: &mut AtomicOperation<'_>, position: u64) -> Result<bool> {
        let entry = match self.map.get(&*op, position)? {
            Some(entry) if entry.status == MapEntryStatus::Filled => entry,
            _ => return Ok(false),
        };

        let mut state = self.load_state(&*op)?;
        self.delete_chain(op, entry.page, entry.slot)?;
        self.map.remove(op, &mut state, position)?;
        state.entries = state.entries.checked_sub(1).ok_or_else(|| {
            ClusterError::Corruption(format!("Entry counter of {} underflows", self.name))
        })?;
        self.store_state(op, &state)?;

        trace!(cluster = %self.name, position, "Record deleted");
        Ok(true)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the committed record at `position`
    pub fn read_record(&self, position: u64) -> Result<Option<RawBuffer>> {
        let snapshot = self.manager.store().snapshot();
        self.read_record_with(&snapshot, position)
    }

    /// Read a record as seen from inside `op`
    pub fn read_record_in(
        &self,
        op: &AtomicOperation<'_>,
        position: u64,
    ) -> Result<Option<RawBuffer>> {
        self.read_record_with(op, position)
    }

    fn read_record_with(&self, pages: &impl PageRead, position: u64) -> Result<Option<RawBuffer>> {
        match self.map.get(pages, position)? {
            Some(entry) if entry.status == MapEntryStatus::Filled => {
                self.read_chain(pages, entry.page, entry.slot).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Metadata of the committed record at `position`
    pub fn get_physical_position(&self, position: u64) -> Result<Option<PhysicalPosition>> {
        let snapshot = self.manager.store().snapshot();
        self.physical_position_with(&snapshot, position)
    }

    pub fn get_physical_position_in(
        &self,
        op: &AtomicOperation<'_>,
        position: u64,
    ) -> Result<Option<PhysicalPosition>> {
        self.physical_position_with(op, position)
    }

    fn physical_position_with(
        &self,
        pages: &impl PageRead,
        position: u64,
    ) -> Result<Option<PhysicalPosition>> {
        match self.map.get(pages, position)? {
            Some(entry) if entry.status == MapEntryStatus::Filled => self
                .head_position(pages, position, entry)
                .map(Some),
            _ => Ok(None),
        }
    }

    fn head_position(
        &self,
        pages: &impl PageRead,
        position: u64,
        entry: MapEntry,
    ) -> Result<PhysicalPosition> {
        let page = pages.read_page(self.data_key(entry.page))?;
        let head = ClusterPage::new(page.as_bytes())
            .entry(entry.slot)
            .ok_or_else(|| self.dangling(position, entry))?
            .header;
        Ok(PhysicalPosition {
            cluster_position: position,
            record_type: head.record_type,
            record_size: head.record_size,
            record_version: head.version,
        })
    }

    /// Number of occupied positions (committed)
    pub fn entries(&self) -> Result<u64> {
        Ok(self.state()?.entries)
    }

    pub fn entries_in(&self, op: &AtomicOperation<'_>) -> Result<u64> {
        Ok(self.load_state(op)?.entries)
    }

    pub fn statistics(&self) -> Result<ClusterStatistics> {
        let snapshot = self.manager.store().snapshot();
        let state = self.load_state(&snapshot)?;
        Ok(ClusterStatistics {
            entries: state.entries,
            positions_size: state.positions_size,
            free_positions: state.free_positions,
            data_pages: snapshot.page_count(self.data_file)?.saturating_sub(1),
            map_pages: snapshot.page_count(self.map.file())?,
        })
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Occupied positions `>= position`, ascending, one batch
    pub fn ceiling_positions(&self, position: u64) -> Result<Vec<PhysicalPosition>> {
        let snapshot = self.manager.store().snapshot();
        let state = self.load_state(&snapshot)?;
        let batch = self.map.ceiling(&snapshot, position, state.positions_size)?;
        self.resolve_batch(&snapshot, batch)
    }

    /// Occupied positions `> position`, ascending, one batch
    pub fn higher_positions(&self, position: u64) -> Result<Vec<PhysicalPosition>> {
        match position.checked_add(1) {
            Some(next) => self.ceiling_positions(next),
            None => Ok(Vec::new()),
        }
    }

    /// Occupied positions `<= position`, nearest first, one batch
    pub fn floor_positions(&self, position: u64) -> Result<Vec<PhysicalPosition>> {
        let snapshot = self.manager.store().snapshot();
        let state = self.load_state(&snapshot)?;
        let batch = self.map.floor(&snapshot, position, state.positions_size)?;
        self.resolve_batch(&snapshot, batch)
    }

    /// Occupied positions `< position`, nearest first, one batch
    pub fn lower_positions(&self, position: u64) -> Result<Vec<PhysicalPosition>> {
        match position.checked_sub(1) {
            Some(previous) => self.floor_positions(previous),
            None => Ok(Vec::new()),
        }
    }

    /// Smallest occupied position
    pub fn first_position(&self) -> Result<Option<u64>> {
        let snapshot = self.manager.store().snapshot();
        let state = self.load_state(&snapshot)?;
        let batch = self.map.ceiling(&snapshot, 0, state.positions_size)?;
        Ok(batch.first().map(|(position, _)| *position))
    }

    /// Largest occupied position
    pub fn last_position(&self) -> Result<Option<u64>> {
        let snapshot = self.manager.store().snapshot();
        let state = self.load_state(&snapshot)?;
        let batch = self.map.floor(&snapshot, u64::MAX, state.positions_size)?;
        Ok(batch.first().map(|(position, _)| *position))
    }

    fn resolve_batch(
        &self,
        pages: &impl PageRead,
        batch: Vec<(u64, MapEntry)>,
    ) -> Result<Vec<PhysicalPosition>> {
        batch
            .into_iter()
            .map(|(position, entry)| self.head_position(pages, position, entry))
            .collect()
    }

    // =========================================================================
    // State Page
    // =========================================================================

    fn state_key(&self) -> PageKey {
        PageKey::new(self.data_file, STATE_PAGE_INDEX)
    }

    fn data_key(&self, page: PageIndex) -> PageKey {
        PageKey::new(self.data_file, page)
    }

    fn state(&self) -> Result<ClusterState> {
        let snapshot = self.manager.store().snapshot();
        self.load_state(&snapshot)
    }

    fn load_state(&self, pages: &impl PageRead) -> Result<ClusterState> {
        let page = pages.read_page(self.state_key())?;
        let view = ClusterStatePage::new(page.as_bytes());
        Ok(ClusterState {
            entries: view.entries(),
            positions_size: view.positions_size(),
            free_positions: view.free_positions(),
            lowest_free: view.lowest_free(),
        })
    }

    fn store_state(&self, op: &mut AtomicOperation<'_>, state: &ClusterState) -> Result<()> {
        let mut view = ClusterStatePage::new(op.page_mut(self.state_key())?.as_bytes_mut());
        view.set_entries(state.entries);
        view.set_positions_size(state.positions_size);
        view.set_free_positions(state.free_positions);
        view.set_lowest_free(state.lowest_free);
        Ok(())
    }

    // =========================================================================
    // Entry Chains
    // =========================================================================

    /// Write a payload as a chain of entries, last chunk first so every
    /// entry can point at its successor. Returns the head's location.
    fn write_chain(
        &self,
        op: &mut AtomicOperation<'_>,
        payload: &[u8],
        version: i32,
        record_type: u8,
    ) -> Result<(PageIndex, u16)> {
        let record_size = checked_record_size(payload)?;
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(MAX_RECORD_SIZE).collect()
        };

        let mut next = None;
        for (index, chunk) in chunks.iter().enumerate().rev() {
            let header = EntryHeader {
                head: index == 0,
                record_type,
                version,
                record_size,
                next,
            };
            next = Some(self.append_entry(op, &header, chunk)?);
        }
        next.ok_or_else(|| ClusterError::Storage("Record produced no entries".to_string()))
    }

    fn append_entry(
        &self,
        op: &mut AtomicOperation<'_>,
        header: &EntryHeader,
        chunk: &[u8],
    ) -> Result<(PageIndex, u16)> {
        let data_pages = op.page_count(self.data_file)?;
        let candidate =
            self.free_space
                .find_page(&*op, self.data_file, chunk.len(), data_pages)?;
        let page_index = match candidate {
            Some(page_index) => page_index,
            None => {
                let page_index = op.allocate_page(self.data_file)?;
                ClusterPage::new(op.page_mut(self.data_key(page_index))?.as_bytes_mut()).init();
                trace!(cluster = %self.name, page = page_index, "Data page added");
                page_index
            }
        };

        let (slot, free) = {
            let mut page = ClusterPage::new(op.page_mut(self.data_key(page_index))?.as_bytes_mut());
            let slot = page.append_entry(header, chunk).ok_or_else(|| {
                ClusterError::Corruption(format!(
                    "Page {} of {} cannot take a {} byte chunk its free space tier promised",
                    page_index,
                    self.name,
                    chunk.len()
                ))
            })?;
            (slot, page.max_entry_payload())
        };
        self.free_space.update(op, page_index, free)?;
        Ok((page_index, slot))
    }

    /// Release every entry of the chain starting at (page, slot)
    fn delete_chain(&self, op: &mut AtomicOperation<'_>, page: PageIndex, slot: u16) -> Result<()> {
        let mut next = Some((page, slot));
        let mut max_fragments = None;
        let mut fragments = 0usize;

        while let Some((page_index, slot)) = next {
            let free = {
                let mut view =
                    ClusterPage::new(op.page_mut(self.data_key(page_index))?.as_bytes_mut());
                let header = view
                    .entry(slot)
                    .ok_or_else(|| {
                        ClusterError::Corruption(format!(
                            "Broken record chain in {}: page {} slot {} is empty",
                            self.name, page_index, slot
                        ))
                    })?
                    .header;
                let limit = *max_fragments.get_or_insert(fragment_count(header.record_size));
                fragments += 1;
                if fragments > limit {
                    return Err(ClusterError::Corruption(format!(
                        "Record chain in {} is longer than {} fragments",
                        self.name, limit
                    )));
                }
                next = header.next;
                view.delete_entry(slot);
                view.max_entry_payload()
            };
            self.free_space.update(op, page_index, free)?;
        }
        Ok(())
    }

    fn read_chain(&self, pages: &impl PageRead, page: PageIndex, slot: u16) -> Result<RawBuffer> {
        let mut next = Some((page, slot));
        let mut buffer = Vec::new();
        let mut head: Option<EntryHeader> = None;

        while let Some((page_index, slot)) = next {
            let page = pages.read_page(self.data_key(page_index))?;
            let view = ClusterPage::new(page.as_bytes());
            let entry = view.entry(slot).ok_or_else(|| {
                ClusterError::Corruption(format!(
                    "Broken record chain in {}: page {} slot {} is empty",
                    self.name, page_index, slot
                ))
            })?;

            let expected = match &head {
                Some(first) => first.record_size as usize,
                None => {
                    if !entry.header.head {
                        return Err(ClusterError::Corruption(format!(
                            "Position map of {} points at a non-head entry (page {} slot {})",
                            self.name, page_index, slot
                        )));
                    }
                    buffer.reserve_exact(entry.header.record_size as usize);
                    head = Some(entry.header);
                    entry.header.record_size as usize
                }
            };
            if buffer.len() + entry.payload.len() > expected {
                return Err(ClusterError::Corruption(format!(
                    "Record chain in {} holds more than {} bytes",
                    self.name, expected
                )));
            }
            buffer.extend_from_slice(entry.payload);
            next = entry.header.next;
        }

        let head =
            head.ok_or_else(|| ClusterError::Corruption("Empty record chain".to_string()))?;
        if buffer.len() != head.record_size as usize {
            return Err(ClusterError::Corruption(format!(
                "Record in {} has {} bytes, header says {}",
                self.name,
                buffer.len(),
                head.record_size
            )));
        }
        Ok(RawBuffer {
            buffer,
            version: head.version,
            record_type: head.record_type,
        })
    }

    fn dangling(&self, position: u64, entry: MapEntry) -> ClusterError {
        ClusterError::Corruption(format!(
            "Position {} of {} points at empty slot {} on page {}",
            position, self.name, entry.slot, entry.page
        ))
    }
}

impl std::fmt::Debug for PaginatedCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedCluster")
            .field("name", &self.name)
            .field("data_file", &self.data_file)
            .field("map_file", &self.map.file())
            .field("free_space_file", &self.free_space.file())
            .finish()
    }
}

pub(crate) fn file_name(cluster: &str, extension: &str) -> String {
    format!("{}.{}", cluster, extension)
}

fn checked_record_size(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| ClusterError::RecordTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })
}

/// Entries needed for a record of `record_size` bytes
fn fragment_count(record_size: u32) -> usize {
    (record_size as usize).div_ceil(MAX_RECORD_SIZE).max(1)
}
