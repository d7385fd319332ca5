//! Page Module
//!
//! Fixed-size pages, the unit of storage and of atomic-operation tracking.
//!
//! ## Common Page Header (16 bytes)
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────────────┐
//! │ CRC (4)  │ Kind (1) │ Reserved (3) │ Commit LSN (8)   │
//! └──────────┴──────────┴──────────────┴──────────────────┘
//! ```
//!
//! The CRC covers bytes `4..PAGE_SIZE` and is stamped when a page is written
//! to its data file. Every page kind lays its own header out after these
//! 16 bytes:
//!
//! - [`ClusterStatePage`]: page 0 of a cluster data file (counters)
//! - [`ClusterPage`]: slotted record entries
//! - [`PositionMapBucket`]: position → (page, slot) entries
//! - [`FreeSpaceMapPage`]: one free-space tier byte per data page

mod cluster_page;
mod free_space_page;
mod position_map_page;
mod state_page;

pub use cluster_page::{
    ClusterPage, EntryHeader, PageEntry, CLUSTER_PAGE_HEADER_SIZE, ENTRY_HEADER_SIZE,
    MAX_ENTRY_SIZE, MAX_RECORD_SIZE, SLOT_SIZE,
};
pub use free_space_page::{FreeSpaceMapPage, FreeSpaceTier, TIERS_PER_PAGE, TIER_GRANULARITY};
pub use position_map_page::{
    MapEntry, MapEntryStatus, PositionMapBucket, ENTRIES_PER_BUCKET, MAP_ENTRY_SIZE,
};
pub use state_page::{ClusterStatePage, STATE_PAGE_INDEX};

use crate::error::{ClusterError, Result};

// =============================================================================
// Shared Constants
// =============================================================================

/// Size of every page in every file (64 KiB)
pub const PAGE_SIZE: usize = 64 * 1024;

/// Size of the header shared by all page kinds
pub const PAGE_HEADER_SIZE: usize = 16;

const CRC_OFFSET: usize = 0;
const KIND_OFFSET: usize = 4;
const LSN_OFFSET: usize = 8;

/// Identifier of a file registered with the page store
pub type FileId = u32;

/// Index of a page inside its file
pub type PageIndex = u32;

/// Address of one page: file + index within that file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub file: FileId,
    pub index: PageIndex,
}

impl PageKey {
    pub fn new(file: FileId, index: PageIndex) -> Self {
        Self { file, index }
    }
}

/// Page kinds stored in the common header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    /// Freshly appended page, not yet initialized
    Unformatted = 0x00,
    ClusterState = 0x01,
    ClusterData = 0x02,
    PositionMap = 0x03,
    FreeSpaceMap = 0x04,
}

impl PageKind {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(PageKind::Unformatted),
            0x01 => Ok(PageKind::ClusterState),
            0x02 => Ok(PageKind::ClusterData),
            0x03 => Ok(PageKind::PositionMap),
            0x04 => Ok(PageKind::FreeSpaceMap),
            other => Err(ClusterError::Corruption(format!(
                "Unknown page kind: 0x{:02x}",
                other
            ))),
        }
    }
}

// =============================================================================
// Page Buffer
// =============================================================================

/// Owned, heap-allocated page image of exactly [`PAGE_SIZE`] bytes
#[derive(Clone, PartialEq, Eq)]
pub struct PageBuffer {
    data: Box<[u8]>,
}

impl PageBuffer {
    /// All-zero page (kind = Unformatted)
    pub fn zeroed() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// Wrap an existing image, rejecting anything that is not page sized
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(ClusterError::Corruption(format!(
                "Page image has {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn kind(&self) -> Result<PageKind> {
        PageKind::from_byte(self.data[KIND_OFFSET])
    }

    pub fn set_kind(&mut self, kind: PageKind) {
        self.data[KIND_OFFSET] = kind as u8;
    }

    /// LSN of the commit that last wrote this page
    pub fn lsn(&self) -> u64 {
        read_u64(&self.data, LSN_OFFSET)
    }

    pub fn set_lsn(&mut self, lsn: u64) {
        write_u64(&mut self.data, LSN_OFFSET, lsn);
    }

    /// CRC32 over everything but the checksum field itself
    pub fn compute_checksum(&self) -> u32 {
        crc32fast::hash(&self.data[CRC_OFFSET + 4..])
    }

    pub fn stored_checksum(&self) -> u32 {
        read_u32(&self.data, CRC_OFFSET)
    }

    /// Stamp the checksum before the page goes to disk
    pub fn stamp_checksum(&mut self) {
        let crc = self.compute_checksum();
        write_u32(&mut self.data, CRC_OFFSET, crc);
    }

    pub fn verify_checksum(&self) -> bool {
        self.stored_checksum() == self.compute_checksum()
    }

    /// Expect a given kind, turning a mismatch into a corruption error
    pub fn expect_kind(&self, expected: PageKind, key: PageKey) -> Result<()> {
        let kind = self.kind()?;
        if kind != expected {
            return Err(ClusterError::Corruption(format!(
                "Page {}:{} has kind {:?}, expected {:?}",
                key.file, key.index, kind, expected
            )));
        }
        Ok(())
    }
}

impl AsRef<[u8]> for PageBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for PageBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuffer")
            .field("kind", &self.data[KIND_OFFSET])
            .field("lsn", &self.lsn())
            .finish()
    }
}

// =============================================================================
// Little-endian field helpers (used by every page view)
// =============================================================================

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_i32(buf: &[u8], offset: usize) -> i32 {
    read_u32(buf, offset) as i32
}

pub(crate) fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    write_u32(buf, offset, value as u32);
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
