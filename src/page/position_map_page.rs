//! Position map bucket page
//!
//! The position map file is an array of buckets, bucket `k` living in page
//! `k`. Position `p` maps to bucket `p / ENTRIES_PER_BUCKET`, entry
//! `p % ENTRIES_PER_BUCKET`.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Common header (16)                           │
//! │ Filled u32 | Reserved u32                    │
//! ├──────────────────────────────────────────────┤
//! │ MapEntry[ENTRIES_PER_BUCKET]                 │
//! │   Status u8 | Reserved u8 | Slot u16 | Page u32
//! └──────────────────────────────────────────────┘
//! ```

use super::{read_u16, read_u32, write_u16, write_u32, PageIndex, PageKind, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::error::{ClusterError, Result};

const FILLED_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = PAGE_HEADER_SIZE + 8;

/// Size of one map entry
pub const MAP_ENTRY_SIZE: usize = 8;

/// Number of positions covered by one bucket page
pub const ENTRIES_PER_BUCKET: usize = (PAGE_SIZE - ENTRIES_OFFSET) / MAP_ENTRY_SIZE;

/// Lifecycle state of a cluster position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MapEntryStatus {
    /// Never used (beyond the high-water mark or in an unformatted bucket)
    NotExisting = 0,
    /// Reserved by `allocate_position`, no record yet
    Allocated = 1,
    /// Points at the head entry of a live record
    Filled = 2,
    /// Record was deleted, position may be reused
    Removed = 3,
}

impl MapEntryStatus {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MapEntryStatus::NotExisting),
            1 => Ok(MapEntryStatus::Allocated),
            2 => Ok(MapEntryStatus::Filled),
            3 => Ok(MapEntryStatus::Removed),
            other => Err(ClusterError::Corruption(format!(
                "Unknown position map status: {}",
                other
            ))),
        }
    }
}

/// One position map entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub status: MapEntryStatus,
    pub page: PageIndex,
    pub slot: u16,
}

impl MapEntry {
    pub fn allocated() -> Self {
        Self {
            status: MapEntryStatus::Allocated,
            page: 0,
            slot: 0,
        }
    }

    pub fn filled(page: PageIndex, slot: u16) -> Self {
        Self {
            status: MapEntryStatus::Filled,
            page,
            slot,
        }
    }

    pub fn removed() -> Self {
        Self {
            status: MapEntryStatus::Removed,
            page: 0,
            slot: 0,
        }
    }
}

/// View over one position map bucket
pub struct PositionMapBucket<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> PositionMapBucket<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Number of FILLED entries in this bucket
    pub fn filled(&self) -> u32 {
        read_u32(self.buf.as_ref(), FILLED_OFFSET)
    }

    pub fn get(&self, index: usize) -> Result<MapEntry> {
        let at = entry_offset(index)?;
        let data = self.buf.as_ref();
        Ok(MapEntry {
            status: MapEntryStatus::from_byte(data[at])?,
            slot: read_u16(data, at + 2),
            page: read_u32(data, at + 4),
        })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> PositionMapBucket<B> {
    pub fn init(&mut self) {
        let data = self.buf.as_mut();
        data[PAGE_HEADER_SIZE..].fill(0);
        data[4] = PageKind::PositionMap as u8;
    }

    /// Overwrite an entry, keeping the filled counter in step
    pub fn set(&mut self, index: usize, entry: MapEntry) -> Result<()> {
        let at = entry_offset(index)?;
        let was_filled = self.get(index)?.status == MapEntryStatus::Filled;
        let now_filled = entry.status == MapEntryStatus::Filled;

        let data = self.buf.as_mut();
        data[at] = entry.status as u8;
        data[at + 1] = 0;
        write_u16(data, at + 2, entry.slot);
        write_u32(data, at + 4, entry.page);

        let filled = read_u32(data, FILLED_OFFSET);
        match (was_filled, now_filled) {
            (false, true) => write_u32(data, FILLED_OFFSET, filled + 1),
            (true, false) => write_u32(data, FILLED_OFFSET, filled.saturating_sub(1)),
            _ => {}
        }
        Ok(())
    }
}

fn entry_offset(index: usize) -> Result<usize> {
    if index >= ENTRIES_PER_BUCKET {
        return Err(ClusterError::Storage(format!(
            "Bucket entry index {} out of range",
            index
        )));
    }
    Ok(ENTRIES_OFFSET + index * MAP_ENTRY_SIZE)
}
