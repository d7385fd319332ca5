//! Cluster data page
//!
//! Slotted page holding record entries. An entry is either a whole record
//! or one fragment of a record chain spread across several pages.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Common header (16)                                      │
//! │ SlotCount u16 | LiveEntries u16 | FreeEnd u32           │
//! │ FreeSpace u32 | Reserved u32                            │
//! ├─────────────────────────────────────────────────────────┤
//! │ Slot array, grows down: [Offset u32][Length u32] ...    │
//! │   (Offset = 0 marks an empty, reusable slot)            │
//! ├─────────────────────────────────────────────────────────┤
//! │ Free space                                              │
//! ├─────────────────────────────────────────────────────────┤
//! │ Entry data, grows up from the end of the page:          │
//! │   [EntryHeader (16)][Payload chunk]                     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Entry Header (16 bytes)
//! ```text
//! Flags u8 | RecordType u8 | NextSlot u16 | Version i32 | NextPage u32 | RecordSize u32
//! ```

use super::{
    read_i32, read_u16, read_u32, write_i32, write_u16, write_u32, PageIndex, PageKind,
    PAGE_HEADER_SIZE, PAGE_SIZE,
};

// =============================================================================
// Layout Constants
// =============================================================================

const SLOT_COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const LIVE_ENTRIES_OFFSET: usize = PAGE_HEADER_SIZE + 2;
const FREE_END_OFFSET: usize = PAGE_HEADER_SIZE + 4;
const FREE_SPACE_OFFSET: usize = PAGE_HEADER_SIZE + 8;

/// Common header + cluster page header
pub const CLUSTER_PAGE_HEADER_SIZE: usize = PAGE_HEADER_SIZE + 16;

/// Size of one slot: offset (4) + length (4)
pub const SLOT_SIZE: usize = 8;

/// Size of the header in front of every entry
pub const ENTRY_HEADER_SIZE: usize = 16;

/// Largest entry (header + chunk) a single empty page can hold
pub const MAX_ENTRY_SIZE: usize = PAGE_SIZE - CLUSTER_PAGE_HEADER_SIZE - SLOT_SIZE;

/// Largest payload stored as a single entry. Bigger payloads are split into
/// chunks of exactly this size plus a remainder.
pub const MAX_RECORD_SIZE: usize = MAX_ENTRY_SIZE - ENTRY_HEADER_SIZE;

const NO_NEXT_PAGE: u32 = u32::MAX;
const HEAD_FLAG: u8 = 0x01;

// =============================================================================
// Entry Header
// =============================================================================

/// Metadata stored in front of every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// First fragment of the record (the one the position map points at)
    pub head: bool,
    pub record_type: u8,
    pub version: i32,
    /// Size of the whole logical record, not of this fragment
    pub record_size: u32,
    /// Location of the next fragment, `None` on the last one
    pub next: Option<(PageIndex, u16)>,
}

impl EntryHeader {
    fn encode(&self, out: &mut [u8]) {
        out[0] = if self.head { HEAD_FLAG } else { 0 };
        out[1] = self.record_type;
        let (next_page, next_slot) = self.next.unwrap_or((NO_NEXT_PAGE, 0));
        write_u16(out, 2, next_slot);
        write_i32(out, 4, self.version);
        write_u32(out, 8, next_page);
        write_u32(out, 12, self.record_size);
    }

    fn decode(buf: &[u8]) -> Self {
        let next_page = read_u32(buf, 8);
        let next = if next_page == NO_NEXT_PAGE {
            None
        } else {
            Some((next_page, read_u16(buf, 2)))
        };
        Self {
            head: buf[0] & HEAD_FLAG != 0,
            record_type: buf[1],
            version: read_i32(buf, 4),
            record_size: read_u32(buf, 12),
            next,
        }
    }
}

/// A decoded entry borrowed from a page
#[derive(Debug, Clone, Copy)]
pub struct PageEntry<'a> {
    pub header: EntryHeader,
    pub payload: &'a [u8],
}

// =============================================================================
// Cluster Page View
// =============================================================================

/// View over a page buffer formatted as a cluster data page
pub struct ClusterPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> ClusterPage<B> {
    pub fn new(buf: B) -> Self {
        debug_assert_eq!(buf.as_ref().len(), PAGE_SIZE);
        Self { buf }
    }

    fn data(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn slot_count(&self) -> u16 {
        read_u16(self.data(), SLOT_COUNT_OFFSET)
    }

    pub fn live_entries(&self) -> u16 {
        read_u16(self.data(), LIVE_ENTRIES_OFFSET)
    }

    pub fn is_empty(&self) -> bool {
        self.live_entries() == 0
    }

    /// Total reclaimable bytes, holes included
    pub fn free_space(&self) -> usize {
        read_u32(self.data(), FREE_SPACE_OFFSET) as usize
    }

    fn free_end(&self) -> usize {
        read_u32(self.data(), FREE_END_OFFSET) as usize
    }

    fn slot_array_end(&self) -> usize {
        CLUSTER_PAGE_HEADER_SIZE + self.slot_count() as usize * SLOT_SIZE
    }

    fn contiguous_free(&self) -> usize {
        self.free_end().saturating_sub(self.slot_array_end())
    }

    /// (offset, length) of a live slot
    fn slot(&self, slot: u16) -> Option<(usize, usize)> {
        if slot >= self.slot_count() {
            return None;
        }
        let at = CLUSTER_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE;
        let offset = read_u32(self.data(), at) as usize;
        if offset == 0 {
            return None;
        }
        Some((offset, read_u32(self.data(), at + 4) as usize))
    }

    fn find_empty_slot(&self) -> Option<u16> {
        (0..self.slot_count()).find(|&slot| self.slot(slot).is_none())
    }

    /// Largest payload chunk `append_entry` would accept right now
    pub fn max_entry_payload(&self) -> usize {
        let slot_cost = if self.find_empty_slot().is_some() {
            0
        } else {
            SLOT_SIZE
        };
        self.free_space()
            .saturating_sub(slot_cost + ENTRY_HEADER_SIZE)
    }

    /// Read the entry stored in a slot. `None` for empty or malformed slots.
    pub fn entry(&self, slot: u16) -> Option<PageEntry<'_>> {
        let (offset, len) = self.slot(slot)?;
        if len < ENTRY_HEADER_SIZE || offset + len > PAGE_SIZE {
            return None;
        }
        let data = self.data();
        Some(PageEntry {
            header: EntryHeader::decode(&data[offset..offset + ENTRY_HEADER_SIZE]),
            payload: &data[offset + ENTRY_HEADER_SIZE..offset + len],
        })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ClusterPage<B> {
    fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    /// Format the buffer as an empty cluster page
    pub fn init(&mut self) {
        let data = self.data_mut();
        data[PAGE_HEADER_SIZE..].fill(0);
        data[4] = PageKind::ClusterData as u8;
        self.reset();
    }

    fn reset(&mut self) {
        let data = self.data_mut();
        write_u16(data, SLOT_COUNT_OFFSET, 0);
        write_u16(data, LIVE_ENTRIES_OFFSET, 0);
        write_u32(data, FREE_END_OFFSET, PAGE_SIZE as u32);
        write_u32(
            data,
            FREE_SPACE_OFFSET,
            (PAGE_SIZE - CLUSTER_PAGE_HEADER_SIZE) as u32,
        );
    }

    fn set_slot(&mut self, slot: u16, offset: usize, len: usize) {
        let at = CLUSTER_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE;
        let data = self.data_mut();
        write_u32(data, at, offset as u32);
        write_u32(data, at + 4, len as u32);
    }

    fn set_free_space(&mut self, value: usize) {
        write_u32(self.data_mut(), FREE_SPACE_OFFSET, value as u32);
    }

    fn set_free_end(&mut self, value: usize) {
        write_u32(self.data_mut(), FREE_END_OFFSET, value as u32);
    }

    fn set_slot_count(&mut self, value: u16) {
        write_u16(self.data_mut(), SLOT_COUNT_OFFSET, value);
    }

    fn set_live_entries(&mut self, value: u16) {
        write_u16(self.data_mut(), LIVE_ENTRIES_OFFSET, value);
    }

    /// Append an entry, reusing an empty slot when one exists.
    ///
    /// Returns the slot, or `None` when the page cannot hold the entry.
    /// Defragments first if the free space is there but not contiguous.
    pub fn append_entry(&mut self, header: &EntryHeader, payload: &[u8]) -> Option<u16> {
        let entry_len = ENTRY_HEADER_SIZE + payload.len();
        if entry_len > MAX_ENTRY_SIZE {
            return None;
        }

        let reused = self.find_empty_slot();
        let slot_cost = if reused.is_some() { 0 } else { SLOT_SIZE };
        let required = entry_len + slot_cost;
        if self.free_space() < required {
            return None;
        }
        if self.contiguous_free() < required {
            self.defragment();
        }

        let slot = match reused {
            Some(slot) => slot,
            None => {
                let slot = self.slot_count();
                self.set_slot_count(slot + 1);
                slot
            }
        };

        let offset = self.free_end() - entry_len;
        {
            let data = self.data_mut();
            header.encode(&mut data[offset..offset + ENTRY_HEADER_SIZE]);
            data[offset + ENTRY_HEADER_SIZE..offset + entry_len].copy_from_slice(payload);
        }
        self.set_slot(slot, offset, entry_len);
        self.set_free_end(offset);
        self.set_free_space(self.free_space() - required);
        self.set_live_entries(self.live_entries() + 1);

        Some(slot)
    }

    /// Remove an entry and reclaim its space.
    ///
    /// Returns the number of entry bytes released, `None` if the slot was empty.
    pub fn delete_entry(&mut self, slot: u16) -> Option<usize> {
        let (offset, len) = self.slot(slot)?;

        self.set_slot(slot, 0, 0);
        self.set_free_space(self.free_space() + len);
        self.set_live_entries(self.live_entries() - 1);
        if offset == self.free_end() {
            self.set_free_end(offset + len);
        }

        if self.live_entries() == 0 {
            self.reset();
            return Some(len);
        }

        // Trailing empty slots give their bytes back to the free area
        let mut count = self.slot_count();
        while count > 0 && self.slot(count - 1).is_none() {
            count -= 1;
            self.set_free_space(self.free_space() + SLOT_SIZE);
        }
        self.set_slot_count(count);

        Some(len)
    }

    /// Pack all live entries against the end of the page.
    /// Slot numbers are preserved.
    pub fn defragment(&mut self) {
        let mut live: Vec<(u16, usize, usize)> = (0..self.slot_count())
            .filter_map(|slot| self.slot(slot).map(|(offset, len)| (slot, offset, len)))
            .collect();
        live.sort_by(|a, b| b.1.cmp(&a.1));

        let snapshot = self.data().to_vec();
        let mut end = PAGE_SIZE;
        for (slot, offset, len) in live {
            end -= len;
            self.data_mut()[end..end + len].copy_from_slice(&snapshot[offset..offset + len]);
            self.set_slot(slot, end, len);
        }
        self.set_free_end(end);
    }
}
