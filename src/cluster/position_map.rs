//! Position Map
//!
//! Maps a cluster position to the head entry of its record, page by page.
//! Bucket `k` is page `k` of the map file and covers positions
//! `k * ENTRIES_PER_BUCKET .. (k + 1) * ENTRIES_PER_BUCKET`.
//!
//! Free-position bookkeeping (count of REMOVED positions and a lower bound
//! for the smallest one) lives in the cluster state page, so it commits and
//! rolls back together with the map itself.

use tracing::trace;

use super::ClusterState;
use crate::atomic::{AtomicOperation, PageRead};
use crate::error::{ClusterError, Result};
use crate::page::{
    FileId, MapEntry, MapEntryStatus, PageIndex, PageKey, PositionMapBucket, ENTRIES_PER_BUCKET,
};

const BUCKET_LEN: u64 = ENTRIES_PER_BUCKET as u64;

pub(crate) struct PositionMap {
    file: FileId,
}

impl PositionMap {
    pub fn new(file: FileId) -> Self {
        Self { file }
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    fn locate(position: u64) -> Result<(PageIndex, usize)> {
        let bucket = PageIndex::try_from(position / BUCKET_LEN).map_err(|_| {
            ClusterError::Storage(format!("Position {} is beyond the map's range", position))
        })?;
        Ok((bucket, (position % BUCKET_LEN) as usize))
    }

    /// Entry of a position, `None` if it was never allocated
    pub fn get(&self, pages: &impl PageRead, position: u64) -> Result<Option<MapEntry>> {
        // beyond the addressable range, so never issued
        let Ok((bucket, index)) = Self::locate(position) else {
            return Ok(None);
        };
        if bucket >= pages.page_count(self.file)? {
            return Ok(None);
        }
        let page = pages.read_page(PageKey::new(self.file, bucket))?;
        let entry = PositionMapBucket::new(page.as_bytes()).get(index)?;
        Ok(match entry.status {
            MapEntryStatus::NotExisting => None,
            _ => Some(entry),
        })
    }

    /// Overwrite the entry of a position, growing the map if needed
    pub fn set(&self, op: &mut AtomicOperation<'_>, position: u64, entry: MapEntry) -> Result<()> {
        let (bucket, index) = Self::locate(position)?;
        while op.page_count(self.file)? <= bucket {
            let new_bucket = op.allocate_page(self.file)?;
            PositionMapBucket::new(op.page_mut(PageKey::new(self.file, new_bucket))?.as_bytes_mut())
                .init();
            trace!(bucket = new_bucket, "Position map bucket added");
        }
        PositionMapBucket::new(op.page_mut(PageKey::new(self.file, bucket))?.as_bytes_mut())
            .set(index, entry)
    }

    /// Reserve a position: the lowest REMOVED one if any, otherwise the
    /// high-water mark. The entry is left ALLOCATED.
    pub fn allocate(&self, op: &mut AtomicOperation<'_>, state: &mut ClusterState) -> Result<u64> {
        let position = if state.free_positions > 0 {
            let start = state.lowest_free.unwrap_or(0);
            let position = self
                .next_removed(&*op, start, state.positions_size)?
                .ok_or_else(|| {
                    ClusterError::Corruption(format!(
                        "{} free positions recorded but none found from {}",
                        state.free_positions, start
                    ))
                })?;
            state.free_positions -= 1;
            state.lowest_free = if state.free_positions > 0 {
                Some(position + 1)
            } else {
                None
            };
            position
        } else {
            let position = state.positions_size;
            state.positions_size += 1;
            position
        };

        self.set(op, position, MapEntry::allocated())?;
        Ok(position)
    }

    /// Mark a position REMOVED and make it available for reuse
    pub fn remove(
        &self,
        op: &mut AtomicOperation<'_>,
        state: &mut ClusterState,
        position: u64,
    ) -> Result<()> {
        self.set(op, position, MapEntry::removed())?;
        state.free_positions += 1;
        state.lowest_free = Some(match state.lowest_free {
            Some(lowest) => lowest.min(position),
            None => position,
        });
        Ok(())
    }

    /// First REMOVED position in `start..end`
    fn next_removed(&self, pages: &impl PageRead, start: u64, end: u64) -> Result<Option<u64>> {
        let buckets = pages.page_count(self.file)? as u64;
        let mut position = start;
        while position < end {
            let (bucket, first_index) = Self::locate(position)?;
            if bucket as u64 >= buckets {
                break;
            }
            let page = pages.read_page(PageKey::new(self.file, bucket))?;
            let view = PositionMapBucket::new(page.as_bytes());
            let base = bucket as u64 * BUCKET_LEN;
            for index in first_index..ENTRIES_PER_BUCKET {
                let candidate = base + index as u64;
                if candidate >= end {
                    return Ok(None);
                }
                if view.get(index)?.status == MapEntryStatus::Removed {
                    return Ok(Some(candidate));
                }
            }
            position = base + BUCKET_LEN;
        }
        Ok(None)
    }

    // =========================================================================
    // Ordered Scans
    // =========================================================================

    /// FILLED positions `>= from` from the first bucket that has any,
    /// ascending. Empty when there are none.
    pub fn ceiling(
        &self,
        pages: &impl PageRead,
        from: u64,
        positions_size: u64,
    ) -> Result<Vec<(u64, MapEntry)>> {
        if from >= positions_size {
            return Ok(Vec::new());
        }
        let buckets = pages.page_count(self.file)?;
        let (mut bucket, mut first_index) = Self::locate(from)?;

        while bucket < buckets {
            let page = pages.read_page(PageKey::new(self.file, bucket))?;
            let view = PositionMapBucket::new(page.as_bytes());
            if view.filled() > 0 {
                let base = bucket as u64 * BUCKET_LEN;
                let mut batch = Vec::new();
                for index in first_index..ENTRIES_PER_BUCKET {
                    let position = base + index as u64;
                    if position >= positions_size {
                        break;
                    }
                    let entry = view.get(index)?;
                    if entry.status == MapEntryStatus::Filled {
                        batch.push((position, entry));
                    }
                }
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
            bucket += 1;
            first_index = 0;
        }
        Ok(Vec::new())
    }

    /// FILLED positions `<= from` from the nearest bucket that has any,
    /// descending. Positions past the high-water mark are clamped.
    pub fn floor(
        &self,
        pages: &impl PageRead,
        from: u64,
        positions_size: u64,
    ) -> Result<Vec<(u64, MapEntry)>> {
        if positions_size == 0 {
            return Ok(Vec::new());
        }
        let from = from.min(positions_size - 1);
        let buckets = pages.page_count(self.file)?;
        let (mut bucket, mut last_index) = Self::locate(from)?;

        loop {
            if bucket < buckets {
                let page = pages.read_page(PageKey::new(self.file, bucket))?;
                let view = PositionMapBucket::new(page.as_bytes());
                if view.filled() > 0 {
                    let base = bucket as u64 * BUCKET_LEN;
                    let mut batch = Vec::new();
                    for index in (0..=last_index).rev() {
                        let entry = view.get(index)?;
                        if entry.status == MapEntryStatus::Filled {
                            batch.push((base + index as u64, entry));
                        }
                    }
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
            }
            if bucket == 0 {
                return Ok(Vec::new());
            }
            bucket -= 1;
            last_index = ENTRIES_PER_BUCKET - 1;
        }
    }
}
