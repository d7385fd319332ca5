//! Free space map page
//!
//! One byte per cluster data page, holding its free space rounded down to
//! [`TIER_GRANULARITY`]. Data page `n` is tracked by FSM page
//! `n / TIERS_PER_PAGE`, byte `n % TIERS_PER_PAGE`.

use super::{PageKind, PAGE_HEADER_SIZE, PAGE_SIZE};

/// Bytes of free space represented by one tier step
pub const TIER_GRANULARITY: usize = 256;

/// Number of data pages tracked by one FSM page
pub const TIERS_PER_PAGE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Free space of a data page, quantized
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FreeSpaceTier(pub u8);

impl FreeSpaceTier {
    pub const TOP: Self = Self(u8::MAX);

    /// Tier for a page that has `free_bytes` available (rounded down)
    pub fn from_free_bytes(free_bytes: usize) -> Self {
        Self((free_bytes / TIER_GRANULARITY).min(u8::MAX as usize) as u8)
    }

    /// Lowest tier guaranteeing `required` bytes (rounded up).
    /// `None` when no tier can promise that much.
    pub fn required_for(required: usize) -> Option<Self> {
        let tier = required.div_ceil(TIER_GRANULARITY);
        if tier > u8::MAX as usize {
            None
        } else {
            Some(Self(tier as u8))
        }
    }
}

/// View over one FSM page
pub struct FreeSpaceMapPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> FreeSpaceMapPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn tier(&self, index: usize) -> FreeSpaceTier {
        FreeSpaceTier(self.buf.as_ref()[PAGE_HEADER_SIZE + index])
    }

    /// First index in `from..limit` whose tier is at least `min`
    pub fn find_at_least(&self, min: FreeSpaceTier, from: usize, limit: usize) -> Option<usize> {
        let limit = limit.min(TIERS_PER_PAGE);
        if from >= limit {
            return None;
        }
        self.buf.as_ref()[PAGE_HEADER_SIZE + from..PAGE_HEADER_SIZE + limit]
            .iter()
            .position(|&tier| tier >= min.0)
            .map(|offset| from + offset)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> FreeSpaceMapPage<B> {
    pub fn init(&mut self) {
        let data = self.buf.as_mut();
        data[PAGE_HEADER_SIZE..].fill(0);
        data[4] = PageKind::FreeSpaceMap as u8;
    }

    pub fn set_tier(&mut self, index: usize, tier: FreeSpaceTier) {
        self.buf.as_mut()[PAGE_HEADER_SIZE + index] = tier.0;
    }
}
