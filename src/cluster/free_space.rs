//! Free Space Map
//!
//! Finds a data page with room for a new entry without touching the data
//! pages themselves. Tiers are refreshed after every change to a data page.

use tracing::trace;

use crate::atomic::{AtomicOperation, PageRead};
use crate::error::Result;
use crate::page::{
    ClusterPage, FileId, FreeSpaceMapPage, FreeSpaceTier, PageIndex, PageKey, STATE_PAGE_INDEX,
    TIERS_PER_PAGE,
};

pub(crate) struct FreeSpaceMap {
    file: FileId,
}

impl FreeSpaceMap {
    pub fn new(file: FileId) -> Self {
        Self { file }
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    /// Lowest data page of `data_file` with room for `required` payload bytes.
    ///
    /// The top tier is open-ended, so requests beyond what it guarantees
    /// are confirmed against the candidate page itself. `None` when no
    /// existing page qualifies; the caller then appends a page.
    pub fn find_page(
        &self,
        pages: &impl PageRead,
        data_file: FileId,
        required: usize,
        data_pages: u32,
    ) -> Result<Option<PageIndex>> {
        // tier 0 cannot promise room for even an empty chunk
        let (min, confirm) = match FreeSpaceTier::required_for(required.max(1)) {
            Some(min) => (min, false),
            None => (FreeSpaceTier::TOP, true),
        };

        let fsm_pages = pages.page_count(self.file)?;
        for fsm_index in 0..fsm_pages {
            let first = fsm_index as usize * TIERS_PER_PAGE;
            if first >= data_pages as usize {
                break;
            }
            let limit = (data_pages as usize - first).min(TIERS_PER_PAGE);
            let mut from = if fsm_index == 0 {
                STATE_PAGE_INDEX as usize + 1
            } else {
                0
            };

            let page = pages.read_page(PageKey::new(self.file, fsm_index))?;
            let view = FreeSpaceMapPage::new(page.as_bytes());
            while let Some(index) = view.find_at_least(min, from, limit) {
                let data_page = (first + index) as PageIndex;
                if !confirm {
                    return Ok(Some(data_page));
                }
                let candidate = pages.read_page(PageKey::new(data_file, data_page))?;
                if ClusterPage::new(candidate.as_bytes()).max_entry_payload() >= required {
                    return Ok(Some(data_page));
                }
                from = index + 1;
            }
        }
        Ok(None)
    }

    /// Record the payload room left on a data page
    pub fn update(
        &self,
        op: &mut AtomicOperation<'_>,
        data_page: PageIndex,
        free_bytes: usize,
    ) -> Result<()> {
        let fsm_index = data_page as usize / TIERS_PER_PAGE;
        while op.page_count(self.file)? as usize <= fsm_index {
            let index = op.allocate_page(self.file)?;
            FreeSpaceMapPage::new(op.page_mut(PageKey::new(self.file, index))?.as_bytes_mut())
                .init();
        }

        let tier = FreeSpaceTier::from_free_bytes(free_bytes);
        let key = PageKey::new(self.file, fsm_index as PageIndex);
        FreeSpaceMapPage::new(op.page_mut(key)?.as_bytes_mut())
            .set_tier(data_page as usize % TIERS_PER_PAGE, tier);
        trace!(data_page, free_bytes, tier = tier.0, "Free space updated");
        Ok(())
    }
}
