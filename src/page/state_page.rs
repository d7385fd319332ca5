//! Cluster state page
//!
//! Page 0 of every cluster data file. Holds the counters that describe the
//! cluster as a whole.
//!
//! ```text
//! Offset  Field
//! 16      Magic u32 ("ACLS")
//! 20      Format version u16
//! 24      Entries u64           (positions in FILLED state)
//! 32      Positions size u64    (next never-used position)
//! 40      Free positions u64    (positions in REMOVED state)
//! 48      Lowest free u64       (hint, u64::MAX when unknown/none)
//! ```

use super::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, PageIndex, PageKind};
use crate::error::{ClusterError, Result};

/// Index of the state page in the data file
pub const STATE_PAGE_INDEX: PageIndex = 0;

const MAGIC: u32 = 0x4143_4C53;
const FORMAT_VERSION: u16 = 1;

const MAGIC_OFFSET: usize = 16;
const FORMAT_OFFSET: usize = 20;
const ENTRIES_OFFSET: usize = 24;
const POSITIONS_SIZE_OFFSET: usize = 32;
const FREE_POSITIONS_OFFSET: usize = 40;
const LOWEST_FREE_OFFSET: usize = 48;

const NO_FREE_POSITION: u64 = u64::MAX;

/// View over the cluster state page
pub struct ClusterStatePage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> ClusterStatePage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Check magic and format version of a loaded state page
    pub fn validate(&self) -> Result<()> {
        let data = self.buf.as_ref();
        let magic = read_u32(data, MAGIC_OFFSET);
        if magic != MAGIC {
            return Err(ClusterError::Corruption(format!(
                "Bad cluster state magic: 0x{:08x}",
                magic
            )));
        }
        let version = read_u16(data, FORMAT_OFFSET);
        if version != FORMAT_VERSION {
            return Err(ClusterError::Corruption(format!(
                "Unsupported cluster format version: {}",
                version
            )));
        }
        Ok(())
    }

    pub fn entries(&self) -> u64 {
        read_u64(self.buf.as_ref(), ENTRIES_OFFSET)
    }

    pub fn positions_size(&self) -> u64 {
        read_u64(self.buf.as_ref(), POSITIONS_SIZE_OFFSET)
    }

    pub fn free_positions(&self) -> u64 {
        read_u64(self.buf.as_ref(), FREE_POSITIONS_OFFSET)
    }

    /// Lower bound for the smallest REMOVED position, if any is known
    pub fn lowest_free(&self) -> Option<u64> {
        match read_u64(self.buf.as_ref(), LOWEST_FREE_OFFSET) {
            NO_FREE_POSITION => None,
            position => Some(position),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ClusterStatePage<B> {
    /// Format as the state page of an empty cluster
    pub fn init(&mut self) {
        let data = self.buf.as_mut();
        data[4] = PageKind::ClusterState as u8;
        write_u32(data, MAGIC_OFFSET, MAGIC);
        write_u16(data, FORMAT_OFFSET, FORMAT_VERSION);
        write_u64(data, ENTRIES_OFFSET, 0);
        write_u64(data, POSITIONS_SIZE_OFFSET, 0);
        write_u64(data, FREE_POSITIONS_OFFSET, 0);
        write_u64(data, LOWEST_FREE_OFFSET, NO_FREE_POSITION);
    }

    pub fn set_entries(&mut self, value: u64) {
        write_u64(self.buf.as_mut(), ENTRIES_OFFSET, value);
    }

    pub fn set_positions_size(&mut self, value: u64) {
        write_u64(self.buf.as_mut(), POSITIONS_SIZE_OFFSET, value);
    }

    pub fn set_free_positions(&mut self, value: u64) {
        write_u64(self.buf.as_mut(), FREE_POSITIONS_OFFSET, value);
    }

    pub fn set_lowest_free(&mut self, value: Option<u64>) {
        write_u64(
            self.buf.as_mut(),
            LOWEST_FREE_OFFSET,
            value.unwrap_or(NO_FREE_POSITION),
        );
    }
}
