//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::reader::{Frame, WalReader};
use super::{Operation, WalEntry};
use crate::config::WalSyncStrategy;
use crate::error::{ClusterError, Result};

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// LSN the next append will receive
    current_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    uncommitted: usize,
    /// Bytes in the file, including buffered ones
    size: u64,
}

impl WalWriter {
    /// Open or create a WAL file.
    ///
    /// Existing valid entries are kept and LSNs continue after the last one.
    /// Anything after the last valid frame is cut off.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let (last_lsn, valid_len) = if path.exists() {
            scan_tail(path)?
        } else {
            (0, 0)
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(path = %path.display(), last_lsn, size = valid_len, "WAL opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            current_lsn: last_lsn + 1,
            sync_strategy,
            uncommitted: 0,
            size: valid_len,
        })
    }

    /// Append an entry to the WAL, returning its LSN
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let lsn = self.current_lsn;
        let bytes = WalEntry::new(lsn, operation).serialize()?;

        self.writer
            .write_all(&bytes)
            .map_err(|e| ClusterError::WalWrite(e.to_string()))?;
        self.current_lsn += 1;
        self.size += bytes.len() as u64;
        self.uncommitted += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if should_sync {
            self.sync()?;
        } else {
            self.writer
                .flush()
                .map_err(|e| ClusterError::WalWrite(e.to_string()))?;
        }

        trace!(lsn, bytes = bytes.len(), "WAL append");
        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| ClusterError::WalWrite(e.to_string()))?;
        self.writer.get_ref().sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Drop every entry and restart LSNs at 1.
    /// Only safe once all logged pages are durable in their data files.
    pub fn truncate(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| ClusterError::WalWrite(e.to_string()))?;
        let file = self.writer.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;

        self.current_lsn = 1;
        self.uncommitted = 0;
        self.size = 0;
        debug!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Get the current LSN (the one the next append receives)
    pub fn current_lsn(&self) -> u64 {
        self.current_lsn
    }

    /// Entries appended but not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Current size of the log in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size
    }
}

/// Last valid LSN and the length of the valid prefix
fn scan_tail(path: &Path) -> Result<(u64, u64)> {
    let mut reader = WalReader::open(path)?;
    let mut last_lsn = 0;
    while let Frame::Entry(entry) = reader.read_frame()? {
        last_lsn = entry.lsn;
    }
    Ok((last_lsn, reader.position()))
}
