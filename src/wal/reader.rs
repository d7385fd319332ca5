//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use super::entry::{parse_header, HEADER_SIZE};
use super::WalEntry;
use crate::error::{ClusterError, Result};

/// Outcome of reading one frame
pub(crate) enum Frame {
    Entry(WalEntry),
    /// Clean end of file
    End,
    /// File ends in the middle of a frame (partial write)
    Torn,
    /// Frame is complete but fails its CRC or does not decode
    Corrupt(String),
}

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Byte offset just past the last frame returned
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next entry from the WAL.
    ///
    /// `Ok(None)` at a clean end of file, an error on a torn or corrupt frame.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.read_frame()? {
            Frame::Entry(entry) => Ok(Some(entry)),
            Frame::End => Ok(None),
            Frame::Torn => Err(ClusterError::WalCorruption(format!(
                "Partial entry at offset {}",
                self.position
            ))),
            Frame::Corrupt(reason) => Err(ClusterError::WalCorruption(reason)),
        }
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    pub(crate) fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        match read_fully(&mut self.reader, &mut header)? {
            0 => return Ok(Frame::End),
            n if n < HEADER_SIZE => return Ok(Frame::Torn),
            _ => {}
        }

        let (lsn, crc, len) = parse_header(&header)?;
        // a garbage length must not turn into a huge allocation
        if self.position + (HEADER_SIZE + len) as u64 > self.file_len {
            return Ok(Frame::Torn);
        }
        let mut body = vec![0u8; len];
        if read_fully(&mut self.reader, &mut body)? < len {
            return Ok(Frame::Torn);
        }

        match WalEntry::from_parts(lsn, crc, &body) {
            Ok(entry) => {
                self.position += (HEADER_SIZE + len) as u64;
                Ok(Frame::Entry(entry))
            }
            Err(ClusterError::WalCorruption(reason)) => Ok(Frame::Corrupt(reason)),
            Err(e) => Err(e),
        }
    }
}

/// Fill `buf` as far as the file allows, returning the bytes read
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Iterator over WAL entries. Stops after the first error.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
