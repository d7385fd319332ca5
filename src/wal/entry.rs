//! WAL Entry definitions
//!
//! One entry per committed atomic operation. The entry carries the full
//! after-image of every page the operation changed, so replay is a plain
//! overwrite and is idempotent.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

/// Size of the frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// What was committed
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Page images written by one atomic operation
    Commit {
        operation_id: u64,
        label: String,
        pages: Vec<PageImage>,
    },
}

/// After-image of one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// File name relative to the data directory
    pub file: String,
    pub index: u32,
    pub data: Vec<u8>,
}

impl Operation {
    pub fn page_count(&self) -> usize {
        match self {
            Operation::Commit { pages, .. } => pages.len(),
        }
    }
}

impl WalEntry {
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        bincode::serialize(&(&self.operation, self.timestamp))
            .map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    /// CRC32 over the LSN and the encoded body
    pub fn compute_crc(&self) -> Result<u32> {
        let body = self.encode_body()?;
        Ok(frame_crc(self.lsn, &body))
    }

    pub fn serialized_size(&self) -> Result<usize> {
        Ok(HEADER_SIZE + self.encode_body()?.len())
    }

    /// Encode as `[LSN u64][CRC u32][Len u32][Data]`, little-endian
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = self.encode_body()?;
        let len = u32::try_from(body.len()).map_err(|_| {
            ClusterError::WalWrite(format!("Entry of {} bytes is too large", body.len()))
        })?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&frame_crc(self.lsn, &body).to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one framed entry, verifying its CRC
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (lsn, crc, len) = parse_header(bytes)?;
        let body = bytes
            .get(HEADER_SIZE..HEADER_SIZE + len)
            .ok_or_else(|| {
                ClusterError::WalCorruption(format!(
                    "Entry needs {} data bytes, buffer has {}",
                    len,
                    bytes.len().saturating_sub(HEADER_SIZE)
                ))
            })?;
        Self::from_parts(lsn, crc, body)
    }

    /// Build an entry from an already split frame
    pub(crate) fn from_parts(lsn: u64, crc: u32, body: &[u8]) -> Result<Self> {
        let actual = frame_crc(lsn, body);
        if actual != crc {
            return Err(ClusterError::WalCorruption(format!(
                "CRC mismatch at LSN {}: stored 0x{:08x}, computed 0x{:08x}",
                lsn, crc, actual
            )));
        }
        let (operation, timestamp): (Operation, u64) = bincode::deserialize(body)
            .map_err(|e| ClusterError::WalCorruption(e.to_string()))?;
        Ok(Self {
            lsn,
            operation,
            timestamp,
        })
    }
}

/// Split a frame header into (lsn, crc, data length)
pub(crate) fn parse_header(bytes: &[u8]) -> Result<(u64, u32, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(ClusterError::WalCorruption(format!(
            "Header needs {} bytes, buffer has {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }
    let mut lsn = [0u8; 8];
    lsn.copy_from_slice(&bytes[0..8]);
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&bytes[8..12]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[12..16]);
    Ok((
        u64::from_le_bytes(lsn),
        u32::from_le_bytes(crc),
        u32::from_le_bytes(len) as usize,
    ))
}

fn frame_crc(lsn: u64, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(body);
    hasher.finalize()
}
