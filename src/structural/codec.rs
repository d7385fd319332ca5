//! Structural operation codec
//!
//! Encoding and decoding of structural operations.
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use super::{NodeIdentity, RequestType, StructuralOperation};
use crate::error::{ClusterError, Result};

/// Header size: 1 byte request type + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (1 MB); identities are small
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

// =============================================================================
// Encoding
// =============================================================================

/// Encode an operation to bytes
///
/// Format: request_type (1) + payload_len (4) + payload
pub fn encode_operation(operation: &StructuralOperation) -> Result<Vec<u8>> {
    let mut payload = BytesMut::new();
    match operation {
        StructuralOperation::NodeJoin { identity } | StructuralOperation::NodeLeave { identity } => {
            put_identity(&mut payload, identity)?;
        }
    }

    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    message.put_u8(operation.request_type() as u8);
    message.put_u32(payload.len() as u32);
    message.put_slice(&payload);
    Ok(message.to_vec())
}

fn put_identity(buf: &mut BytesMut, identity: &NodeIdentity) -> Result<()> {
    put_string(buf, &identity.id)?;
    put_string(buf, &identity.name)
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        ClusterError::Protocol(format!(
            "String too long: {} bytes (max {})",
            value.len(),
            u16::MAX
        ))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode an operation from bytes
pub fn decode_operation(bytes: &[u8]) -> Result<StructuralOperation> {
    if bytes.len() < HEADER_SIZE {
        return Err(ClusterError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut header = &bytes[..HEADER_SIZE];
    let request_type = header.get_u8();
    let payload_len = header.get_u32() as usize;

    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(ClusterError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(ClusterError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let mut payload = &bytes[HEADER_SIZE..total_len];
    let operation = match RequestType::from_byte(request_type) {
        Some(RequestType::NodeJoin) => StructuralOperation::NodeJoin {
            identity: get_identity(&mut payload)?,
        },
        Some(RequestType::NodeLeave) => StructuralOperation::NodeLeave {
            identity: get_identity(&mut payload)?,
        },
        None => {
            return Err(ClusterError::Protocol(format!(
                "Unknown request type: 0x{:02x}",
                request_type
            )))
        }
    };

    if payload.has_remaining() {
        return Err(ClusterError::Protocol(format!(
            "{} trailing bytes after {:?} payload",
            payload.remaining(),
            operation.request_type()
        )));
    }
    Ok(operation)
}

fn get_identity(buf: &mut &[u8]) -> Result<NodeIdentity> {
    let id = get_string(buf)?;
    let name = get_string(buf)?;
    Ok(NodeIdentity { id, name })
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(ClusterError::Protocol(
            "Payload too short for string length".to_string(),
        ));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ClusterError::Protocol(format!(
            "String truncated: expected {} bytes, got {}",
            len,
            buf.remaining()
        )));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| ClusterError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete operation from a stream
///
/// Blocks until a complete operation is received or an error occurs
pub fn read_operation<R: Read>(reader: &mut R) -> Result<StructuralOperation> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(ClusterError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = vec![0u8; HEADER_SIZE + payload_len];
    message[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut message[HEADER_SIZE..])?;

    decode_operation(&message)
}

/// Write an operation to a stream
pub fn write_operation<W: Write>(writer: &mut W, operation: &StructuralOperation) -> Result<()> {
    let bytes = encode_operation(operation)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
