//! Codec Tests
//!
//! Tests for structural operation encoding/decoding and for applying
//! operations to the shared configuration.

use std::io::Cursor;

use atlascluster::structural::{
    decode_operation, encode_operation, read_operation, write_operation, NodeIdentity,
    RequestType, SharedConfiguration, StructuralOperation, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
use atlascluster::ClusterError;

fn join(id: &str, name: &str) -> StructuralOperation {
    StructuralOperation::NodeJoin {
        identity: NodeIdentity::new(id, name),
    }
}

fn leave(id: &str, name: &str) -> StructuralOperation {
    StructuralOperation::NodeLeave {
        identity: NodeIdentity::new(id, name),
    }
}

fn assert_protocol_error(result: atlascluster::Result<StructuralOperation>, needle: &str) {
    match result {
        Err(ClusterError::Protocol(message)) => {
            assert!(message.contains(needle), "unexpected message: {}", message)
        }
        other => panic!("Expected protocol error, got {:?}", other),
    }
}

// =============================================================================
// Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_node_join() {
    let op = join("node-1", "alpha");
    let encoded = encode_operation(&op).unwrap();
    let decoded = decode_operation(&encoded).unwrap();

    match decoded {
        StructuralOperation::NodeJoin { identity } => {
            assert_eq!(identity.id, "node-1");
            assert_eq!(identity.name, "alpha");
        }
        _ => panic!("Expected NodeJoin operation"),
    }
}

#[test]
fn test_encode_decode_node_leave() {
    let op = leave("node-2", "beta");
    let decoded = decode_operation(&encode_operation(&op).unwrap()).unwrap();

    assert_eq!(decoded, op);
    assert_eq!(decoded.request_type(), RequestType::NodeLeave);
}

#[test]
fn test_encoded_layout() {
    let encoded = encode_operation(&join("n1", "alpha")).unwrap();

    let mut expected = vec![0x01, 0x00, 0x00, 0x00, 0x0B];
    expected.extend_from_slice(&[0x00, 0x02]);
    expected.extend_from_slice(b"n1");
    expected.extend_from_slice(&[0x00, 0x05]);
    expected.extend_from_slice(b"alpha");
    assert_eq!(encoded, expected);
    assert_eq!(encoded.len(), HEADER_SIZE + 11);
}

#[test]
fn test_encode_decode_empty_and_unicode_strings() {
    let op = join("", "nœud ✓");
    let decoded = decode_operation(&encode_operation(&op).unwrap()).unwrap();
    assert_eq!(decoded, op);
}

#[test]
fn test_encode_rejects_oversized_string() {
    let op = join(&"x".repeat(u16::MAX as usize + 1), "big");
    assert!(matches!(
        encode_operation(&op),
        Err(ClusterError::Protocol(_))
    ));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_decode_incomplete_header() {
    assert_protocol_error(decode_operation(&[0x01, 0x00]), "Incomplete header");
    assert_protocol_error(decode_operation(&[]), "Incomplete header");
}

#[test]
fn test_decode_incomplete_payload() {
    let encoded = encode_operation(&join("node-1", "alpha")).unwrap();
    assert_protocol_error(
        decode_operation(&encoded[..encoded.len() - 1]),
        "Incomplete payload",
    );
}

#[test]
fn test_decode_unknown_request_type() {
    let mut encoded = encode_operation(&join("n", "m")).unwrap();
    encoded[0] = 0x7F;
    assert_protocol_error(decode_operation(&encoded), "Unknown request type: 0x7f");
}

#[test]
fn test_decode_payload_too_large() {
    let mut bytes = vec![0x01];
    bytes.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
    assert_protocol_error(decode_operation(&bytes), "Payload too large");
}

#[test]
fn test_decode_trailing_bytes() {
    // Declared length covers one byte more than the identity needs
    let mut bytes = vec![0x02, 0x00, 0x00, 0x00, 0x07];
    bytes.extend_from_slice(&[0x00, 0x01, b'a', 0x00, 0x01, b'b', 0xFF]);
    assert_protocol_error(decode_operation(&bytes), "trailing bytes");
}

#[test]
fn test_decode_truncated_string() {
    let mut bytes = vec![0x01, 0x00, 0x00, 0x00, 0x04];
    bytes.extend_from_slice(&[0x00, 0x09, b'a', b'b']);
    assert_protocol_error(decode_operation(&bytes), "String truncated");

    let mut bytes = vec![0x01, 0x00, 0x00, 0x00, 0x03];
    bytes.extend_from_slice(&[0x00, 0x01, b'a']);
    assert_protocol_error(decode_operation(&bytes), "too short");
}

#[test]
fn test_decode_invalid_utf8() {
    let mut bytes = vec![0x01, 0x00, 0x00, 0x00, 0x05];
    bytes.extend_from_slice(&[0x00, 0x01, 0xFF, 0x00, 0x00]);
    assert_protocol_error(decode_operation(&bytes), "Invalid UTF-8");
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_read_write() {
    let ops = vec![join("a", "first"), leave("b", "second"), join("c", "third")];

    let mut buffer = Vec::new();
    for op in &ops {
        write_operation(&mut buffer, op).unwrap();
    }

    let mut cursor = Cursor::new(buffer);
    for op in &ops {
        assert_eq!(&read_operation(&mut cursor).unwrap(), op);
    }
    assert!(matches!(read_operation(&mut cursor), Err(ClusterError::Io(_))));
}

#[test]
fn test_stream_read_rejects_huge_length() {
    let mut bytes = vec![0x01];
    bytes.extend_from_slice(&u32::MAX.to_be_bytes());
    let mut cursor = Cursor::new(bytes);
    assert_protocol_error(read_operation(&mut cursor), "Payload too large");
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_apply_join_and_leave() {
    let mut configuration = SharedConfiguration::new();
    assert!(configuration.is_empty());

    assert!(join("n1", "alpha").apply(&mut configuration));
    assert!(join("n2", "beta").apply(&mut configuration));
    assert_eq!(configuration.len(), 2);
    assert_eq!(configuration.version(), 2);
    assert!(configuration.contains(&NodeIdentity::new("n1", "alpha")));

    assert!(leave("n1", "alpha").apply(&mut configuration));
    assert_eq!(configuration.len(), 1);
    assert_eq!(configuration.version(), 3);

    let ids: Vec<&str> = configuration
        .nodes()
        .map(|n| n.identity.id.as_str())
        .collect();
    assert_eq!(ids, vec!["n2"]);
}

#[test]
fn test_apply_is_idempotent() {
    let mut configuration = SharedConfiguration::new();

    assert!(join("n1", "alpha").apply(&mut configuration));
    assert!(!join("n1", "renamed").apply(&mut configuration));
    assert!(!leave("n9", "unknown").apply(&mut configuration));
    assert_eq!(configuration.version(), 1);

    assert!(leave("n1", "alpha").apply(&mut configuration));
    assert!(!leave("n1", "alpha").apply(&mut configuration));
    assert_eq!(configuration.version(), 2);
    assert!(configuration.is_empty());
}

#[test]
fn test_decoded_operation_applies() {
    let mut configuration = SharedConfiguration::new();
    let wire = encode_operation(&join("n7", "gamma")).unwrap();

    decode_operation(&wire).unwrap().apply(&mut configuration);

    let node = configuration.nodes().next().unwrap();
    assert_eq!(node.identity, NodeIdentity::new("n7", "gamma"));
}
