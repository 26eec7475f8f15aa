//! Integration tests for the envelope wire formats
//!
//! Checks the byte layout of descriptor and result envelopes and the ways a
//! malformed envelope is refused.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::uninlined_format_args
)]

use request_broker::config::MAGIC_BYTES;
use request_broker::core::descriptor::RequestDescriptor;
use request_broker::core::serialization::{
    decode_descriptor, decode_result_prefix, encode_descriptor, encode_result_prefix,
    ProtocolVersion, DESCRIPTOR_HEADER_LEN, KIND_DESCRIPTOR, KIND_RESULT, RESULT_HEADER_LEN,
};
use request_broker::BrokerError;
use std::io::{Cursor, Read};

const LIMIT: usize = 64 * 1024;

fn sample() -> RequestDescriptor {
    RequestDescriptor::new("alice", "PROPFIND", "/remote.php/dav/files/alice/", "tok")
        .with_header("Accept", "text/xml")
        .with_query("format", "xml")
}

#[test]
fn test_descriptor_envelope_header() {
    let bytes = encode_descriptor(&sample()).expect("encode");

    assert_eq!(&bytes[0..4], &MAGIC_BYTES);
    assert_eq!(bytes[4], KIND_DESCRIPTOR);
    assert!(bytes.len() > DESCRIPTOR_HEADER_LEN);
}

#[test]
fn test_descriptor_encoding_is_deterministic() {
    let a = encode_descriptor(&sample()).expect("encode");
    let b = encode_descriptor(&sample()).expect("encode");
    assert_eq!(a, b);
}

#[test]
fn test_descriptor_roundtrip_keeps_every_field() {
    let descriptor = sample()
        .with_legacy_param("legacy", "1")
        .with_body_text("<d:propfind/>")
        .with_follow_redirects(false);

    let decoded =
        decode_descriptor(&encode_descriptor(&descriptor).expect("encode"), LIMIT).expect("decode");
    assert_eq!(decoded, descriptor);
    assert!(!decoded.follow_redirects);
}

#[test]
fn test_result_envelope_rejected_as_descriptor() {
    let bytes = encode_result_prefix(ProtocolVersion::V1, None, None).expect("encode");
    match decode_descriptor(&bytes, LIMIT) {
        Err(BrokerError::MalformedEnvelope(msg)) => assert!(msg.contains("kind"), "{}", msg),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = encode_descriptor(&sample()).expect("encode");
    bytes.push(0);
    assert!(matches!(
        decode_descriptor(&bytes, LIMIT),
        Err(BrokerError::MalformedEnvelope(_))
    ));
}

#[test]
fn test_oversized_envelope_rejected_before_decoding() {
    let descriptor = sample().with_body_text("x".repeat(2048));
    let bytes = encode_descriptor(&descriptor).expect("encode");

    match decode_descriptor(&bytes, 1024) {
        Err(BrokerError::MalformedEnvelope(msg)) => {
            assert!(msg.contains("exceeds maximum size"), "{}", msg)
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_huge_length_prefix_does_not_allocate() {
    let mut bytes = MAGIC_BYTES.to_vec();
    bytes.push(KIND_DESCRIPTOR);
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    assert!(matches!(
        decode_descriptor(&bytes, LIMIT),
        Err(BrokerError::MalformedEnvelope(_))
    ));
}

#[test]
fn test_v1_result_has_no_headers_slot() {
    let v1 = encode_result_prefix(ProtocolVersion::V1, None, Some("ignored")).expect("encode");
    // header plus a single `None` tag
    assert_eq!(v1.len(), RESULT_HEADER_LEN + 1);
    assert_eq!(v1[4], KIND_RESULT);
    assert_eq!(v1[5], ProtocolVersion::V1.version_byte());
    assert_eq!(v1[6], 0);

    let v2 = encode_result_prefix(ProtocolVersion::V2, None, None).expect("encode");
    assert_eq!(v2.len(), RESULT_HEADER_LEN + 2);
}

#[test]
fn test_empty_error_slot_with_headers_leaves_body() {
    let mut bytes =
        encode_result_prefix(ProtocolVersion::V2, None, Some("some-headers")).expect("encode");
    bytes.extend_from_slice(b"<d:multistatus/>");

    let mut cursor = Cursor::new(bytes);
    let prefix = decode_result_prefix(&mut cursor).expect("decode");
    assert!(prefix.error.is_none());
    assert_eq!(prefix.headers.as_deref(), Some("some-headers"));

    let mut rest = Vec::new();
    cursor.read_to_end(&mut rest).expect("read");
    assert_eq!(rest, b"<d:multistatus/>");
}

#[test]
fn test_every_wire_error_roundtrips() {
    let errors = vec![
        BrokerError::MalformedEnvelope("m".into()),
        BrokerError::AccountNotFound("a".into()),
        BrokerError::InvalidToken,
        BrokerError::InvalidRequestUrl("u".into()),
        BrokerError::UnsupportedMethod("OPTIONS".into()),
        BrokerError::ReservedHeaderConflict("r".into()),
        BrokerError::HttpRequestFailed {
            status: 503,
            diagnostic: "maintenance".into(),
        },
        BrokerError::TransportError("t".into()),
        BrokerError::ConfigError("c".into()),
        BrokerError::PipeClosed,
    ];

    for error in errors {
        let bytes = encode_result_prefix(ProtocolVersion::V1, Some(&error), None).expect("encode");
        let decoded = decode_result_prefix(&mut Cursor::new(bytes))
            .expect("decode")
            .error
            .expect("error slot");
        assert_eq!(decoded.kind(), error.kind());
        assert_eq!(decoded.to_string(), error.to_string());
    }
}

#[test]
fn test_unknown_result_version_rejected() {
    let mut bytes = encode_result_prefix(ProtocolVersion::V2, None, None).expect("encode");
    bytes[5] = 9;
    match decode_result_prefix(&mut Cursor::new(bytes)) {
        Err(BrokerError::MalformedEnvelope(msg)) => assert!(msg.contains("9"), "{}", msg),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_short_result_prefix_is_io_error() {
    let bytes = encode_result_prefix(ProtocolVersion::V2, None, Some("headers")).expect("encode");
    let result = decode_result_prefix(&mut Cursor::new(&bytes[..3]));
    assert!(matches!(result, Err(BrokerError::Io(_))));
}
