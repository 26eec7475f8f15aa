//! Property-based tests using proptest
//!
//! These tests validate broker invariants across a wide range of randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use request_broker::config::MAX_ENVELOPE_SIZE;
use request_broker::core::descriptor::{QueryParam, RequestDescriptor};
use request_broker::core::serialization::{
    decode_descriptor, decode_result_prefix, encode_descriptor, encode_result_prefix,
    ProtocolVersion,
};
use request_broker::protocol::auth::{constant_time_eq, hash_token, validate_token};
use request_broker::protocol::builder::{build, validate_url, RESERVED_HEADER};
use request_broker::BrokerError;
use std::collections::BTreeMap;
use std::io::Cursor;

fn arb_descriptor() -> impl Strategy<Value = RequestDescriptor> {
    (
        "[a-z]{1,12}",
        prop::sample::select(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "PROPFIND", "MKCOL", "HEAD"]),
        "/[a-zA-Z0-9/._-]{0,40}",
        prop::option::of(prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 0..5)),
        prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..4),
        prop::collection::btree_map("X-[A-Za-z]{1,8}", prop::collection::vec("[ -~]{0,16}", 1..3), 0..4),
        prop::option::of(".{0,64}"),
        "[A-Za-z0-9]{8,64}",
        any::<bool>(),
    )
        .prop_map(
            |(account, method, url, query, legacy, headers, body_text, token, follow)| {
                RequestDescriptor {
                    account_id: account,
                    method: method.to_string(),
                    url,
                    query_params: query.map(|q| {
                        q.into_iter().map(|(k, v)| QueryParam::new(k, v)).collect()
                    }),
                    legacy_params: legacy,
                    headers: headers.into_iter().collect::<BTreeMap<_, _>>(),
                    body_text,
                    token,
                    follow_redirects: follow,
                }
            },
        )
}

// Property: Any descriptor survives an envelope round trip
proptest! {
    #[test]
    fn prop_descriptor_roundtrip(descriptor in arb_descriptor()) {
        let envelope = encode_descriptor(&descriptor).expect("encode");
        let decoded = decode_descriptor(&envelope, MAX_ENVELOPE_SIZE).expect("decode");
        prop_assert_eq!(decoded, descriptor);
    }
}

// Property: Arbitrary bytes never panic the descriptor decoder
proptest! {
    #[test]
    fn prop_decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        if let Err(e) = decode_descriptor(&data, MAX_ENVELOPE_SIZE) {
            prop_assert!(matches!(e, BrokerError::MalformedEnvelope(_)));
        }
    }
}

// Property: A valid magic and kind followed by garbage is still refused cleanly
proptest! {
    #[test]
    fn prop_decode_garbage_after_header(tail in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut data = vec![0x52, 0x51, 0x42, 0x4B, 0x01];
        data.extend_from_slice(&tail);
        let _ = decode_descriptor(&data, MAX_ENVELOPE_SIZE);
    }
}

// Property: Truncating an envelope anywhere makes it malformed
proptest! {
    #[test]
    fn prop_truncated_envelope_rejected(descriptor in arb_descriptor(), cut in any::<prop::sample::Index>()) {
        let envelope = encode_descriptor(&descriptor).expect("encode");
        let cut = cut.index(envelope.len());
        let result = decode_descriptor(&envelope[..cut], MAX_ENVELOPE_SIZE);
        prop_assert!(matches!(result, Err(BrokerError::MalformedEnvelope(_))));
    }
}

// Property: The correct token always validates against its stored hash
proptest! {
    #[test]
    fn prop_correct_token_validates(token in "[ -~]{1,64}", salt in "[a-f0-9]{1,32}") {
        let stored = hash_token(&token, &salt);
        prop_assert!(validate_token(&stored, &token).expect("validate"));
    }
}

// Property: Flipping any single bit of the token makes it invalid
proptest! {
    #[test]
    fn prop_single_bit_mutation_rejected(
        token in "[A-Za-z0-9]{1,64}",
        position in any::<prop::sample::Index>(),
        bit in 0u8..7,
    ) {
        let stored = hash_token(&token, "5a17");
        let mut bytes = token.clone().into_bytes();
        let i = position.index(bytes.len());
        bytes[i] ^= 1 << bit;
        let mutated = String::from_utf8(bytes).expect("still ascii");

        prop_assert!(!validate_token(&stored, &mutated).expect("validate"));
    }
}

// Property: constant_time_eq agrees with ordinary equality
proptest! {
    #[test]
    fn prop_constant_time_eq_matches_eq(
        a in prop::collection::vec(any::<u8>(), 0..64),
        b in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        prop_assert!(constant_time_eq(&a, &a));
    }
}

// Property: Result prefixes decode to what was encoded and leave the body untouched
proptest! {
    #[test]
    fn prop_result_prefix_leaves_body(
        headers in prop::option::of("[ -~]{0,200}"),
        status in 100u16..600,
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let error = BrokerError::HttpRequestFailed { status, diagnostic: "x".to_string() };
        let mut bytes = encode_result_prefix(ProtocolVersion::V2, Some(&error), headers.as_deref())
            .expect("encode");
        bytes.extend_from_slice(&body);

        let mut cursor = Cursor::new(bytes.as_slice());
        let prefix = decode_result_prefix(&mut cursor).expect("decode");
        let is_expected_error = matches!(
            prefix.error,
            Some(BrokerError::HttpRequestFailed { status: s, .. }) if s == status
        );
        prop_assert!(is_expected_error);
        prop_assert_eq!(prefix.headers, headers);
        prop_assert_eq!(&bytes[cursor.position() as usize..], body.as_slice());
    }
}

// Property: Only rooted paths pass URL validation
proptest! {
    #[test]
    fn prop_url_must_be_rooted(path in "[ -~]{0,40}") {
        prop_assert_eq!(validate_url(&path).is_ok(), path.starts_with('/'));
    }
}

// Property: The marker header is always present and never duplicated
proptest! {
    #[test]
    fn prop_marker_header_exactly_once(descriptor in arb_descriptor()) {
        let request = build(&descriptor, "https://cloud.example.com", None).expect("build");
        let count = request
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(RESERVED_HEADER))
            .count();
        prop_assert_eq!(count, 1);
    }
}
