//! Tests for value codecs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Service {
    name: String,
    port: u16,
    tags: Vec<String>,
    weights: BTreeMap<String, u32>,
    leader: Option<String>,
}

fn sample() -> Service {
    let mut weights = BTreeMap::new();
    weights.insert("zone-a".to_string(), 3);
    weights.insert("zone-b".to_string(), 1);
    Service {
        name: "billing".to_string(),
        port: 8443,
        tags: vec!["primary".to_string(), "v2".to_string()],
        weights,
        leader: Some("node-7".to_string()),
    }
}

// ============================================================================
// JsonCodec tests
// ============================================================================

#[test]
fn test_json_round_trip() {
    let codec = JsonCodec::<Service>::new();
    let value = sample();
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_json_encodes_plain_json() {
    let codec = JsonCodec::<BTreeMap<String, u32>>::new();
    let mut m = BTreeMap::new();
    m.insert("a".to_string(), 1);
    assert_eq!(codec.encode(&m).unwrap(), br#"{"a":1}"#);
}

#[test]
fn test_json_empty_payload_is_default() {
    let codec = JsonCodec::<Service>::new();
    assert_eq!(codec.decode(&[]).unwrap(), Service::default());

    let counter = JsonCodec::<u64>::new();
    assert_eq!(counter.decode(&[]).unwrap(), 0);
}

#[test]
fn test_json_decode_invalid() {
    let codec = JsonCodec::<Service>::new();
    let err = codec.decode(b"{not json").unwrap_err();
    assert!(matches!(err, CodecError::Decode { codec: "json", .. }));
    assert!(err.to_string().starts_with("codec json: decode:"));
}

#[test]
fn test_json_decode_wrong_shape() {
    let codec = JsonCodec::<u64>::new();
    assert!(codec.decode(br#""forty-two""#).is_err());
}

// ============================================================================
// MsgpackCodec tests
// ============================================================================

#[test]
fn test_msgpack_round_trip() {
    let codec = MsgpackCodec::<Service>::new();
    let value = sample();
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_msgpack_is_smaller_than_json() {
    let value = sample();
    let json = JsonCodec::<Service>::new().encode(&value).unwrap();
    let msgpack = MsgpackCodec::<Service>::new().encode(&value).unwrap();
    assert!(msgpack.len() < json.len());
}

#[test]
fn test_msgpack_empty_payload_is_default() {
    let codec = MsgpackCodec::<Vec<String>>::new();
    assert!(codec.decode(&[]).unwrap().is_empty());
}

#[test]
fn test_msgpack_decode_invalid() {
    let codec = MsgpackCodec::<Service>::new();
    // 0xc1 is never used in MessagePack.
    let err = codec.decode(&[0xc1]).unwrap_err();
    assert!(matches!(err, CodecError::Decode { codec: "msgpack", .. }));
}

// ============================================================================
// StringCodec / RawCodec tests
// ============================================================================

#[test]
fn test_string_round_trip() {
    let codec = StringCodec;
    let bytes = codec.encode(&"leader=node-3".to_string()).unwrap();
    assert_eq!(bytes, b"leader=node-3");
    assert_eq!(codec.decode(&bytes).unwrap(), "leader=node-3");
}

#[test]
fn test_string_empty_and_invalid() {
    let codec = StringCodec;
    assert_eq!(codec.decode(&[]).unwrap(), "");
    assert!(codec.decode(&[0xff, 0xfe]).is_err());
}

#[test]
fn test_raw_passthrough() {
    let codec = RawCodec;
    let payload = vec![0u8, 1, 2, 255];
    assert_eq!(codec.encode(&payload).unwrap(), payload);
    assert_eq!(codec.decode(&payload).unwrap(), payload);
    assert!(codec.decode(&[]).unwrap().is_empty());
}

#[test]
fn test_codec_names() {
    assert_eq!(JsonCodec::<u8>::new().name(), "json");
    assert_eq!(MsgpackCodec::<u8>::new().name(), "msgpack");
    assert_eq!(StringCodec.name(), "string");
    assert_eq!(RawCodec.name(), "raw");
}

#[test]
fn test_error_helpers() {
    let e = CodecError::encode("json", "boom");
    assert_eq!(e.to_string(), "codec json: encode: boom");
    let d = CodecError::decode("raw", "bad");
    assert_eq!(d.to_string(), "codec raw: decode: bad");
}
