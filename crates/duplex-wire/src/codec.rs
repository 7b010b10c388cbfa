//! Envelope framing.
//!
//! Wire format: a JSON string literal whose content is the JSON text of the
//! envelope. The outer string layer matches the text framing of the data
//! channel and must be stripped before the envelope is parsed.

use crate::error::WireError;
use crate::message::Envelope;
use serde::Serialize;

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode an envelope into a wire frame.
///
/// Fails only when the payload cannot be represented as JSON; no partial
/// output is produced.
pub fn encode<P: Serialize>(envelope: &Envelope<P>) -> Result<Vec<u8>, WireError> {
    let inner = serde_json::to_string(envelope).map_err(|e| WireError::Encoding(e.to_string()))?;
    serde_json::to_vec(&inner).map_err(|e| WireError::Encoding(e.to_string()))
}

/// Decode a wire frame into an envelope.
///
/// Returns [`WireError::Framing`] when the outer layer is not a JSON string and
/// [`WireError::Decoding`] when its content is not a well-formed envelope.
pub fn decode(frame: &[u8]) -> Result<Envelope, WireError> {
    let inner: String = serde_json::from_slice(frame)
        .map_err(|e| WireError::Framing(format!("outer layer is not a JSON string: {e}")))?;

    let envelope: Envelope = serde_json::from_str(&inner)
        .map_err(|e| WireError::Decoding(format!("inner envelope: {e}")))?;

    if envelope.opcode.is_empty() {
        return Err(WireError::Decoding("envelope has an empty opcode".to_string()));
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Ping, PING};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_encode_decode_roundtrip() {
        let env = Envelope::new("CHAT", json!({"text": "hi", "tags": ["a", "b"]}))
            .with_origin("alice")
            .with_target("bob")
            .with_ttl(3)
            .with_id("m-1")
            .with_method("post")
            .with_listener("tok1");
        let frame = encode(&env).unwrap();
        assert_eq!(decode(&frame).unwrap(), env);
    }

    #[test]
    fn test_frame_is_string_wrapped() {
        let frame = encode(&Envelope::new(PING, Ping { t1: 1000 })).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with('"'));
        assert!(text.ends_with('"'));

        let inner: String = serde_json::from_slice(&frame).unwrap();
        assert_eq!(inner, r#"{"opcode":"PING","payload":{"t1":1000}}"#);
    }

    #[test]
    fn test_typed_payload_decodes_as_value() {
        let frame = encode(&Envelope::new(PING, Ping { t1: 7 }).with_ttl(1)).unwrap();
        let env = decode(&frame).unwrap();
        assert_eq!(env.opcode, PING);
        assert_eq!(env.ttl, Some(1));
        assert_eq!(env.payload, json!({"t1": 7}));
    }

    #[test]
    fn test_unwrapped_object_is_framing_error() {
        let err = decode(br#"{"opcode":"PING","payload":{}}"#).unwrap_err();
        assert!(matches!(err, WireError::Framing(_)));
    }

    #[test]
    fn test_garbage_is_framing_error() {
        assert!(matches!(decode(b"\xff\x00"), Err(WireError::Framing(_))));
        assert!(matches!(decode(b""), Err(WireError::Framing(_))));
    }

    #[test]
    fn test_inner_garbage_is_decoding_error() {
        let frame = serde_json::to_vec("not json at all").unwrap();
        assert!(matches!(decode(&frame), Err(WireError::Decoding(_))));
    }

    #[test]
    fn test_missing_opcode_is_decoding_error() {
        let frame = serde_json::to_vec(r#"{"payload":{"t1":1}}"#).unwrap();
        assert!(matches!(decode(&frame), Err(WireError::Decoding(_))));
    }

    #[test]
    fn test_empty_opcode_is_decoding_error() {
        let frame = serde_json::to_vec(r#"{"opcode":"","payload":null}"#).unwrap();
        assert!(matches!(decode(&frame), Err(WireError::Decoding(_))));
    }

    #[test]
    fn test_unrepresentable_payload_is_encoding_error() {
        let mut payload = HashMap::new();
        payload.insert((1u8, 2u8), "tuple keys cannot be JSON object keys");
        let err = encode(&Envelope::new("BAD", payload)).unwrap_err();
        assert!(matches!(err, WireError::Encoding(_)));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let frame = serde_json::to_vec(r#"{"opcode":"X","payload":1,"extra":true}"#).unwrap();
        let env = decode(&frame).unwrap();
        assert_eq!(env.opcode, "X");
        assert_eq!(env.payload, json!(1));
    }
}
