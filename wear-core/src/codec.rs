//! Payload codec: UTF-8 JSON text, one externally tagged object per value
//! (`{"int64": 3}`, `{"string_array": ["a"]}`), so decode needs no schema.

use crate::error::CodecError;
use crate::value::{DynamicMap, Payload};

/// Largest encoded payload accepted in either direction.
pub const MAX_PAYLOAD_LEN: usize = 100 * 1024; // 100 KiB

/// Encode a typed payload. Fails if a float is non-finite or the result is too large.
pub fn encode(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    if payload.iter().any(|(_, v)| !v.is_finite()) {
        return Err(CodecError::NonFinite);
    }
    let bytes = serde_json::to_vec(payload)?;
    if bytes.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::TooLarge);
    }
    Ok(bytes)
}

/// Apply the type policy to an application map (dropping unsupported keys), then encode.
pub fn encode_dynamic(map: &DynamicMap) -> Result<Vec<u8>, CodecError> {
    encode(&Payload::from_dynamic(map))
}

pub fn decode(bytes: &[u8]) -> Result<Payload, CodecError> {
    if bytes.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::TooLarge);
    }
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Dynamic, Value};

    fn sample() -> Payload {
        [
            ("name".to_string(), Value::String("watch".into())),
            ("steps".to_string(), Value::Int64(-12_345_678_901)),
            ("ratio".to_string(), Value::Float64(0.1)),
            ("on".to_string(), Value::Boolean(false)),
            (
                "tags".to_string(),
                Value::StringArray(vec!["a".into(), "".into()]),
            ),
            ("ids".to_string(), Value::Int64Array(vec![i64::MIN, 0, i64::MAX])),
            ("hr".to_string(), Value::Float64Array(vec![61.5, 1e-300])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn roundtrip_supported_values() {
        let payload = sample();
        let bytes = encode(&payload).unwrap();
        assert_eq!(decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn encoding_is_tagged_json() {
        let mut payload = Payload::new();
        payload.insert("x", Value::Int64(1));
        let text = String::from_utf8(encode(&payload).unwrap()).unwrap();
        assert_eq!(text, r#"{"x":{"int64":1}}"#);
    }

    #[test]
    fn nested_map_dropped_rest_roundtrips() {
        let mut inner = DynamicMap::new();
        inner.insert("deep".into(), Dynamic::Int(1));
        let mut map = DynamicMap::new();
        map.insert("nested".into(), Dynamic::Map(inner));
        map.insert("count".into(), Dynamic::Int(3));
        map.insert("label".into(), Dynamic::String("hi".into()));

        let decoded = decode(&encode_dynamic(&map).unwrap()).unwrap();
        assert!(!decoded.contains_key("nested"));
        assert_eq!(decoded.get("count"), Some(&Value::Int64(3)));
        assert_eq!(decoded.get("label"), Some(&Value::String("hi".into())));
    }

    #[test]
    fn mixed_array_dropped() {
        let mut map = DynamicMap::new();
        map.insert(
            "mixed".into(),
            Dynamic::List(vec![Dynamic::Int(1), Dynamic::Double(2.0)]),
        );
        map.insert("ok".into(), Dynamic::Bool(true));
        let decoded = decode(&encode_dynamic(&map).unwrap()).unwrap();
        assert!(!decoded.contains_key("mixed"));
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn non_finite_rejected_on_encode() {
        let mut payload = Payload::new();
        payload.insert("bad", Value::Float64Array(vec![1.0, f64::INFINITY]));
        assert!(matches!(encode(&payload), Err(CodecError::NonFinite)));
    }

    #[test]
    fn malformed_input_rejected() {
        assert!(matches!(decode(b"not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b"[1,2]"), Err(CodecError::Malformed(_))));
        // Untagged value.
        assert!(matches!(decode(br#"{"x":1}"#), Err(CodecError::Malformed(_))));
        // Array variant holding the wrong element type.
        assert!(matches!(
            decode(br#"{"x":{"int64_array":[1,"2"]}}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut payload = Payload::new();
        payload.insert("blob", Value::String("x".repeat(MAX_PAYLOAD_LEN)));
        assert!(matches!(encode(&payload), Err(CodecError::TooLarge)));
        assert!(matches!(
            decode(&vec![b' '; MAX_PAYLOAD_LEN + 1]),
            Err(CodecError::TooLarge)
        ));
    }
}
