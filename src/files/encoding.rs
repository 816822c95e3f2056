//! Content encode/decode between on-disk bytes and the wire representation
//! used in `FILE_READ_<key>` / `FILE_CONTENT_<key>` attributes (spec §4.7,
//! §4.8.4).

use crate::files::definition::Encoding;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

/// Renders file bytes as the string published for `encoding`. Mirrors
/// `file_writer.py::read_file`: `text`/`json` both UTF-8 decode (a `json`
/// file is expected to already hold valid JSON text), `base64` encodes the
/// raw bytes. Returns `None` on a non-UTF-8 `text`/`json` file.
pub fn encode_for_wire(bytes: &[u8], encoding: Encoding) -> Option<String> {
    match encoding {
        Encoding::Text | Encoding::Json => std::str::from_utf8(bytes).ok().map(str::to_string),
        Encoding::Base64 => Some(BASE64.encode(bytes)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("value is not valid base64")]
    Base64,
    #[error("value is not valid UTF-8 text")]
    Utf8,
}

/// Decodes an incoming `FILE_CONTENT_<key>` value into the bytes that
/// should land on disk (spec §4.8.4): a JSON object is re-serialized as
/// UTF-8 JSON text, a base64 string is decoded, anything else is encoded
/// as UTF-8 text.
pub fn decode_content(value: &Value, encoding: Encoding) -> Result<Vec<u8>, DecodeError> {
    match encoding {
        Encoding::Json => {
            if value.is_object() || value.is_array() {
                Ok(serde_json::to_vec(value).map_err(|_| DecodeError::Utf8)?)
            } else {
                value.as_str().map(|s| s.as_bytes().to_vec()).ok_or(DecodeError::Utf8)
            }
        }
        Encoding::Base64 => {
            let s = value.as_str().ok_or(DecodeError::Utf8)?;
            BASE64.decode(s).map_err(|_| DecodeError::Base64)
        }
        Encoding::Text => value.as_str().map(|s| s.as_bytes().to_vec()).ok_or(DecodeError::Utf8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_object_round_trips_through_decode_and_encode() {
        let value = json!({"a": 1});
        let bytes = decode_content(&value, Encoding::Json).unwrap();
        let wire = encode_for_wire(&bytes, Encoding::Json).unwrap();
        let reparsed: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(reparsed, value);
    }

    #[test]
    fn base64_round_trips_bit_exact() {
        let bytes = vec![0u8, 1, 2, 255];
        let wire = encode_for_wire(&bytes, Encoding::Base64).unwrap();
        let decoded = decode_content(&Value::String(wire), Encoding::Base64).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = decode_content(&Value::String("not-base64!!".to_string()), Encoding::Base64);
        assert!(matches!(err, Err(DecodeError::Base64)));
    }
}
