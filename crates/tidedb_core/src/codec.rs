//! Value serialization for stored payloads.
//!
//! Values are stored as CBOR. The engine itself only moves bytes; these
//! helpers sit at the typed `put`/`get` boundary.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the value cannot be serialized.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Deserializes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the bytes do not describe a `T`.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Document {
        title: String,
        tags: Vec<String>,
        views: u64,
    }

    #[test]
    fn struct_roundtrip() {
        let doc = Document {
            title: "hello".into(),
            tags: vec!["a".into(), "b".into()],
            views: 7,
        };
        let bytes = encode_value(&doc).unwrap();
        let back: Document = decode_value(&bytes).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn wrong_shape_is_codec_error() {
        let bytes = encode_value(&42u32).unwrap();
        let result: CoreResult<Document> = decode_value(&bytes);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }

    #[test]
    fn garbage_is_codec_error() {
        let result: CoreResult<String> = decode_value(&[0xFF, 0x00]);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }
}
