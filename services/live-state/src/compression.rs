//! Inflation of compressed upstream topics
//!
//! Topics ending in `.z` carry a base64 string wrapping a deflate stream of
//! JSON. The stream is nominally zlib framed; the live feed sends raw
//! deflate, so both are accepted.

use std::io::Read;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use serde_json::Value;
use types::errors::DecodeError;

/// Default ceiling on inflated payload size.
pub const DEFAULT_MAX_INFLATED_BYTES: usize = 16 * 1024 * 1024;

/// Decode a base64 + deflate payload into a JSON value.
///
/// Keys are returned exactly as upstream sent them; casing is applied by
/// the normalizer.
pub fn inflate_json(encoded: &str, max_bytes: usize) -> Result<Value, DecodeError> {
    let compressed = decode_base64(encoded)?;
    let bytes = inflate(&compressed, max_bytes)?;
    serde_json::from_slice(&bytes).map_err(DecodeError::from)
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = encoded.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

fn inflate(compressed: &[u8], max_bytes: usize) -> Result<Vec<u8>, DecodeError> {
    match read_limited(ZlibDecoder::new(compressed), max_bytes) {
        Ok(bytes) => Ok(bytes),
        Err(DecodeError::PayloadTooLarge { limit }) => Err(DecodeError::PayloadTooLarge { limit }),
        Err(_) => read_limited(DeflateDecoder::new(compressed), max_bytes),
    }
}

fn read_limited<R: Read>(reader: R, max_bytes: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    // One extra byte detects overflow without reading the whole stream.
    reader
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Decompression(e.to_string()))?;

    if out.len() > max_bytes {
        return Err(DecodeError::PayloadTooLarge { limit: max_bytes });
    }
    if out.is_empty() {
        return Err(DecodeError::Decompression("empty stream".to_string()));
    }
    Ok(out)
}

/// Compress JSON the way upstream does (zlib, base64). Used by tests and
/// by tooling that records sessions.
pub fn deflate_json(value: &Value) -> Result<String, DecodeError> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let raw = serde_json::to_vec(value)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| DecodeError::Decompression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| DecodeError::Decompression(e.to_string()))?;
    Ok(STANDARD.encode(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_zlib_roundtrip() {
        let original = json!({"Entries": [{"Utc": "2024-03-02T15:00:00Z", "Cars": {"1": {"Channels": {"0": 11000}}}}]});
        let encoded = deflate_json(&original).unwrap();
        let decoded = inflate_json(&encoded, DEFAULT_MAX_INFLATED_BYTES).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_raw_deflate_accepted() {
        let original = json!({"Position": [{"Timestamp": "2024-03-02T15:00:00Z"}]});
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&serde_json::to_vec(&original).unwrap())
            .unwrap();
        let encoded = STANDARD.encode(encoder.finish().unwrap());

        let decoded = inflate_json(&encoded, DEFAULT_MAX_INFLATED_BYTES).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_invalid_base64() {
        let err = inflate_json("not*base64!", DEFAULT_MAX_INFLATED_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_corrupt_stream() {
        let encoded = STANDARD.encode(b"definitely not deflate data");
        let err = inflate_json(&encoded, DEFAULT_MAX_INFLATED_BYTES).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Decompression(_) | DecodeError::InvalidJson(_)
        ));
    }

    #[test]
    fn test_inflated_not_json() {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<xml/>").unwrap();
        let encoded = STANDARD.encode(encoder.finish().unwrap());

        let err = inflate_json(&encoded, DEFAULT_MAX_INFLATED_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn test_size_limit() {
        let big = json!({"data": "x".repeat(4096)});
        let encoded = deflate_json(&big).unwrap();
        let err = inflate_json(&encoded, 128).unwrap_err();
        assert_eq!(err, DecodeError::PayloadTooLarge { limit: 128 });
    }
}
