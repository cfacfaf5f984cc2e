//! Error types for upstream message decoding
//!
//! Every variant describes why a single fragment was discarded. None of
//! them is ever propagated past the normalizer.

use thiserror::Error;

/// Reasons a raw message or one of its fragments could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("inflated payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("unexpected shape for topic {topic}: {reason}")]
    UnexpectedShape { topic: String, reason: String },
}

impl DecodeError {
    /// Short label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::InvalidJson(_) => "invalid_json",
            DecodeError::InvalidBase64(_) => "invalid_base64",
            DecodeError::Decompression(_) => "decompression",
            DecodeError::PayloadTooLarge { .. } => "payload_too_large",
            DecodeError::UnexpectedShape { .. } => "unexpected_shape",
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::InvalidJson(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::UnexpectedShape {
            topic: "TimingData".to_string(),
            reason: "expected string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected shape for topic TimingData: expected string"
        );

        let err = DecodeError::PayloadTooLarge { limit: 1024 };
        assert_eq!(err.to_string(), "inflated payload exceeds 1024 bytes");
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DecodeError = parse_err.into();
        assert_eq!(err.kind(), "invalid_json");
    }
}
