use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `?delay=N` on state and stream endpoints. Absent means live.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DelayQuery {
    pub delay: Option<f64>,
}

/// Body of `POST /v1/ingest`: one upstream envelope.
///
/// `payload` is either the envelope as JSON or a string holding it
/// verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub topic: String,
    pub payload: Value,
}

impl IngestRequest {
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Value::String(text) => text.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub sequence: u64,
    pub subscribers: usize,
}
