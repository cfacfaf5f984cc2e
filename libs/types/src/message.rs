//! Message types flowing through the live state pipeline
//!
//! `RawMessage` is what the ingestion source hands over. The normalizer
//! turns it into a `ProcessedMessage`: either a full `InitialState` that
//! replaces the canonical document, or a partial `StateUpdate` that is
//! merged into it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One message as received from the upstream feed.
///
/// `arrival_ms` is the Unix millisecond timestamp at which the ingestion
/// source received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Label of the logical channel the message arrived on.
    pub topic: String,
    /// Opaque payload, normally a JSON envelope.
    pub payload: Vec<u8>,
    /// Unix milliseconds at arrival.
    pub arrival_ms: i64,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, arrival_ms: i64) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            arrival_ms,
        }
    }

    /// Convenience constructor stamping the current wall clock time.
    pub fn now(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(topic, payload, chrono::Utc::now().timestamp_millis())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A partial state document carrying only changed branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Object keyed identically to the canonical document.
    pub updates: Value,
    /// Unix milliseconds of the originating raw message.
    pub timestamp_ms: i64,
}

impl StateUpdate {
    pub fn new(updates: Map<String, Value>, timestamp_ms: i64) -> Self {
        Self {
            updates: Value::Object(updates),
            timestamp_ms,
        }
    }

    /// Top-level topics touched by this update, in key order.
    pub fn topics(&self) -> Vec<&str> {
        match &self.updates {
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.updates {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }
}

/// A complete state document replacing the canonical one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub state: Value,
    pub timestamp_ms: i64,
}

impl InitialState {
    pub fn new(state: Map<String, Value>, timestamp_ms: i64) -> Self {
        Self {
            state: Value::Object(state),
            timestamp_ms,
        }
    }

    /// Top-level topics present in the document, in key order.
    pub fn topics(&self) -> Vec<&str> {
        match &self.state {
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Output of the normalizer for one raw message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedMessage {
    Initial(InitialState),
    Update(StateUpdate),
}

impl ProcessedMessage {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            ProcessedMessage::Initial(initial) => initial.timestamp_ms,
            ProcessedMessage::Update(update) => update.timestamp_ms,
        }
    }

    /// Label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ProcessedMessage::Initial(_) => "initial",
            ProcessedMessage::Update(_) => "update",
        }
    }

    pub fn as_update(&self) -> Option<&StateUpdate> {
        match self {
            ProcessedMessage::Update(update) => Some(update),
            ProcessedMessage::Initial(_) => None,
        }
    }

    pub fn as_initial(&self) -> Option<&InitialState> {
        match self {
            ProcessedMessage::Initial(initial) => Some(initial),
            ProcessedMessage::Update(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_message_construction() {
        let raw = RawMessage::new("updates", b"{}".to_vec(), 1_700_000_000_000);
        assert_eq!(raw.topic, "updates");
        assert_eq!(raw.len(), 2);
        assert!(!raw.is_empty());
    }

    #[test]
    fn test_raw_message_now_stamps_time() {
        let before = chrono::Utc::now().timestamp_millis();
        let raw = RawMessage::now("updates", Vec::new());
        assert!(raw.arrival_ms >= before);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_state_update_topics() {
        let mut map = Map::new();
        map.insert("weatherData".to_string(), json!({"airTemp": "21.3"}));
        map.insert("timingData".to_string(), json!({"lines": {}}));
        let update = StateUpdate::new(map, 42);

        assert_eq!(update.topics(), vec!["timingData", "weatherData"]);
        assert!(!update.is_empty());
    }

    #[test]
    fn test_empty_update() {
        let update = StateUpdate::new(Map::new(), 0);
        assert!(update.is_empty());
        assert!(update.topics().is_empty());
    }

    #[test]
    fn test_processed_message_accessors() {
        let initial = ProcessedMessage::Initial(InitialState::new(Map::new(), 7));
        assert_eq!(initial.timestamp_ms(), 7);
        assert_eq!(initial.kind_label(), "initial");
        assert!(initial.as_initial().is_some());
        assert!(initial.as_update().is_none());

        let update = ProcessedMessage::Update(StateUpdate::new(Map::new(), 9));
        assert_eq!(update.kind_label(), "update");
        assert!(update.as_update().is_some());
    }
}
