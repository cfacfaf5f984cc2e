//! Outbound stream event definitions
//!
//! `StreamMessage` is what every subscriber receives: one `Initial` seed
//! followed by `Update` deltas, each tagged with the store sequence that
//! produced it. Sequences are strictly increasing per subscriber and are
//! used to drop messages already covered by the seed.
//!
//! Serialized as JSON tagged by `type`:
//!
//! ```text
//! {"type":"initial","sequence":1,"timestamp_ms":..,"state":{..}}
//! {"type":"update","sequence":2,"timestamp_ms":..,"update":{..}}
//! {"type":"raw","topic":"updates","timestamp_ms":..,"payload":"{..}"}
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::document::Document;
use types::message::RawMessage;

use crate::delay::Frame;
use crate::store::StateSnapshot;

static NULL: Value = Value::Null;

/// One message on a subscriber stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Full document; replaces whatever the client holds.
    Initial {
        sequence: u64,
        timestamp_ms: i64,
        state: Arc<Document>,
    },
    /// Partial document to merge into the client copy.
    Update {
        sequence: u64,
        timestamp_ms: i64,
        update: Arc<Value>,
    },
    /// Upstream message passed through untouched.
    Raw {
        topic: String,
        timestamp_ms: i64,
        payload: String,
    },
}

impl StreamMessage {
    /// Seed message from a store snapshot.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        StreamMessage::Initial {
            sequence: snapshot.sequence,
            timestamp_ms: snapshot.timestamp_ms.unwrap_or_default(),
            state: Arc::clone(&snapshot.state),
        }
    }

    /// Replay a buffered frame: its delta if it has one, its full state
    /// otherwise.
    pub fn from_frame(frame: &Frame) -> Self {
        match &frame.update {
            Some(update) => StreamMessage::Update {
                sequence: frame.sequence,
                timestamp_ms: frame.timestamp_ms,
                update: Arc::clone(update),
            },
            None => Self::seed_from_frame(frame),
        }
    }

    /// Full state of a buffered frame.
    pub fn seed_from_frame(frame: &Frame) -> Self {
        StreamMessage::Initial {
            sequence: frame.sequence,
            timestamp_ms: frame.timestamp_ms,
            state: Arc::clone(&frame.state),
        }
    }

    pub fn from_raw(raw: &RawMessage) -> Self {
        StreamMessage::Raw {
            topic: raw.topic.clone(),
            timestamp_ms: raw.arrival_ms,
            payload: String::from_utf8_lossy(&raw.payload).into_owned(),
        }
    }

    /// Store sequence, if this message carries state.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            StreamMessage::Initial { sequence, .. } | StreamMessage::Update { sequence, .. } => {
                Some(*sequence)
            }
            StreamMessage::Raw { .. } => None,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            StreamMessage::Initial { timestamp_ms, .. }
            | StreamMessage::Update { timestamp_ms, .. }
            | StreamMessage::Raw { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    /// Event name for transports that label messages (SSE).
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamMessage::Initial { .. } => "initial",
            StreamMessage::Update { .. } => "update",
            StreamMessage::Raw { .. } => "raw",
        }
    }

    /// Body without the `type` tag, as sent in an SSE `data:` field.
    pub fn body(&self) -> MessageBody<'_> {
        match self {
            StreamMessage::Initial { state, .. } => MessageBody::State(state),
            StreamMessage::Update { update, .. } => MessageBody::Update(update),
            StreamMessage::Raw { .. } => MessageBody::Update(&NULL),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Borrowed payload of a `StreamMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageBody<'a> {
    State(&'a Document),
    Update(&'a Value),
}

impl PartialEq<Value> for MessageBody<'_> {
    fn eq(&self, other: &Value) -> bool {
        match self {
            MessageBody::State(state) => *state == other,
            MessageBody::Update(update) => *update == other,
        }
    }
}

/// What a subscriber wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum StreamView {
    Live,
    /// The state as it was `delay_secs` ago.
    Delayed { delay_secs: f64 },
}

impl StreamView {
    /// A non-positive or NaN delay is the live view.
    pub fn from_delay(delay_secs: f64) -> Self {
        if delay_secs.is_nan() || delay_secs <= 0.0 {
            StreamView::Live
        } else {
            StreamView::Delayed { delay_secs }
        }
    }

    pub fn delay_secs(&self) -> f64 {
        match self {
            StreamView::Live => 0.0,
            StreamView::Delayed { delay_secs } => *delay_secs,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, StreamView::Live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_tag() {
        let msg = StreamMessage::Update {
            sequence: 7,
            timestamp_ms: 1_000,
            update: Arc::new(json!({"lapCount": {"currentLap": 12}})),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "update",
                "sequence": 7,
                "timestamp_ms": 1_000,
                "update": {"lapCount": {"currentLap": 12}}
            })
        );

        let parsed: StreamMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_from_frame() {
        let state = Arc::new(Document::from(json!({"a": 1})));
        let with_update = Frame {
            timestamp_ms: 10,
            sequence: 2,
            state: state.clone(),
            update: Some(Arc::new(json!({"a": 1}))),
        };
        assert_eq!(StreamMessage::from_frame(&with_update).event_name(), "update");

        let initial = Frame {
            update: None,
            ..with_update
        };
        let msg = StreamMessage::from_frame(&initial);
        assert_eq!(msg.event_name(), "initial");
        assert_eq!(msg.sequence(), Some(2));
        assert_eq!(msg.body(), json!({"a": 1}));
        assert_eq!(
            serde_json::to_string(&msg.body()).unwrap(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn test_raw_has_no_sequence() {
        let raw = RawMessage::new("updates", b"{\"M\":[]}".to_vec(), 42);
        let msg = StreamMessage::from_raw(&raw);
        assert_eq!(msg.sequence(), None);
        assert_eq!(msg.timestamp_ms(), 42);
        assert_eq!(msg.event_name(), "raw");
    }

    #[test]
    fn test_view_from_delay() {
        assert_eq!(StreamView::from_delay(0.0), StreamView::Live);
        assert_eq!(StreamView::from_delay(-1.0), StreamView::Live);
        assert_eq!(StreamView::from_delay(f64::NAN), StreamView::Live);
        assert_eq!(
            StreamView::from_delay(2.5),
            StreamView::Delayed { delay_secs: 2.5 }
        );
        assert_eq!(StreamView::Delayed { delay_secs: 2.5 }.delay_secs(), 2.5);
        assert!(StreamView::Live.is_live());
    }
}
