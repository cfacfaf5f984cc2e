//! Decompressor/normalizer for raw upstream messages
//!
//! Turns one `RawMessage` into at most one `ProcessedMessage`:
//!
//! ```text
//! {"R": {...}}                      → InitialState (full document by topic)
//! {"M": [{"A": [topic, data]}, ..]} → StateUpdate (fragments merged in order)
//! ```
//!
//! Topic fragments ending in `.z` are inflated, every object key is
//! rewritten to lower camel case, and keyframe markers are dropped. A bad
//! fragment is logged and skipped; it never aborts the rest of the message
//! and nothing is ever returned as an error to the caller.

use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use types::casing::{is_reserved_key, strip_compressed_suffix, to_camel_case};
use types::errors::DecodeError;
use types::message::{InitialState, ProcessedMessage, RawMessage, StateUpdate};

use crate::compression::{inflate_json, DEFAULT_MAX_INFLATED_BYTES};
use crate::merge::merge;

/// Envelope field carrying a full state.
const FULL_STATE_FIELD: &str = "R";
/// Envelope field carrying a list of hub invocations.
const UPDATES_FIELD: &str = "M";
/// Invocation field carrying `[topic, data, timestamp]`.
const ARGUMENTS_FIELD: &str = "A";

/// Configuration for the normalizer.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Ceiling on a single inflated fragment.
    pub max_inflated_bytes: usize,
    /// Raw topics whose `R` payload is a whole document keyed by topic.
    pub full_state_topics: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_inflated_bytes: DEFAULT_MAX_INFLATED_BYTES,
            full_state_topics: vec![
                String::new(),
                "simulation".to_string(),
                "updates".to_string(),
                "initial".to_string(),
            ],
        }
    }
}

/// Result of normalizing one raw message, with failure accounting for
/// metrics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizeOutcome {
    pub message: Option<ProcessedMessage>,
    /// Fragments discarded because they failed to decode.
    pub failed_fragments: usize,
    /// Whether the whole payload was unparsable.
    pub malformed: bool,
}

/// Stateless normalizer. Safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalize one raw message.
    pub fn process(&self, raw: &RawMessage) -> Option<ProcessedMessage> {
        self.process_with_outcome(raw).message
    }

    /// Normalize one raw message and report what was discarded.
    pub fn process_with_outcome(&self, raw: &RawMessage) -> NormalizeOutcome {
        let envelope: Value = match serde_json::from_slice(&raw.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    topic = %raw.topic,
                    bytes = raw.payload.len(),
                    error = %e,
                    "Discarding malformed message"
                );
                return NormalizeOutcome {
                    malformed: true,
                    ..NormalizeOutcome::default()
                };
            }
        };

        let Value::Object(mut envelope) = envelope else {
            debug!(topic = %raw.topic, "Ignoring non-object envelope");
            return NormalizeOutcome::default();
        };

        if let Some(data) = envelope.remove(FULL_STATE_FIELD) {
            return self.process_full_state(&raw.topic, data, raw.arrival_ms);
        }

        match envelope.remove(UPDATES_FIELD) {
            Some(Value::Array(invocations)) => self.process_updates(invocations, raw.arrival_ms),
            _ => {
                debug!(topic = %raw.topic, "Envelope carries no state");
                NormalizeOutcome::default()
            }
        }
    }

    fn is_full_state_topic(&self, topic: &str) -> bool {
        self.config.full_state_topics.iter().any(|t| t == topic)
    }

    fn process_full_state(&self, topic: &str, data: Value, timestamp_ms: i64) -> NormalizeOutcome {
        match data {
            Value::Object(topics) if self.is_full_state_topic(topic) => {
                let mut state = Map::new();
                let mut failed = 0;

                for (key, value) in topics {
                    if is_reserved_key(&key) {
                        continue;
                    }
                    match self.decode_fragment(&key, value) {
                        Ok((name, decoded)) => {
                            state.insert(name, decoded);
                        }
                        Err(e) => {
                            failed += 1;
                            error!(topic = %key, error = %e, kind = e.kind(), "Dropping fragment of full state");
                        }
                    }
                }

                if state.is_empty() && failed > 0 {
                    return NormalizeOutcome {
                        failed_fragments: failed,
                        ..NormalizeOutcome::default()
                    };
                }

                NormalizeOutcome {
                    message: Some(ProcessedMessage::Initial(InitialState::new(state, timestamp_ms))),
                    failed_fragments: failed,
                    malformed: false,
                }
            }
            Value::Object(_) | Value::String(_) => self.single_topic(topic, data, timestamp_ms),
            other => {
                debug!(topic, kind = value_kind(&other), "Ignoring scalar full-state payload");
                NormalizeOutcome::default()
            }
        }
    }

    // `R` for one named topic is merged like any other update, so a single
    // topic refresh never wipes the rest of the document.
    fn single_topic(&self, topic: &str, data: Value, timestamp_ms: i64) -> NormalizeOutcome {
        match self.decode_fragment(topic, data) {
            Ok((name, decoded)) => {
                let mut updates = Map::new();
                updates.insert(name, decoded);
                NormalizeOutcome {
                    message: Some(ProcessedMessage::Update(StateUpdate::new(updates, timestamp_ms))),
                    ..NormalizeOutcome::default()
                }
            }
            Err(e) => {
                error!(topic, error = %e, kind = e.kind(), "Dropping single-topic state");
                NormalizeOutcome {
                    failed_fragments: 1,
                    ..NormalizeOutcome::default()
                }
            }
        }
    }

    fn process_updates(&self, invocations: Vec<Value>, timestamp_ms: i64) -> NormalizeOutcome {
        let mut combined = Map::new();
        let mut failed = 0;

        for invocation in invocations {
            let Some((topic, data)) = split_invocation(invocation) else {
                debug!("Skipping invocation without topic arguments");
                continue;
            };

            match self.decode_fragment(&topic, data) {
                Ok((name, decoded)) => match combined.get_mut(&name) {
                    Some(existing) => merge(existing, &decoded),
                    None => {
                        combined.insert(name, decoded);
                    }
                },
                Err(e) => {
                    failed += 1;
                    error!(topic = %topic, error = %e, kind = e.kind(), "Dropping update fragment");
                }
            }
        }

        if combined.is_empty() {
            return NormalizeOutcome {
                failed_fragments: failed,
                ..NormalizeOutcome::default()
            };
        }

        NormalizeOutcome {
            message: Some(ProcessedMessage::Update(StateUpdate::new(combined, timestamp_ms))),
            failed_fragments: failed,
            malformed: false,
        }
    }

    /// Decode one `(topic, data)` fragment into its canonical name and value.
    fn decode_fragment(&self, topic: &str, data: Value) -> Result<(String, Value), DecodeError> {
        match strip_compressed_suffix(topic) {
            Some(base) => {
                let Value::String(encoded) = data else {
                    return Err(DecodeError::UnexpectedShape {
                        topic: topic.to_string(),
                        reason: format!("expected base64 string, got {}", value_kind(&data)),
                    });
                };
                let inflated = inflate_json(&encoded, self.config.max_inflated_bytes)?;
                Ok((to_camel_case(base), normalize_keys(inflated)))
            }
            None => Ok((to_camel_case(topic), normalize_keys(data))),
        }
    }
}

/// Rewrite every object key to lower camel case and drop reserved keys,
/// recursing through objects and arrays.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !is_reserved_key(key))
                .map(|(key, value)| (to_camel_case(&key), normalize_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn split_invocation(invocation: Value) -> Option<(String, Value)> {
    let Value::Object(mut invocation) = invocation else {
        return None;
    };
    let Some(Value::Array(arguments)) = invocation.remove(ARGUMENTS_FIELD) else {
        return None;
    };
    if arguments.len() < 2 {
        return None;
    }

    let mut arguments = arguments.into_iter();
    let topic = match arguments.next() {
        Some(Value::String(topic)) => topic,
        _ => return None,
    };
    let data = arguments.next()?;
    Some((topic, data))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
