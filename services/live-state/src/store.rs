//! Canonical state store
//!
//! Holds the single canonical state document. One writer (the pipeline)
//! applies initial states and updates in arrival order; any number of
//! readers take `Arc` snapshots that later writes never touch.
//!
//! The document lives behind one `RwLock` that is never shared with the
//! delay buffer. Every topic of the document sits behind its own `Arc`: a
//! write copies the topic map plus the topics the update names, and every
//! other topic stays shared with earlier snapshots and buffered frames.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use types::document::Document;
use types::message::{InitialState, StateUpdate};

use crate::merge::merge_topics;

/// Immutable view of the canonical document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Sequence of the last applied event; `0` before any.
    pub sequence: u64,
    /// Timestamp of the last applied event.
    pub timestamp_ms: Option<i64>,
    pub state: Arc<Document>,
}

impl StateSnapshot {
    pub fn has_data(&self) -> bool {
        self.sequence > 0
    }
}

/// Result of applying an update.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub snapshot: StateSnapshot,
    /// The document was cleared for a new session before merging, so the
    /// update alone no longer describes the change.
    pub session_reset: bool,
}

/// Store statistics for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    /// Updates applied since the last initial state.
    pub update_count: u64,
    pub last_update_ms: Option<i64>,
    /// Length of the compact JSON serialization.
    pub approx_size_bytes: usize,
    pub sequence: u64,
    pub has_data: bool,
}

struct StoreInner {
    document: Arc<Document>,
    sequence: u64,
    update_count: u64,
    last_update_ms: Option<i64>,
    /// Serialized length of each `"topic":value` entry.
    topic_sizes: BTreeMap<String, usize>,
    approx_size_bytes: usize,
}

impl StoreInner {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            sequence: self.sequence,
            timestamp_ms: self.last_update_ms,
            state: Arc::clone(&self.document),
        }
    }

    fn reset(&mut self, document: Document) {
        self.topic_sizes.clear();
        for (topic, value) in document.iter() {
            self.topic_sizes
                .insert(topic.to_string(), entry_len(topic, value));
        }
        self.document = Arc::new(document);
    }

    /// Re-measure only the named topics.
    fn resize<'a>(&mut self, topics: impl Iterator<Item = &'a String>) {
        for topic in topics {
            if let Some(value) = self.document.get(topic) {
                let len = entry_len(topic, value);
                self.topic_sizes.insert(topic.clone(), len);
            }
        }
    }

    fn record_write(&mut self, timestamp_ms: i64) {
        self.sequence += 1;
        self.last_update_ms = Some(timestamp_ms);
        // Braces plus one comma between entries.
        self.approx_size_bytes = 2
            + self.topic_sizes.values().sum::<usize>()
            + self.topic_sizes.len().saturating_sub(1);
    }
}

/// Single-writer canonical state store.
pub struct StateStore {
    inner: RwLock<StoreInner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                document: Arc::new(Document::new()),
                sequence: 0,
                update_count: 0,
                last_update_ms: None,
                topic_sizes: BTreeMap::new(),
                approx_size_bytes: 2,
            }),
        }
    }

    /// Replace the whole document. Resets the update counter.
    pub fn set_initial(&self, initial: &InitialState) -> StateSnapshot {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        inner.reset(Document::from(initial.state.clone()));
        inner.update_count = 0;
        inner.record_write(initial.timestamp_ms);

        info!(
            sequence = inner.sequence,
            topics = initial.topics().len(),
            size_bytes = inner.approx_size_bytes,
            "Initial state applied"
        );

        inner.snapshot()
    }

    /// Merge a partial update into the document.
    ///
    /// A change of `sessionInfo.name` marks a new session: the document is
    /// cleared before the update is merged. The update counter keeps
    /// running; only `set_initial` resets it.
    pub fn apply_update(&self, update: &StateUpdate) -> AppliedUpdate {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut session_reset = false;

        if let Some(next) = session_name(update.updates.get("sessionInfo")) {
            if let Some(current) = session_name(inner.document.get("sessionInfo")) {
                if current != next {
                    info!(from = current, to = next, "Session changed, resetting state");
                    inner.reset(Document::new());
                    session_reset = true;
                }
            }
        }

        if let Value::Object(topics) = &update.updates {
            merge_topics(Arc::make_mut(&mut inner.document), topics);
            inner.resize(topics.keys());
        }

        inner.update_count += 1;
        inner.record_write(update.timestamp_ms);

        debug!(
            sequence = inner.sequence,
            topics = ?update.topics(),
            "Update applied"
        );

        AppliedUpdate {
            snapshot: inner.snapshot(),
            session_reset,
        }
    }

    /// Current document as an immutable snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn statistics(&self) -> StoreStatistics {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        StoreStatistics {
            update_count: inner.update_count,
            last_update_ms: inner.last_update_ms,
            approx_size_bytes: inner.approx_size_bytes,
            sequence: inner.sequence,
            has_data: inner.sequence > 0,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sequence
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn session_name(session_info: Option<&Value>) -> Option<&str> {
    session_info
        .and_then(|info| info.get("name"))
        .and_then(Value::as_str)
}

fn entry_len(topic: &str, value: &Value) -> usize {
    let key = serde_json::to_vec(topic).map(|bytes| bytes.len()).unwrap_or(0);
    let value = serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0);
    key + 1 + value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn initial(value: Value, ts: i64) -> InitialState {
        InitialState::new(object(value), ts)
    }

    fn update(value: Value, ts: i64) -> StateUpdate {
        StateUpdate::new(object(value), ts)
    }

    #[test]
    fn test_empty_store() {
        let store = StateStore::new();
        let snapshot = store.snapshot();
        assert_eq!(*snapshot.state, json!({}));
        assert!(!snapshot.has_data());

        let stats = store.statistics();
        assert!(!stats.has_data);
        assert_eq!(stats.update_count, 0);
        assert_eq!(stats.last_update_ms, None);
    }

    #[test]
    fn test_initial_then_updates() {
        let store = StateStore::new();
        store.set_initial(&initial(json!({"weatherData": {"airTemp": "20.1"}}), 1_000));
        store.apply_update(&update(json!({"weatherData": {"trackTemp": "33.0"}}), 2_000));
        let applied = store.apply_update(&update(json!({"trackStatus": {"status": "1"}}), 3_000));
        assert!(!applied.session_reset);
        let snapshot = applied.snapshot;

        assert_eq!(
            *snapshot.state,
            json!({
                "trackStatus": {"status": "1"},
                "weatherData": {"airTemp": "20.1", "trackTemp": "33.0"}
            })
        );
        assert_eq!(snapshot.sequence, 3);

        let stats = store.statistics();
        assert_eq!(stats.update_count, 2);
        assert_eq!(stats.last_update_ms, Some(3_000));
        assert_eq!(stats.approx_size_bytes, serde_json::to_vec(&*snapshot.state).unwrap().len());
    }

    #[test]
    fn test_initial_replaces_and_resets_count() {
        let store = StateStore::new();
        store.set_initial(&initial(json!({"a": 1}), 1));
        store.apply_update(&update(json!({"b": 2}), 2));
        store.set_initial(&initial(json!({"c": 3}), 3));

        assert_eq!(*store.snapshot().state, json!({"c": 3}));
        assert_eq!(store.statistics().update_count, 0);
        assert_eq!(store.sequence(), 3);
    }

    #[test]
    fn test_update_before_initial() {
        let store = StateStore::new();
        store.apply_update(&update(json!({"heartbeat": {"utc": "t"}}), 5));
        assert_eq!(*store.snapshot().state, json!({"heartbeat": {"utc": "t"}}));
        assert!(store.statistics().has_data);
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let store = StateStore::new();
        store.set_initial(&initial(json!({"lapCount": {"currentLap": 1}}), 1));
        let before = store.snapshot();

        store.apply_update(&update(json!({"lapCount": {"currentLap": 2}}), 2));

        assert_eq!(before.state["lapCount"]["currentLap"], json!(1));
        assert_eq!(store.snapshot().state["lapCount"]["currentLap"], json!(2));
    }

    #[test]
    fn test_session_change_resets_document() {
        let store = StateStore::new();
        store.set_initial(&initial(
            json!({"sessionInfo": {"name": "Practice 3"}, "timingData": {"lines": {"1": {}}}}),
            1,
        ));
        store.apply_update(&update(json!({"lapCount": {"currentLap": 1}}), 2));
        let applied = store.apply_update(&update(json!({"sessionInfo": {"name": "Qualifying"}}), 3));
        assert!(applied.session_reset);

        assert_eq!(
            *store.snapshot().state,
            json!({"sessionInfo": {"name": "Qualifying"}})
        );
        // Only a new initial state resets the counter.
        assert_eq!(store.statistics().update_count, 2);
        assert_eq!(
            store.statistics().approx_size_bytes,
            serde_json::to_vec(&*store.snapshot().state).unwrap().len()
        );
    }

    #[test]
    fn test_untouched_topics_shared_between_versions() {
        let store = StateStore::new();
        let blob = "x".repeat(1 << 20);
        store.set_initial(&initial(
            json!({"static": {"blob": blob}, "lapCount": {"currentLap": 0}}),
            1,
        ));

        let mut versions = vec![store.snapshot()];
        for lap in 1..=50 {
            let applied = store.apply_update(&update(json!({"lapCount": {"currentLap": lap}}), 1 + lap));
            versions.push(applied.snapshot);
        }

        let first = versions[0].state.topic("static").unwrap();
        for version in &versions[1..] {
            assert!(Arc::ptr_eq(first, version.state.topic("static").unwrap()));
        }
        assert_eq!(versions[0].state["lapCount"]["currentLap"], json!(0));
        assert_eq!(versions[50].state["lapCount"]["currentLap"], json!(50));
        assert!(!Arc::ptr_eq(
            versions[49].state.topic("lapCount").unwrap(),
            versions[50].state.topic("lapCount").unwrap()
        ));
        assert_eq!(
            store.statistics().approx_size_bytes,
            serde_json::to_vec(&*versions[50].state).unwrap().len()
        );
    }

    #[test]
    fn test_non_object_initial_gives_empty_document() {
        let store = StateStore::new();
        store.set_initial(&InitialState {
            state: json!([1, 2]),
            timestamp_ms: 1,
        });
        assert_eq!(*store.snapshot().state, json!({}));
        assert_eq!(store.statistics().approx_size_bytes, 2);
    }

    #[test]
    fn test_same_session_name_keeps_document() {
        let store = StateStore::new();
        store.set_initial(&initial(json!({"sessionInfo": {"name": "Race"}, "lapCount": {}}), 1));
        store.apply_update(&update(json!({"sessionInfo": {"name": "Race", "path": "x"}}), 2));

        let state = store.snapshot().state;
        assert!(state.contains("lapCount"));
        assert_eq!(state["sessionInfo"]["path"], json!("x"));
    }
}
