//! Canonical state document
//!
//! The document is a map from topic name (`timingData`, `carData`, ...) to
//! that topic's JSON value. Each topic sits behind its own `Arc`, so two
//! versions of the document share every topic neither of them changed.
//! Only the topics an update touches are copied on write.
//!
//! Serializes exactly like the equivalent `serde_json` object.

use std::collections::BTreeMap;
use std::ops::Index;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// Topic-keyed state document with per-topic structural sharing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    topics: BTreeMap<String, Arc<Value>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, topic: &str) -> Option<&Value> {
        self.topics.get(topic).map(|value| value.as_ref())
    }

    /// Shared handle to a topic's value.
    pub fn topic(&self, topic: &str) -> Option<&Arc<Value>> {
        self.topics.get(topic)
    }

    /// Mutable access to one topic. Copies the topic first if another
    /// document version still shares it.
    pub fn get_mut(&mut self, topic: &str) -> Option<&mut Value> {
        self.topics.get_mut(topic).map(Arc::make_mut)
    }

    pub fn insert(&mut self, topic: impl Into<String>, value: Value) {
        self.topics.insert(topic.into(), Arc::new(value));
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Topics in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.topics
            .iter()
            .map(|(topic, value)| (topic.as_str(), value.as_ref()))
    }

    /// Deep copy as a plain JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(topic, value)| (topic.to_string(), value.clone()))
                .collect(),
        )
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            topics: map
                .into_iter()
                .map(|(topic, value)| (topic, Arc::new(value)))
                .collect(),
        }
    }
}

/// Objects become one topic per key; any other value yields an empty
/// document.
impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => map.into(),
            _ => Self::default(),
        }
    }
}

/// Missing topics index to `null`, like `serde_json::Value`.
impl Index<&str> for Document {
    type Output = Value;

    fn index(&self, topic: &str) -> &Value {
        self.get(topic).unwrap_or(&NULL)
    }
}

impl PartialEq<Value> for Document {
    fn eq(&self, other: &Value) -> bool {
        match other {
            Value::Object(map) => {
                map.len() == self.topics.len()
                    && map
                        .iter()
                        .all(|(topic, value)| self.get(topic) == Some(value))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_like_object() {
        let value = json!({"weatherData": {"airTemp": "21.0"}, "lapCount": {"currentLap": 3}});
        let doc = Document::from(value.clone());

        assert_eq!(serde_json::to_vec(&doc).unwrap(), serde_json::to_vec(&value).unwrap());
        assert_eq!(serde_json::from_value::<Document>(value.clone()).unwrap(), doc);
        assert_eq!(doc, value);
        assert_eq!(doc.to_value(), value);
    }

    #[test]
    fn test_clone_shares_topics_until_written() {
        let mut first = Document::from(json!({"a": {"x": 1}, "b": {"y": 2}}));
        let second = first.clone();

        *first.get_mut("a").unwrap() = json!({"x": 9});

        assert!(Arc::ptr_eq(first.topic("b").unwrap(), second.topic("b").unwrap()));
        assert!(!Arc::ptr_eq(first.topic("a").unwrap(), second.topic("a").unwrap()));
        assert_eq!(second["a"], json!({"x": 1}));
    }

    #[test]
    fn test_index_and_non_object() {
        let doc = Document::from(json!({"a": 1}));
        assert_eq!(doc["a"], json!(1));
        assert_eq!(doc["missing"], Value::Null);

        assert!(Document::from(json!([1, 2])).is_empty());
        assert_ne!(Document::new(), json!([]));
    }
}
