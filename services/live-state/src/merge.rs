//! Recursive merge of partial state updates into the canonical document
//!
//! Rules, applied at every position where `update` is merged onto `base`:
//! 1. map + map: keys of `update` merged in recursively, keys only in
//!    `base` untouched
//! 2. array + array: append (`base` followed by `update`)
//! 3. array + map with integer-string keys: sparse edit of existing
//!    elements; out-of-range or non-integer keys are ignored and the array
//!    never grows
//! 4. anything else: `update` replaces `base`
//!
//! Repeated application of deltas must converge to the same document as a
//! single application of the equivalent full update; every downstream view
//! depends on it.

use serde_json::{Map, Value};
use types::document::Document;

/// Merge `update` into `base` in place.
pub fn merge(base: &mut Value, update: &Value) {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            merge_maps(base_map, update_map);
        }
        (Value::Array(base_items), Value::Array(update_items)) => {
            base_items.extend(update_items.iter().cloned());
        }
        (Value::Array(base_items), Value::Object(edits)) => {
            apply_indexed_edits(base_items, edits);
        }
        (base, update) => {
            *base = update.clone();
        }
    }
}

/// Merge two update fragments offline, `first` then `second`.
pub fn merge_documents(first: &Value, second: &Value) -> Value {
    let mut combined = first.clone();
    merge(&mut combined, second);
    combined
}

/// Merge a topic-keyed update into a document. Only topics named in
/// `update` are written; every other topic keeps its shared allocation.
pub fn merge_topics(document: &mut Document, update: &Map<String, Value>) {
    for (topic, delta) in update {
        match document.get_mut(topic) {
            Some(current) => merge(current, delta),
            None => document.insert(topic.clone(), delta.clone()),
        }
    }
}

fn merge_maps(base: &mut Map<String, Value>, update: &Map<String, Value>) {
    for (key, update_value) in update {
        match base.get_mut(key) {
            Some(base_value) => merge(base_value, update_value),
            None => {
                base.insert(key.clone(), update_value.clone());
            }
        }
    }
}

fn apply_indexed_edits(items: &mut [Value], edits: &Map<String, Value>) {
    for (key, edit) in edits {
        let Some(index) = parse_index(key) else {
            continue;
        };
        if let Some(item) = items.get_mut(index) {
            merge(item, edit);
        }
    }
}

// Only canonical non-negative integers ("0", "12"); "+1" and "01" are not
// indices.
fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_map_merge_keeps_untouched_keys() {
        let mut base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge(&mut base, &json!({"b": {"c": 9}, "e": "new"}));
        assert_eq!(base, json!({"a": 1, "b": {"c": 9, "d": 3}, "e": "new"}));
    }

    #[test]
    fn test_array_append() {
        let mut base = json!(["a"]);
        merge(&mut base, &json!(["b"]));
        assert_eq!(base, json!(["a", "b"]));
    }

    #[test]
    fn test_indexed_partial_edit() {
        let mut base = json!([{"x": 1}, {"x": 2}]);
        merge(&mut base, &json!({"1": {"x": 9}}));
        assert_eq!(base, json!([{"x": 1}, {"x": 9}]));
    }

    #[test]
    fn test_indexed_edit_out_of_range_ignored() {
        let mut base = json!([{"x": 1}, {"x": 2}]);
        merge(&mut base, &json!({"5": {"x": 9}}));
        assert_eq!(base, json!([{"x": 1}, {"x": 2}]));
    }

    #[test]
    fn test_indexed_edit_non_integer_keys_ignored() {
        let mut base = json!([1, 2, 3]);
        merge(&mut base, &json!({"first": 0, "-1": 0, "01": 0, "2": 30}));
        assert_eq!(base, json!([1, 2, 30]));
    }

    #[test]
    fn test_indexed_edit_scalar_replaces_element() {
        let mut base = json!([{"status": 0}, "x"]);
        merge(&mut base, &json!({"0": 5, "1": {"y": 1}}));
        assert_eq!(base, json!([5, {"y": 1}]));
    }

    #[test]
    fn test_type_mismatch_replaces() {
        let mut base = json!({"v": {"nested": true}});
        merge(&mut base, &json!({"v": "flat"}));
        assert_eq!(base, json!({"v": "flat"}));

        let mut base = json!({"v": [1, 2]});
        merge(&mut base, &json!({"v": 3}));
        assert_eq!(base, json!({"v": 3}));
    }

    #[test]
    fn test_null_replaces() {
        let mut base = json!({"v": {"a": 1}});
        merge(&mut base, &json!({"v": null}));
        assert_eq!(base, json!({"v": null}));
    }

    #[test]
    fn test_merge_into_null_base() {
        let mut base = Value::Null;
        merge(&mut base, &json!({"a": {"b": 1}}));
        assert_eq!(base, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_timing_line_update() {
        let mut base = json!({
            "timingData": {
                "lines": {
                    "44": {
                        "line": 2,
                        "sectors": [{"value": "29.1"}, {"value": "30.2"}, {"value": ""}]
                    }
                }
            }
        });
        merge(
            &mut base,
            &json!({"timingData": {"lines": {"44": {"sectors": {"2": {"value": "28.7"}}}}}}),
        );

        assert_eq!(
            base["timingData"]["lines"]["44"]["sectors"][2]["value"],
            json!("28.7")
        );
        assert_eq!(base["timingData"]["lines"]["44"]["line"], json!(2));
    }

    #[test]
    fn test_merge_documents() {
        let u1 = json!({"weatherData": {"airTemp": "21.0"}});
        let u2 = json!({"weatherData": {"trackTemp": "35.0"}});
        assert_eq!(
            merge_documents(&u1, &u2),
            json!({"weatherData": {"airTemp": "21.0", "trackTemp": "35.0"}})
        );
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ]
    }

    fn arb_tree() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::btree_map("[a-e]", inner.clone(), 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
                prop::collection::vec(inner, 0..3).prop_map(Value::Array),
            ]
        })
    }

    fn arb_fragment(keys: &'static str) -> impl Strategy<Value = Value> {
        prop::collection::btree_map(keys, arb_tree(), 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    fn leaves(value: &Value) -> Value {
        // Rebuild the same shape restricted to map branches; arrays are
        // dropped because re-applying an array appends.
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_array())
                    .map(|(k, v)| (k.clone(), leaves(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    proptest! {
        #[test]
        fn prop_noop_update_leaves_document_unchanged(doc in arb_fragment("[a-f]")) {
            let mut base = doc.clone();
            let before = serde_json::to_vec(&base).unwrap();
            merge(&mut base, &leaves(&doc));
            let after = serde_json::to_vec(&base).unwrap();
            prop_assert_eq!(before, after);
        }

        #[test]
        fn prop_sequential_equals_combined(
            base in arb_fragment("[a-f]"),
            u1 in arb_fragment("[a-c]"),
            u2 in arb_fragment("[d-f]"),
        ) {
            let mut sequential = base.clone();
            merge(&mut sequential, &u1);
            merge(&mut sequential, &u2);

            let mut combined = base.clone();
            merge(&mut combined, &merge_documents(&u1, &u2));

            prop_assert_eq!(sequential, combined);
        }
    }
}
