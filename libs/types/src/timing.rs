//! Typed views over the timing and driver branches of the state document
//!
//! Topics of the canonical document stay untyped `serde_json::Value`s; these
//! structs are a thin facade for the parts presentation code reads. Every
//! field is lenient (`#[serde(default)]`) so partially populated branches
//! still decode, and numeric fields accept the upstream boolean quirk (see
//! `crate::numeric`).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::numeric::{deserialize_int_or_zero, deserialize_optional_int};

/// `timingData` branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingData {
    pub session_part: Option<i64>,
    pub withheld: Option<bool>,
    /// Keyed by racing number.
    pub lines: BTreeMap<String, TimingLine>,
}

/// Timing for one driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingLine {
    pub racing_number: Option<String>,
    /// Classification position. A boolean `false` upstream means absent.
    #[serde(deserialize_with = "deserialize_optional_int")]
    pub line: Option<i64>,
    pub gap_to_leader: Option<String>,
    pub time_diff_to_fastest: Option<String>,
    pub time_diff_to_position_ahead: Option<String>,
    #[serde(deserialize_with = "deserialize_sectors")]
    pub sectors: Vec<Sector>,
    pub best_lap_time: Option<LapTime>,
    pub last_lap_time: Option<LapTime>,
}

/// One sector of a timing line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sector {
    pub stopped: bool,
    pub value: String,
    pub previous_value: Option<String>,
    #[serde(deserialize_with = "deserialize_int_or_zero")]
    pub status: i64,
    pub overall_fastest: bool,
    pub personal_fastest: bool,
    #[serde(deserialize_with = "deserialize_segments")]
    pub segments: Vec<Segment>,
}

/// Mini-sector status marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Segment {
    #[serde(deserialize_with = "deserialize_int_or_zero")]
    pub status: i64,
}

/// Lap time with fastest flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LapTime {
    pub value: String,
    #[serde(deserialize_with = "deserialize_int_or_zero")]
    pub status: i64,
    pub overall_fastest: bool,
    pub personal_fastest: bool,
}

/// Entry of the `driverList` branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverEntry {
    pub racing_number: String,
    pub broadcast_name: String,
    pub full_name: String,
    pub tla: String,
    /// Roster position. A boolean upstream coerces to `0`/`1`.
    #[serde(deserialize_with = "deserialize_int_or_zero")]
    pub line: i64,
    pub team_name: String,
    pub team_colour: String,
    pub first_name: String,
    pub last_name: String,
    pub headshot_url: Option<String>,
    pub country_code: String,
}

impl TimingData {
    /// Decode the `timingData` branch of a canonical document.
    pub fn from_document(document: &Document) -> Option<Self> {
        document
            .get("timingData")
            .and_then(|branch| serde_json::from_value(branch.clone()).ok())
    }

    /// Lines sorted by classification position; lines without a position last.
    pub fn ordered_lines(&self) -> Vec<(&str, &TimingLine)> {
        let mut lines: Vec<(&str, &TimingLine)> = self
            .lines
            .iter()
            .map(|(number, line)| (number.as_str(), line))
            .collect();
        lines.sort_by_key(|(number, line)| (line.line.unwrap_or(i64::MAX), number.to_string()));
        lines
    }
}

/// Decode the `driverList` branch, skipping entries that are not objects
/// (the upstream roster carries a few scalar bookkeeping keys).
pub fn driver_list(document: &Document) -> BTreeMap<String, DriverEntry> {
    let Some(Value::Object(entries)) = document.get("driverList") else {
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter(|(_, entry)| entry.is_object())
        .filter_map(|(number, entry)| {
            serde_json::from_value::<DriverEntry>(entry.clone())
                .ok()
                .map(|driver| (number.clone(), driver))
        })
        .collect()
}

// Sectors arrive as an array on a keyframe and as an index-keyed object
// when only some sectors are present.
fn deserialize_sectors<'de, D>(deserializer: D) -> Result<Vec<Sector>, D::Error>
where
    D: Deserializer<'de>,
{
    indexed_list(deserializer)
}

fn deserialize_segments<'de, D>(deserializer: D) -> Result<Vec<Segment>, D::Error>
where
    D: Deserializer<'de>,
{
    indexed_list(deserializer)
}

fn indexed_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut indexed: Vec<(usize, Value)> = map
                .into_iter()
                .filter_map(|(key, item)| key.parse::<usize>().ok().map(|idx| (idx, item)))
                .collect();
            indexed.sort_by_key(|(idx, _)| *idx);
            indexed.into_iter().map(|(_, item)| item).collect()
        }
        _ => Vec::new(),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_line_false_decodes_to_absent() {
        let line: TimingLine = serde_json::from_value(json!({
            "racingNumber": "44",
            "line": false,
            "gapToLeader": "+1.234"
        }))
        .unwrap();

        assert_eq!(line.line, None);
        assert_eq!(line.racing_number.as_deref(), Some("44"));
    }

    #[test]
    fn test_line_true_and_int() {
        let line: TimingLine = serde_json::from_value(json!({"line": true})).unwrap();
        assert_eq!(line.line, Some(1));

        let line: TimingLine = serde_json::from_value(json!({"line": 7})).unwrap();
        assert_eq!(line.line, Some(7));
    }

    #[test]
    fn test_sector_status_bool_coerces() {
        let sector: Sector = serde_json::from_value(json!({
            "stopped": false,
            "value": "26.259",
            "status": false,
            "overallFastest": false,
            "personalFastest": true,
            "segments": [{"status": 2049}, {"status": true}, {"status": false}]
        }))
        .unwrap();

        assert_eq!(sector.status, 0);
        let statuses: Vec<i64> = sector.segments.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![2049, 1, 0]);
    }

    #[test]
    fn test_driver_line_false_is_zero() {
        let driver: DriverEntry = serde_json::from_value(json!({
            "racingNumber": "1",
            "tla": "VER",
            "line": false
        }))
        .unwrap();
        assert_eq!(driver.line, 0);
        assert_eq!(driver.tla, "VER");
    }

    #[test]
    fn test_sectors_as_indexed_object() {
        let line: TimingLine = serde_json::from_value(json!({
            "sectors": {
                "1": {"value": "30.100"},
                "0": {"value": "29.900"}
            }
        }))
        .unwrap();

        let values: Vec<&str> = line.sectors.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, vec!["29.900", "30.100"]);
    }

    #[test]
    fn test_timing_data_from_document_orders_lines() {
        let doc = Document::from(json!({
            "timingData": {
                "lines": {
                    "44": {"line": 2},
                    "1": {"line": 1},
                    "16": {"line": false}
                }
            }
        }));

        let timing = TimingData::from_document(&doc).unwrap();
        let order: Vec<&str> = timing.ordered_lines().iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["1", "44", "16"]);
    }

    #[test]
    fn test_driver_list_skips_scalars() {
        let doc = Document::from(json!({
            "driverList": {
                "_kf": true,
                "1": {"racingNumber": "1", "tla": "VER", "line": 1},
                "44": {"racingNumber": "44", "tla": "HAM", "line": true}
            }
        }));

        let drivers = driver_list(&doc);
        assert_eq!(drivers.len(), 2);
        assert_eq!(drivers["44"].line, 1);
    }

    #[test]
    fn test_missing_branch() {
        assert!(TimingData::from_document(&Document::new()).is_none());
        assert!(driver_list(&Document::new()).is_empty());
    }
}
