//! Key naming conversion from the upstream convention
//!
//! Upstream topics and fields arrive in PascalCase (`TimingData`,
//! `RacingNumber`) or snake_case (`gap_to_leader`). The rest of the
//! pipeline uses lower camel case only.

/// Reserved metadata key marking a keyframe boundary. Carries no state.
pub const KEYFRAME_MARKER: &str = "_kf";

/// Suffix of topics whose payload is base64 encoded, zlib compressed JSON.
pub const COMPRESSED_SUFFIX: &str = ".z";

/// Topic names that do not follow the generic rule.
const TOPIC_ALIASES: &[(&str, &str)] = &[("Position", "positionData")];

/// Convert an upstream key into canonical lower camel case.
///
/// - `snake_case` → `snakeCase`
/// - `PascalCase` → `pascalCase`
/// - aliased topics map to their fixed names
pub fn to_camel_case(key: &str) -> String {
    if let Some((_, alias)) = TOPIC_ALIASES.iter().find(|(from, _)| *from == key) {
        return (*alias).to_string();
    }

    if key.contains('_') {
        let mut parts = key.split('_');
        let mut out = parts.next().unwrap_or_default().to_lowercase();
        for part in parts {
            out.push_str(&capitalize(part));
        }
        return out;
    }

    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Whether a key is transport metadata that must be dropped.
pub fn is_reserved_key(key: &str) -> bool {
    key == KEYFRAME_MARKER
}

/// Strip the compression suffix from a topic, if present.
pub fn strip_compressed_suffix(topic: &str) -> Option<&str> {
    topic.strip_suffix(COMPRESSED_SUFFIX)
}

// First letter upper, remainder lower.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case() {
        assert_eq!(to_camel_case("TimingData"), "timingData");
        assert_eq!(to_camel_case("RacingNumber"), "racingNumber");
        assert_eq!(to_camel_case("Lines"), "lines");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_camel_case("gap_to_leader"), "gapToLeader");
        assert_eq!(to_camel_case("TIME_DIFF"), "timeDiff");
        assert_eq!(to_camel_case("race_control_messages"), "raceControlMessages");
    }

    #[test]
    fn test_already_camel_and_numeric_keys() {
        assert_eq!(to_camel_case("sessionInfo"), "sessionInfo");
        assert_eq!(to_camel_case("44"), "44");
        assert_eq!(to_camel_case(""), "");
    }

    #[test]
    fn test_topic_alias() {
        assert_eq!(to_camel_case("Position"), "positionData");
    }

    #[test]
    fn test_reserved_and_suffix() {
        assert!(is_reserved_key("_kf"));
        assert!(!is_reserved_key("kf"));
        assert_eq!(strip_compressed_suffix("CarData.z"), Some("CarData"));
        assert_eq!(strip_compressed_suffix("CarData"), None);
    }
}
