//! Integer coercion for upstream numeric fields
//!
//! The upstream feed sometimes sends a boolean where an integer is
//! expected (`"Line": false`, `"Status": true`). Consumers rely on the
//! coerced values below, so they are kept exactly:
//!
//! - `line` in timing lines: `false` → absent, `true` → `1`
//! - `line` in the driver roster and `status` fields: `false` → `0`,
//!   `true` → `1`, anything unusable → `0`

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Read an integer from a JSON number, accepting integral floats.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

/// Coercion used for optional integer fields: `false` means absent.
pub fn coerce_optional(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(true) => Some(1),
        Value::Bool(false) => None,
        other => as_integer(other),
    }
}

/// Coercion used for integer fields with a zero default.
pub fn coerce_or_zero(value: &Value) -> i64 {
    match value {
        Value::Bool(flag) => i64::from(*flag),
        other => as_integer(other).unwrap_or(0),
    }
}

/// serde helper for `Option<i64>` fields that may arrive as booleans.
pub fn deserialize_optional_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_optional(&value))
}

/// serde helper for `i64` fields that may arrive as booleans.
pub fn deserialize_int_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_or_zero(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_integer() {
        assert_eq!(as_integer(&json!(12)), Some(12));
        assert_eq!(as_integer(&json!(3.0)), Some(3));
        assert_eq!(as_integer(&json!(3.5)), None);
        assert_eq!(as_integer(&json!("3")), None);
        assert_eq!(as_integer(&json!(null)), None);
    }

    #[test]
    fn test_coerce_optional() {
        assert_eq!(coerce_optional(&json!(4)), Some(4));
        assert_eq!(coerce_optional(&json!(true)), Some(1));
        assert_eq!(coerce_optional(&json!(false)), None);
        assert_eq!(coerce_optional(&json!("x")), None);
    }

    #[test]
    fn test_coerce_or_zero() {
        assert_eq!(coerce_or_zero(&json!(2049)), 2049);
        assert_eq!(coerce_or_zero(&json!(true)), 1);
        assert_eq!(coerce_or_zero(&json!(false)), 0);
        assert_eq!(coerce_or_zero(&json!(null)), 0);
    }
}
