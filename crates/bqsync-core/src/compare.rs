//! Semantic equality between a stored value and a freshly computed one.
//!
//! Values read back from the store rarely share the representation of the
//! values being written: booleans come back as `"true"`, structured values as
//! serialized text, integers as floats. Comparing raw representations would
//! plan the same update on every run, so the planner only ever asks
//! [`values_equal`].

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::literal::parse_literal;
use crate::value::{canonical_json, Value};

/// A value reduced to its semantic kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Null,
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    Structured(JsonValue),
}

impl Normalized {
    fn as_number(&self) -> Option<f64> {
        match self {
            Normalized::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Normalized::Number(n) => Some(*n),
            Normalized::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

/// Reduce a value to its semantic kind.
///
/// Text is probed as a boolean literal (case-insensitive), then, when it
/// opens with `{` or `[`, as strict JSON and finally as a permissive literal.
/// NaN is treated as absent.
pub fn normalize(value: &Value) -> Normalized {
    match value {
        Value::Null => Normalized::Null,
        Value::Bool(b) => Normalized::Bool(*b),
        Value::Int(i) => Normalized::Number(*i as f64),
        Value::Float(f) if f.is_nan() => Normalized::Null,
        Value::Float(f) => Normalized::Number(*f),
        Value::Timestamp(ts) => Normalized::Timestamp(*ts),
        Value::Text(s) => normalize_text(s),
        Value::Json(v @ (JsonValue::Object(_) | JsonValue::Array(_))) => {
            Normalized::Structured(v.clone())
        }
        Value::Json(scalar) => normalize(&Value::from(scalar.clone())),
    }
}

fn normalize_text(s: &str) -> Normalized {
    let lower = s.to_lowercase();
    if lower == "true" {
        return Normalized::Bool(true);
    }
    if lower == "false" {
        return Normalized::Bool(false);
    }
    if s.starts_with('{') || s.starts_with('[') {
        if let Some(parsed) = serde_json::from_str::<JsonValue>(s)
            .ok()
            .or_else(|| parse_literal(s))
        {
            return Normalized::Structured(parsed);
        }
    }
    Normalized::Text(s.to_string())
}

/// Whether `existing` and `new` denote the same value.
///
/// Structured values compare by canonical serialization, booleans by
/// identity, anything numeric (including numeric text and booleans) as
/// floating point, everything else by normalized equality.
pub fn values_equal(existing: &Value, new: &Value) -> bool {
    let a = normalize(existing);
    let b = normalize(new);

    match (&a, &b) {
        (Normalized::Structured(x), Normalized::Structured(y)) => {
            return canonical_json(x) == canonical_json(y);
        }
        (Normalized::Bool(x), Normalized::Bool(y)) => return x == y,
        _ => {}
    }

    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x == y;
    }

    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn boolean_text_equals_boolean() {
        assert!(values_equal(&text("true"), &Value::Bool(true)));
        assert!(values_equal(&text("FALSE"), &Value::Bool(false)));
        assert!(!values_equal(&text("true"), &Value::Bool(false)));
    }

    #[test]
    fn json_text_equals_structure_regardless_of_key_order() {
        assert!(values_equal(
            &text(r#"{"a":1,"b":2}"#),
            &Value::Json(json!({"b": 2, "a": 1}))
        ));
        assert!(!values_equal(
            &text(r#"{"a":1,"b":3}"#),
            &Value::Json(json!({"b": 2, "a": 1}))
        ));
    }

    #[test]
    fn literal_text_falls_back_to_permissive_parse() {
        assert!(values_equal(
            &text("{'tags': ['x', 'y'], 'ok': True}"),
            &Value::Json(json!({"ok": true, "tags": ["x", "y"]}))
        ));
    }

    #[test]
    fn numeric_text_equals_numbers() {
        assert!(values_equal(&text("42"), &Value::Float(42.0)));
        assert!(values_equal(&Value::Int(42), &Value::Float(42.0)));
        assert!(values_equal(&text(" 3.5 "), &Value::Float(3.5)));
        assert!(!values_equal(&Value::Int(1), &Value::Int(2)));
    }

    #[test]
    fn booleans_coerce_numerically_against_numbers() {
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!values_equal(&Value::Bool(true), &Value::Int(2)));
    }

    #[test]
    fn distinct_text_is_unequal() {
        assert!(!values_equal(&text("abc"), &text("abd")));
        assert!(values_equal(&text("abc"), &text("abc")));
    }

    #[test]
    fn nulls_and_nan() {
        assert!(values_equal(&Value::Null, &Value::Null));
        assert!(values_equal(&Value::Null, &Value::Float(f64::NAN)));
        assert!(!values_equal(&Value::Null, &text("")));
        assert!(!values_equal(&Value::Null, &Value::Int(0)));
    }

    #[test]
    fn malformed_json_text_stays_text() {
        assert_eq!(normalize(&text("{not json")), Normalized::Text("{not json".into()));
        assert!(!values_equal(&text("{not json"), &Value::Json(json!({}))));
    }

    #[test]
    fn deeply_nested_text_stays_text() {
        let deep = "[".repeat(200_000);
        assert_eq!(normalize(&text(&deep)), Normalized::Text(deep.clone()));
        assert!(values_equal(&text(&deep), &text(&deep)));
        assert!(!values_equal(&text(&deep), &Value::Json(json!([]))));
    }

    #[test]
    fn timestamps_compare_by_instant() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(values_equal(&Value::Timestamp(ts), &Value::Timestamp(ts)));
        assert!(!values_equal(
            &Value::Timestamp(ts),
            &Value::Timestamp(ts + chrono::Duration::seconds(1))
        ));
    }

    #[test]
    fn structured_against_scalar_is_unequal() {
        assert!(!values_equal(&Value::Json(json!([1])), &Value::Int(1)));
    }
}
