//! Cell values shared by datasets, the comparator and the remote store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

/// A row fetched from the remote store, keyed by column name.
pub type Record = BTreeMap<String, Value>;

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    /// Structured value (object or array) held natively.
    Json(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text form used for string parameters and reference-key matching.
    ///
    /// Integral floats render without a fraction, so `42` and `42.0` share
    /// a key. Structured values render canonically.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(f.to_string()),
            Value::Timestamp(ts) => Some(format_timestamp(ts)),
            Value::Text(s) => Some(s.clone()),
            Value::Json(v) => Some(canonical_json(v)),
        }
    }

    /// JSON rendering for output files.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Timestamp(ts) => JsonValue::String(format_timestamp(ts)),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::Text(s),
            structured @ (JsonValue::Array(_) | JsonValue::Object(_)) => Value::Json(structured),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "NULL"),
        }
    }
}

/// RFC 3339 with microseconds and a `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Deterministic encoding of a structured value: object keys sorted at every
/// level, no insignificant whitespace.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": {"z": 1, "a": [2, {"y": true, "x": null}]}, "a": "s"});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":"s","b":{"a":[2,{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn json_numbers_map_to_int_or_float() {
        assert_eq!(Value::from(json!(7)), Value::Int(7));
        assert_eq!(Value::from(json!(7.5)), Value::Float(7.5));
        assert_eq!(Value::from(json!([1])), Value::Json(json!([1])));
        assert_eq!(Value::from(json!(null)), Value::Null);
    }

    #[test]
    fn integral_float_shares_text_with_int() {
        assert_eq!(Value::Float(42.0).to_text(), Value::Int(42).to_text());
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::Float(f64::NAN).to_text(), None);
    }

    #[test]
    fn timestamps_render_as_rfc3339_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Value::Timestamp(ts).to_text().unwrap(),
            "2024-03-01T12:30:00.000000Z"
        );
    }
}
