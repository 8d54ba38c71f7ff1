//! Tagged cell values shared by every store and the wire format

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

/// Date/time layouts recognized without any extra configuration
pub const DEFAULT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Date-only layouts, tried after the date/time layouts
pub const DEFAULT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%m/%d/%Y"];

/// ISO layout used when a date is rendered as text
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A single cell of a record
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum Value {
    /// Quantitative number
    Number(f64),
    /// Free text, including numbers and dates the store could not type
    Text(String),
    /// Calendar date or timestamp
    Date(NaiveDateTime),
    /// Missing value
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, parsing text when possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Temporal view of the value, parsing text with the default layouts
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Text rendering used for distinct counting and substring matching
    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format(ISO_FORMAT).to_string(),
            Value::Null => String::new(),
        }
    }

    /// Compare two values the way filters do.
    ///
    /// Returns `None` when the values have no meaningful order (e.g. text
    /// against a number that does not parse).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Number(a), Value::Text(_)) => other.as_f64().and_then(|b| a.partial_cmp(&b)),
            (Value::Text(_), Value::Number(b)) => self.as_f64().and_then(|a| a.partial_cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Text(_)) => other.as_datetime().map(|b| a.cmp(&b)),
            (Value::Text(_), Value::Date(b)) => self.as_datetime().map(|a| a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Number(_), Value::Date(_)) | (Value::Date(_), Value::Number(_)) => None,
        }
    }

    /// Total order used for sorting: numbers, then dates, then text, nulls last
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Number(_) => 0,
            Value::Date(_) => 1,
            Value::Text(_) => 2,
            Value::Null => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) | Value::Null => serializer.serialize_unit(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Date(d) => serializer.collect_str(&d.format(ISO_FORMAT)),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Text(b.to_string()),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
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

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Parse a finite number, accepting surrounding whitespace
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a date or timestamp with the default layouts
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    parse_datetime_with(raw, &[])
}

/// Parse a date or timestamp, trying `extra` layouts before the defaults.
///
/// RFC 3339 strings with an offset are normalized to UTC.
pub fn parse_datetime_with(raw: &str, extra: &[String]) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.len() < 6 {
        return None;
    }

    for format in extra {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }

    for format in DEFAULT_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }

    DEFAULT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_text_compares_with_number() {
        let a = Value::Text("10".into());
        let b = Value::Number(9.5);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
        assert_eq!(Value::Text("abc".into()).compare(&b), None);
    }

    #[test]
    fn test_datetime_formats() {
        assert!(parse_datetime("2023-01-01").is_some());
        assert!(parse_datetime("2023-02-01T10:30:00").is_some());
        assert!(parse_datetime("2023-02-01T10:30:00+02:00").is_some());
        assert!(parse_datetime("red").is_none());
        assert!(parse_datetime("12").is_none());

        let custom = vec!["%d %b %Y".to_string()];
        assert!(parse_datetime_with("05 Mar 2021", &custom).is_some());
    }

    #[test]
    fn test_sort_places_nulls_last() {
        let mut values = vec![
            Value::Null,
            Value::Text("b".into()),
            Value::Number(2.0),
            Value::Number(1.0),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values[0], Value::Number(1.0));
        assert_eq!(values[2], Value::Text("b".into()));
        assert!(values[3].is_null());
    }

    #[test]
    fn test_serialization() {
        let date = parse_datetime("2023-01-01").unwrap();
        let json = serde_json::to_string(&vec![
            Value::Number(1.5),
            Value::Text("x".into()),
            Value::Date(date),
            Value::Null,
            Value::Number(f64::NAN),
        ])
        .unwrap();
        assert_eq!(json, r#"[1.5,"x","2023-01-01T00:00:00",null,null]"#);

        let parsed: Vec<Value> = serde_json::from_str(r#"[3, "y", null, true]"#).unwrap();
        assert_eq!(parsed[0], Value::Number(3.0));
        assert_eq!(parsed[1], Value::Text("y".into()));
        assert!(parsed[2].is_null());
        assert_eq!(parsed[3], Value::Text("true".into()));
    }
}
