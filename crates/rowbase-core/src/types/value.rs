//! Typed property values.
//!
//! Raw input is resolved into a [`TypedValue`] once, at the type system
//! boundary. Everything downstream (storage, filters, sort, formatting)
//! works with these closed variants.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// A numeric interval. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumberRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumberRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    pub fn overlaps(&self, other: &NumberRange) -> bool {
        let starts_before_other_ends = match (self.min, other.max) {
            (Some(a), Some(b)) => a <= b,
            _ => true,
        };
        let other_starts_before_end = match (other.min, self.max) {
            (Some(a), Some(b)) => a <= b,
            _ => true,
        };
        starts_before_other_ends && other_starts_before_end
    }
}

/// A date interval. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: DateTime<Utc>) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        let a = match (self.min, other.max) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        };
        let b = match (other.min, self.max) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        };
        a && b
    }
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub name: String,
    /// Storage key or path of the file.
    pub file: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Externally reachable URL, when the file lives in object storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, file: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            mime_type: mime_type.into(),
            size: None,
            storage_url: None,
        }
    }
}

/// The value of one property on one row.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    Number(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
    /// Option value of a SELECT.
    Select(String),
    /// Ordered option values of a MULTI_SELECT.
    MultiSelect(Vec<String>),
    NumberRange(NumberRange),
    DateRange(DateRange),
    Media(Vec<MediaFile>),
}

impl TypedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TypedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) | TypedValue::Select(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            TypedValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Values that carry no information read as absent.
    pub fn is_empty(&self) -> bool {
        match self {
            TypedValue::Text(s) | TypedValue::Select(s) => s.is_empty(),
            TypedValue::MultiSelect(v) => v.is_empty(),
            TypedValue::Media(v) => v.is_empty(),
            TypedValue::NumberRange(r) => r.min.is_none() && r.max.is_none(),
            TypedValue::DateRange(r) => r.min.is_none() && r.max.is_none(),
            TypedValue::Number(_) | TypedValue::Date(_) | TypedValue::Boolean(_) => false,
        }
    }

    /// Canonical form used for unique index keys.
    pub fn canonical_key(&self) -> String {
        match self {
            TypedValue::Text(s) | TypedValue::Select(s) => s.clone(),
            TypedValue::Number(n) => format_plain_number(*n),
            TypedValue::Date(d) => to_micros(d).to_string(),
            TypedValue::Boolean(b) => b.to_string(),
            other => other.to_json().to_string(),
        }
    }

    /// The consumer-facing JSON shape.
    pub fn to_json(&self) -> JsonValue {
        match self {
            TypedValue::Text(s) | TypedValue::Select(s) => JsonValue::String(s.clone()),
            TypedValue::Number(n) => number_to_json(*n),
            TypedValue::Date(d) => JsonValue::String(date_to_string(d)),
            TypedValue::Boolean(b) => JsonValue::Bool(*b),
            TypedValue::MultiSelect(values) => {
                JsonValue::Array(values.iter().cloned().map(JsonValue::String).collect())
            }
            TypedValue::NumberRange(r) => json!({
                "min": r.min.map(number_to_json),
                "max": r.max.map(number_to_json),
            }),
            TypedValue::DateRange(r) => json!({
                "min": r.min.as_ref().map(date_to_string),
                "max": r.max.as_ref().map(date_to_string),
            }),
            TypedValue::Media(files) => serde_json::to_value(files).unwrap_or(JsonValue::Null),
        }
    }
}

/// Integral values render as JSON integers so `100` reads back as `100`.
pub(crate) fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

pub(crate) fn format_plain_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub(crate) fn date_to_string(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Microseconds since the Unix epoch.
pub fn to_micros(d: &DateTime<Utc>) -> i64 {
    d.timestamp() * 1_000_000 + i64::from(d.timestamp_subsec_micros())
}

/// Inverse of [`to_micros`].
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_roundtrip_preserves_precision() {
        let d = Utc.with_ymd_and_hms(2024, 1, 31, 12, 30, 5).unwrap();
        assert_eq!(from_micros(to_micros(&d)), Some(d));
        assert_eq!(from_micros(-1).map(|d| to_micros(&d)), Some(-1));
    }

    #[test]
    fn test_number_json_keeps_integers_integral() {
        assert_eq!(TypedValue::Number(100.0).to_json(), json!(100));
        assert_eq!(TypedValue::Number(2.5).to_json(), json!(2.5));
    }

    #[test]
    fn test_range_overlap_with_open_bounds() {
        let jan = NumberRange::new(Some(1.0), Some(31.0));
        assert!(jan.overlaps(&NumberRange::new(Some(31.0), None)));
        assert!(!jan.overlaps(&NumberRange::new(Some(32.0), Some(40.0))));
        assert!(jan.overlaps(&NumberRange::new(None, None)));
    }

    #[test]
    fn test_empty_values() {
        assert!(TypedValue::Text(String::new()).is_empty());
        assert!(TypedValue::MultiSelect(vec![]).is_empty());
        assert!(!TypedValue::Boolean(false).is_empty());
    }
}
