//! Built-in property type handlers.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde_json::Value as JsonValue;

use super::kind::{PropertyKind, PropertyType, ValueStore};
use super::locale::Locale;
use super::stored::{MediaEntry, MultipleEntry, RangeCell, ScalarCell, StoredValue};
use super::value::{from_micros, to_micros, DateRange, MediaFile, NumberRange, TypedValue};
use crate::query::filter::{like_match, FilterOp, FilterOperand};

/// Storage, parsing, formatting and filter rules for one property type.
///
/// Implementations are registered in a
/// [`PropertyTypeRegistry`](super::PropertyTypeRegistry); the row store and
/// query engine only ever talk to the registry.
pub trait PropertyTypeHandler: Send + Sync {
    /// The type this handler serves.
    fn property_type(&self) -> PropertyType;

    /// Sub-store holding values of this type.
    fn store(&self) -> ValueStore;

    /// Check the attribute set at schema definition time.
    fn validate_attributes(&self, _kind: &PropertyKind) -> Result<(), String> {
        Ok(())
    }

    /// Parse raw JSON input. `null` never reaches this method.
    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String>;

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue>;

    /// `None` when the stored shape does not belong to this type.
    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue>;

    fn format(&self, kind: &PropertyKind, value: &TypedValue, locale: &Locale) -> String;

    fn compare(&self, kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering;

    /// Binary operators this type supports. `isEmpty` and `isNotEmpty`
    /// are supported by every type and are not listed.
    fn operators(&self) -> &'static [FilterOp];

    fn parse_operand(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        raw: &JsonValue,
    ) -> Result<FilterOperand, String> {
        match op {
            FilterOp::In | FilterOp::NotIn | FilterOp::All => {
                let items = match raw {
                    JsonValue::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                };
                items
                    .into_iter()
                    .map(|item| self.parse(kind, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(FilterOperand::Values)
            }
            _ => self.parse(kind, raw).map(FilterOperand::Value),
        }
    }

    /// Evaluate a binary operator. `value` is `None` for rows without a value.
    fn matches(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool;
}

fn parse_number(raw: &JsonValue) -> Result<f64, String> {
    let value = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{raw} is not a number"))
}

fn round_to(value: f64, decimals: Option<u8>) -> f64 {
    match decimals {
        Some(d) => {
            let factor = 10f64.powi(i32::from(d));
            (value * factor).round() / factor
        }
        None => value,
    }
}

fn parse_date(raw: &JsonValue, include_time: bool) -> Result<DateTime<Utc>, String> {
    let parsed = match raw {
        JsonValue::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
        }
        // Integers are milliseconds since the epoch.
        JsonValue::Number(n) => n.as_i64().and_then(|ms| from_micros(ms.saturating_mul(1_000))),
        _ => None,
    };
    // Storage keeps microseconds.
    let date = parsed.ok_or_else(|| format!("{raw} is not a valid date"))?.trunc_subsecs(6);
    if include_time {
        Ok(date)
    } else {
        date.date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| format!("{raw} is not a valid date"))
    }
}

fn parse_bool(raw: &JsonValue) -> Result<bool, String> {
    match raw {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(true),
        JsonValue::Number(n) if n.as_i64() == Some(0) => Ok(false),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        other => Err(format!("{other} is not a boolean")),
    }
}

fn scalar_text(raw: &JsonValue) -> Result<String, String> {
    match raw {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(format!("{other} is not text")),
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

fn cmp_bound<T, F>(a: Option<T>, b: Option<T>, cmp: F) -> Ordering
where
    F: Fn(T, T) -> Ordering,
{
    match (a, b) {
        (Some(a), Some(b)) => cmp(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn ordered_match(op: FilterOp, ordering: Ordering) -> bool {
    match op {
        FilterOp::Eq => ordering == Ordering::Equal,
        FilterOp::Ne => ordering != Ordering::Equal,
        FilterOp::Gt => ordering == Ordering::Greater,
        FilterOp::Gte => ordering != Ordering::Less,
        FilterOp::Lt => ordering == Ordering::Less,
        FilterOp::Lte => ordering != Ordering::Greater,
        _ => false,
    }
}

/// Absent values satisfy only negative operators.
fn absent_match(op: FilterOp) -> bool {
    matches!(op, FilterOp::Ne | FilterOp::NotIn)
}

const ORDERED_OPS: &[FilterOp] = &[
    FilterOp::Eq,
    FilterOp::Ne,
    FilterOp::Gt,
    FilterOp::Gte,
    FilterOp::Lt,
    FilterOp::Lte,
];

pub struct TextHandler;

impl PropertyTypeHandler for TextHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Text
    }

    fn store(&self) -> ValueStore {
        ValueStore::Scalar
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        if let PropertyKind::Text(attrs) = kind {
            if let (Some(min), Some(max)) = (attrs.min_length, attrs.max_length) {
                if min > max {
                    return Err("minLength is greater than maxLength".to_string());
                }
            }
        }
        Ok(())
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        let text = scalar_text(raw)?;
        if let PropertyKind::Text(attrs) = kind {
            let len = text.chars().count() as u32;
            if let Some(min) = attrs.min_length {
                if len > 0 && len < min {
                    return Err(format!("must be at least {min} characters"));
                }
            }
            if let Some(max) = attrs.max_length {
                if len > max {
                    return Err(format!("must be at most {max} characters"));
                }
            }
            if !text.is_empty() {
                match attrs.editor {
                    super::kind::TextEditor::Email => {
                        let valid = text
                            .split_once('@')
                            .map_or(false, |(user, host)| !user.is_empty() && host.contains('.'));
                        if !valid {
                            return Err(format!("'{text}' is not an email address"));
                        }
                    }
                    super::kind::TextEditor::Url => {
                        if !(text.starts_with("http://") || text.starts_with("https://")) {
                            return Err(format!("'{text}' is not a URL"));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(TypedValue::Text(text))
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::Text(s) => Some(StoredValue::Scalar(ScalarCell {
                text: Some(s.clone()),
                ..Default::default()
            })),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Scalar(ScalarCell { text: Some(s), .. }) => Some(TypedValue::Text(s.clone())),
            _ => None,
        }
    }

    fn format(&self, _kind: &PropertyKind, value: &TypedValue, _locale: &Locale) -> String {
        value.as_text().unwrap_or_default().to_string()
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        let (a, b) = (a.as_text().unwrap_or_default(), b.as_text().unwrap_or_default());
        a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[
            FilterOp::Eq,
            FilterOp::Ne,
            FilterOp::Contains,
            FilterOp::StartsWith,
            FilterOp::EndsWith,
            FilterOp::Like,
        ]
    }

    fn parse_operand(
        &self,
        _kind: &PropertyKind,
        _op: FilterOp,
        raw: &JsonValue,
    ) -> Result<FilterOperand, String> {
        scalar_text(raw).map(|s| FilterOperand::Pattern(s.to_lowercase()))
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        let (Some(text), FilterOperand::Pattern(pattern)) = (value.and_then(TypedValue::as_text), operand)
        else {
            return absent_match(op);
        };
        let text = text.to_lowercase();
        match op {
            FilterOp::Eq => text == *pattern,
            FilterOp::Ne => text != *pattern,
            FilterOp::Contains => text.contains(pattern.as_str()),
            FilterOp::StartsWith => text.starts_with(pattern.as_str()),
            FilterOp::EndsWith => text.ends_with(pattern.as_str()),
            FilterOp::Like => like_match(&text, pattern),
            _ => false,
        }
    }
}

pub struct NumberHandler;

impl PropertyTypeHandler for NumberHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Number
    }

    fn store(&self) -> ValueStore {
        ValueStore::Scalar
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        if let PropertyKind::Number(attrs) = kind {
            if let (Some(min), Some(max)) = (attrs.min, attrs.max) {
                if min > max {
                    return Err("min is greater than max".to_string());
                }
            }
        }
        Ok(())
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        let value = round_to(parse_number(raw)?, kind.decimals());
        if let PropertyKind::Number(attrs) = kind {
            if let Some(min) = attrs.min.filter(|min| value < *min) {
                return Err(format!("must be at least {min}"));
            }
            if let Some(max) = attrs.max.filter(|max| value > *max) {
                return Err(format!("must be at most {max}"));
            }
        }
        Ok(TypedValue::Number(value))
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        value.as_number().map(|n| {
            StoredValue::Scalar(ScalarCell {
                number: Some(n),
                ..Default::default()
            })
        })
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Scalar(ScalarCell { number: Some(n), .. }) => Some(TypedValue::Number(*n)),
            _ => None,
        }
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, locale: &Locale) -> String {
        value
            .as_number()
            .map(|n| locale.format_number(n, kind.decimals()))
            .unwrap_or_default()
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        cmp_bound(a.as_number(), b.as_number(), cmp_f64)
    }

    fn operators(&self) -> &'static [FilterOp] {
        ORDERED_OPS
    }

    fn matches(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        match (value, operand) {
            (Some(value), FilterOperand::Value(operand)) => {
                ordered_match(op, self.compare(kind, value, operand))
            }
            _ => absent_match(op),
        }
    }
}

pub struct DateHandler;

impl PropertyTypeHandler for DateHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Date
    }

    fn store(&self) -> ValueStore {
        ValueStore::Scalar
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        parse_date(raw, kind.includes_time()).map(TypedValue::Date)
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        value.as_date().map(|d| {
            StoredValue::Scalar(ScalarCell {
                date: Some(to_micros(&d)),
                ..Default::default()
            })
        })
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Scalar(ScalarCell { date: Some(d), .. }) => from_micros(*d).map(TypedValue::Date),
            _ => None,
        }
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, locale: &Locale) -> String {
        value
            .as_date()
            .map(|d| format_date(&d, kind.includes_time(), locale))
            .unwrap_or_default()
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        a.as_date().cmp(&b.as_date())
    }

    fn operators(&self) -> &'static [FilterOp] {
        ORDERED_OPS
    }

    fn matches(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        match (value, operand) {
            (Some(value), FilterOperand::Value(operand)) => {
                ordered_match(op, self.compare(kind, value, operand))
            }
            _ => absent_match(op),
        }
    }
}

fn format_date(date: &DateTime<Utc>, include_time: bool, locale: &Locale) -> String {
    let mut out = date.format(locale.date_pattern()).to_string();
    if include_time {
        out.push_str(&date.format(" %H:%M").to_string());
    }
    out
}

pub struct BooleanHandler;

impl PropertyTypeHandler for BooleanHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Boolean
    }

    fn store(&self) -> ValueStore {
        ValueStore::Scalar
    }

    fn parse(&self, _kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        parse_bool(raw).map(TypedValue::Boolean)
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::Boolean(b) => Some(StoredValue::Scalar(ScalarCell {
                boolean: Some(*b),
                ..Default::default()
            })),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Scalar(ScalarCell { boolean: Some(b), .. }) => Some(TypedValue::Boolean(*b)),
            _ => None,
        }
    }

    fn format(&self, _kind: &PropertyKind, value: &TypedValue, _locale: &Locale) -> String {
        match value {
            TypedValue::Boolean(true) => "Yes".to_string(),
            TypedValue::Boolean(false) => "No".to_string(),
            _ => String::new(),
        }
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        match (a, b) {
            (TypedValue::Boolean(a), TypedValue::Boolean(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[FilterOp::Eq, FilterOp::Ne]
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        match (value, operand) {
            (Some(value), FilterOperand::Value(operand)) => match op {
                FilterOp::Eq => value == operand,
                FilterOp::Ne => value != operand,
                _ => false,
            },
            _ => absent_match(op),
        }
    }
}

fn validate_options(kind: &PropertyKind, require_options: bool) -> Result<(), String> {
    let Some(attrs) = kind.select_attributes() else {
        return Ok(());
    };
    if require_options && attrs.options.is_empty() {
        return Err("requires at least one option".to_string());
    }
    let mut seen = HashSet::new();
    for option in &attrs.options {
        if option.value.is_empty() {
            return Err("option values cannot be empty".to_string());
        }
        if !seen.insert(option.value.as_str()) {
            return Err(format!("option '{}' is defined twice", option.value));
        }
    }
    Ok(())
}

fn resolve_option(kind: &PropertyKind, raw: &JsonValue) -> Result<String, String> {
    let text = scalar_text(raw)?;
    let Some(attrs) = kind.select_attributes() else {
        return Ok(text);
    };
    if attrs.options.is_empty() {
        return Ok(text.trim().to_string());
    }
    attrs.resolve(&text).map(str::to_string).ok_or_else(|| {
        let allowed: Vec<&str> = attrs.options.iter().map(|o| o.value.as_str()).collect();
        format!("'{text}' is not one of the options: {}", allowed.join(", "))
    })
}

fn option_name<'a>(kind: &'a PropertyKind, value: &'a str) -> &'a str {
    kind.select_attributes()
        .and_then(|attrs| attrs.option(value))
        .map_or(value, |o| o.name.as_str())
}

pub struct SelectHandler;

impl PropertyTypeHandler for SelectHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Select
    }

    fn store(&self) -> ValueStore {
        ValueStore::Scalar
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        validate_options(kind, true)
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        resolve_option(kind, raw).map(TypedValue::Select)
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::Select(s) => Some(StoredValue::Scalar(ScalarCell {
                text: Some(s.clone()),
                ..Default::default()
            })),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Scalar(ScalarCell { text: Some(s), .. }) => Some(TypedValue::Select(s.clone())),
            _ => None,
        }
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, _locale: &Locale) -> String {
        value
            .as_text()
            .map(|v| option_name(kind, v).to_string())
            .unwrap_or_default()
    }

    /// Options sort in their declared order.
    fn compare(&self, kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        let (a, b) = (a.as_text().unwrap_or_default(), b.as_text().unwrap_or_default());
        let rank = |v: &str| kind.select_attributes().and_then(|attrs| attrs.position(v));
        cmp_bound(rank(a), rank(b), |x, y| x.cmp(&y)).then_with(|| a.cmp(b))
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[FilterOp::Eq, FilterOp::Ne, FilterOp::In, FilterOp::NotIn]
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        let Some(value) = value else {
            return absent_match(op);
        };
        match (op, operand) {
            (FilterOp::Eq, FilterOperand::Value(v)) => value == v,
            (FilterOp::Ne, FilterOperand::Value(v)) => value != v,
            (FilterOp::In, FilterOperand::Values(vs)) => vs.contains(value),
            (FilterOp::NotIn, FilterOperand::Values(vs)) => !vs.contains(value),
            _ => false,
        }
    }
}

pub struct MultiSelectHandler;

impl PropertyTypeHandler for MultiSelectHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::MultiSelect
    }

    fn store(&self) -> ValueStore {
        ValueStore::Multiple
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        validate_options(kind, false)
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        let items = match raw {
            JsonValue::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        };
        let mut values: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            let value = resolve_option(kind, item)?;
            if !value.is_empty() && !values.contains(&value) {
                values.push(value);
            }
        }
        Ok(TypedValue::MultiSelect(values))
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::MultiSelect(values) => Some(StoredValue::Multiple(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| MultipleEntry {
                        position: i as u32,
                        value: v.clone(),
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Multiple(entries) => {
                let mut entries = entries.clone();
                entries.sort_by_key(|e| e.position);
                Some(TypedValue::MultiSelect(
                    entries.into_iter().map(|e| e.value).collect(),
                ))
            }
            _ => None,
        }
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, _locale: &Locale) -> String {
        match value {
            TypedValue::MultiSelect(values) => values
                .iter()
                .map(|v| option_name(kind, v))
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        match (a, b) {
            (TypedValue::MultiSelect(a), TypedValue::MultiSelect(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[FilterOp::In, FilterOp::All, FilterOp::NotIn]
    }

    fn parse_operand(
        &self,
        kind: &PropertyKind,
        _op: FilterOp,
        raw: &JsonValue,
    ) -> Result<FilterOperand, String> {
        self.parse(kind, raw).map(FilterOperand::Value)
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        let FilterOperand::Value(TypedValue::MultiSelect(wanted)) = operand else {
            return false;
        };
        let held: &[String] = match value {
            Some(TypedValue::MultiSelect(held)) => held,
            _ => &[],
        };
        match op {
            FilterOp::In => wanted.iter().any(|w| held.contains(w)),
            FilterOp::All => wanted.iter().all(|w| held.contains(w)),
            FilterOp::NotIn => !wanted.iter().any(|w| held.contains(w)),
            _ => false,
        }
    }
}

pub struct MediaHandler;

impl PropertyTypeHandler for MediaHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Media
    }

    fn store(&self) -> ValueStore {
        ValueStore::Media
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        match kind {
            PropertyKind::Media(attrs) if attrs.max_files == Some(0) => {
                Err("maxFiles must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        let items = match raw {
            JsonValue::Array(items) => items.clone(),
            JsonValue::Object(_) => vec![raw.clone()],
            other => return Err(format!("{other} is not a file reference")),
        };
        let mut files = Vec::with_capacity(items.len());
        for item in items {
            let file: MediaFile =
                serde_json::from_value(item).map_err(|e| format!("invalid file reference: {e}"))?;
            if file.name.is_empty() || file.file.is_empty() {
                return Err("file references need a name and a file".to_string());
            }
            files.push(file);
        }
        if let PropertyKind::Media(attrs) = kind {
            if let Some(max) = attrs.max_files {
                if files.len() > max as usize {
                    return Err(format!("accepts at most {max} files"));
                }
            }
            if let Some(rejected) = files.iter().find(|f| !attrs.accepts(&f.mime_type)) {
                return Err(format!("file type '{}' is not accepted", rejected.mime_type));
            }
        }
        Ok(TypedValue::Media(files))
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::Media(files) => Some(StoredValue::Media(
                files
                    .iter()
                    .map(|f| MediaEntry {
                        name: f.name.clone(),
                        file: f.file.clone(),
                        mime_type: f.mime_type.clone(),
                        size: f.size,
                        storage_url: f.storage_url.clone(),
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Media(entries) => Some(TypedValue::Media(
                entries
                    .iter()
                    .map(|e| MediaFile {
                        name: e.name.clone(),
                        file: e.file.clone(),
                        mime_type: e.mime_type.clone(),
                        size: e.size,
                        storage_url: e.storage_url.clone(),
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    fn format(&self, _kind: &PropertyKind, value: &TypedValue, _locale: &Locale) -> String {
        match value {
            TypedValue::Media(files) => files
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        match (a, b) {
            (TypedValue::Media(a), TypedValue::Media(b)) => a.len().cmp(&b.len()),
            _ => Ordering::Equal,
        }
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[]
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        _op: FilterOp,
        _value: Option<&TypedValue>,
        _operand: &FilterOperand,
    ) -> bool {
        false
    }
}

fn range_bounds(raw: &JsonValue) -> Result<(JsonValue, JsonValue), String> {
    match raw {
        JsonValue::Object(map) => Ok((
            map.get("min").cloned().unwrap_or(JsonValue::Null),
            map.get("max").cloned().unwrap_or(JsonValue::Null),
        )),
        JsonValue::Array(items) if items.len() == 2 => Ok((items[0].clone(), items[1].clone())),
        other => Err(format!("{other} is not a range; expected {{\"min\", \"max\"}}")),
    }
}

fn optional<T>(
    raw: &JsonValue,
    parse: impl Fn(&JsonValue) -> Result<T, String>,
) -> Result<Option<T>, String> {
    match raw {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) if s.is_empty() => Ok(None),
        other => parse(other).map(Some),
    }
}

pub struct RangeNumberHandler;

impl PropertyTypeHandler for RangeNumberHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::RangeNumber
    }

    fn store(&self) -> ValueStore {
        ValueStore::Range
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        if let PropertyKind::RangeNumber(attrs) = kind {
            if let (Some(min), Some(max)) = (attrs.min, attrs.max) {
                if min > max {
                    return Err("min is greater than max".to_string());
                }
            }
        }
        Ok(())
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        let (min, max) = range_bounds(raw)?;
        let decimals = kind.decimals();
        let min = optional(&min, parse_number)?.map(|v| round_to(v, decimals));
        let max = optional(&max, parse_number)?.map(|v| round_to(v, decimals));
        if let (Some(a), Some(b)) = (min, max) {
            if a > b {
                return Err("range min is greater than max".to_string());
            }
        }
        if let PropertyKind::RangeNumber(attrs) = kind {
            let out_of_bounds = [min, max].into_iter().flatten().any(|v| {
                attrs.min.map_or(false, |lo| v < lo) || attrs.max.map_or(false, |hi| v > hi)
            });
            if out_of_bounds {
                return Err("range bound is outside the allowed interval".to_string());
            }
        }
        Ok(TypedValue::NumberRange(NumberRange::new(min, max)))
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::NumberRange(r) => Some(StoredValue::Range(RangeCell {
                number_min: r.min,
                number_max: r.max,
                ..Default::default()
            })),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Range(cell) => Some(TypedValue::NumberRange(NumberRange::new(
                cell.number_min,
                cell.number_max,
            ))),
            _ => None,
        }
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, locale: &Locale) -> String {
        match value {
            TypedValue::NumberRange(r) => format_range(
                r.min.map(|v| locale.format_number(v, kind.decimals())),
                r.max.map(|v| locale.format_number(v, kind.decimals())),
            ),
            _ => String::new(),
        }
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        match (a, b) {
            (TypedValue::NumberRange(a), TypedValue::NumberRange(b)) => cmp_bound(a.min, b.min, cmp_f64)
                .then_with(|| cmp_bound(a.max, b.max, cmp_f64)),
            _ => Ordering::Equal,
        }
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[FilterOp::Overlaps, FilterOp::Contains]
    }

    fn parse_operand(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        raw: &JsonValue,
    ) -> Result<FilterOperand, String> {
        match op {
            FilterOp::Contains => parse_number(raw).map(|n| FilterOperand::Value(TypedValue::Number(n))),
            _ => self.parse(kind, raw).map(FilterOperand::Value),
        }
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        let (Some(TypedValue::NumberRange(range)), FilterOperand::Value(operand)) = (value, operand) else {
            return false;
        };
        match (op, operand) {
            (FilterOp::Overlaps, TypedValue::NumberRange(other)) => range.overlaps(other),
            (FilterOp::Contains, TypedValue::Number(n)) => range.contains(*n),
            _ => false,
        }
    }
}

pub struct RangeDateHandler;

impl PropertyTypeHandler for RangeDateHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::RangeDate
    }

    fn store(&self) -> ValueStore {
        ValueStore::Range
    }

    fn parse(&self, kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        let (min, max) = range_bounds(raw)?;
        let include_time = kind.includes_time();
        let min = optional(&min, |v| parse_date(v, include_time))?;
        let max = optional(&max, |v| parse_date(v, include_time))?;
        if let (Some(a), Some(b)) = (min, max) {
            if a > b {
                return Err("range min is greater than max".to_string());
            }
        }
        Ok(TypedValue::DateRange(DateRange::new(min, max)))
    }

    fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
        match value {
            TypedValue::DateRange(r) => Some(StoredValue::Range(RangeCell {
                date_min: r.min.as_ref().map(to_micros),
                date_max: r.max.as_ref().map(to_micros),
                ..Default::default()
            })),
            _ => None,
        }
    }

    fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
        match stored {
            StoredValue::Range(cell) => Some(TypedValue::DateRange(DateRange::new(
                cell.date_min.and_then(from_micros),
                cell.date_max.and_then(from_micros),
            ))),
            _ => None,
        }
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, locale: &Locale) -> String {
        match value {
            TypedValue::DateRange(r) => format_range(
                r.min.map(|d| format_date(&d, kind.includes_time(), locale)),
                r.max.map(|d| format_date(&d, kind.includes_time(), locale)),
            ),
            _ => String::new(),
        }
    }

    fn compare(&self, _kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        match (a, b) {
            (TypedValue::DateRange(a), TypedValue::DateRange(b)) => {
                cmp_bound(a.min, b.min, |x, y| x.cmp(&y)).then_with(|| cmp_bound(a.max, b.max, |x, y| x.cmp(&y)))
            }
            _ => Ordering::Equal,
        }
    }

    fn operators(&self) -> &'static [FilterOp] {
        &[FilterOp::Overlaps, FilterOp::Contains]
    }

    fn parse_operand(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        raw: &JsonValue,
    ) -> Result<FilterOperand, String> {
        match op {
            FilterOp::Contains => parse_date(raw, kind.includes_time())
                .map(|d| FilterOperand::Value(TypedValue::Date(d))),
            _ => self.parse(kind, raw).map(FilterOperand::Value),
        }
    }

    fn matches(
        &self,
        _kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        let (Some(TypedValue::DateRange(range)), FilterOperand::Value(operand)) = (value, operand) else {
            return false;
        };
        match (op, operand) {
            (FilterOp::Overlaps, TypedValue::DateRange(other)) => range.overlaps(other),
            (FilterOp::Contains, TypedValue::Date(d)) => range.contains(*d),
            _ => false,
        }
    }
}

fn format_range(min: Option<String>, max: Option<String>) -> String {
    match (min, max) {
        (Some(a), Some(b)) => format!("{a} - {b}"),
        (Some(a), None) => format!("from {a}"),
        (None, Some(b)) => format!("until {b}"),
        (None, None) => String::new(),
    }
}

/// Computed numbers. Input is rejected by the registry; `parse` only
/// serves filter operands.
pub struct FormulaHandler;

impl PropertyTypeHandler for FormulaHandler {
    fn property_type(&self) -> PropertyType {
        PropertyType::Formula
    }

    fn store(&self) -> ValueStore {
        ValueStore::Computed
    }

    fn validate_attributes(&self, kind: &PropertyKind) -> Result<(), String> {
        match kind {
            PropertyKind::Formula(attrs) => super::formula::Expr::parse(&attrs.expression)
                .map(|_| ())
                .map_err(|e| format!("invalid expression: {e}")),
            _ => Ok(()),
        }
    }

    fn parse(&self, _kind: &PropertyKind, raw: &JsonValue) -> Result<TypedValue, String> {
        parse_number(raw).map(TypedValue::Number)
    }

    fn to_storage(&self, _value: &TypedValue) -> Option<StoredValue> {
        None
    }

    fn from_storage(&self, _stored: &StoredValue) -> Option<TypedValue> {
        None
    }

    fn format(&self, kind: &PropertyKind, value: &TypedValue, locale: &Locale) -> String {
        NumberHandler.format(kind, value, locale)
    }

    fn compare(&self, kind: &PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
        NumberHandler.compare(kind, a, b)
    }

    fn operators(&self) -> &'static [FilterOp] {
        ORDERED_OPS
    }

    fn matches(
        &self,
        kind: &PropertyKind,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        NumberHandler.matches(kind, op, value, operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_date_only_truncates_time() {
        let parsed = DateHandler
            .parse(&PropertyKind::date(), &json!("2024-01-31T18:45:00Z"))
            .unwrap();
        assert_eq!(
            parsed,
            TypedValue::Date(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_datetime_keeps_microseconds_only() {
        let parsed = DateHandler
            .parse(&PropertyKind::datetime(), &json!("2024-01-01T00:00:00.123456789Z"))
            .unwrap();
        let TypedValue::Date(date) = parsed else {
            panic!("expected a date, got {parsed:?}");
        };
        assert_eq!(date.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(from_micros(to_micros(&date)), Some(date));
    }

    #[test]
    fn test_number_bounds_and_rounding() {
        let kind = PropertyKind::Number(super::super::NumberAttributes {
            decimals: Some(2),
            min: Some(0.0),
            max: None,
        });
        assert_eq!(NumberHandler.parse(&kind, &json!("3.14159")), Ok(TypedValue::Number(3.14)));
        assert!(NumberHandler.parse(&kind, &json!(-1)).is_err());
        assert!(NumberHandler.parse(&kind, &json!("abc")).is_err());
    }

    #[test]
    fn test_select_rejects_unknown_option() {
        let kind = PropertyKind::select(["draft", "sent"]);
        let err = SelectHandler.parse(&kind, &json!("paid")).unwrap_err();
        assert!(err.contains("draft, sent"));
    }

    #[test]
    fn test_multi_select_dedups_and_keeps_order() {
        let kind = PropertyKind::multi_select(Vec::<String>::new());
        assert_eq!(
            MultiSelectHandler.parse(&kind, &json!(["b", "a", "b"])),
            Ok(TypedValue::MultiSelect(vec!["b".into(), "a".into()]))
        );
    }

    #[test]
    fn test_range_min_greater_than_max() {
        let err = RangeDateHandler
            .parse(&PropertyKind::range_date(), &json!({"min": "2024-02-01", "max": "2024-01-01"}))
            .unwrap_err();
        assert_eq!(err, "range min is greater than max");
    }

    #[test]
    fn test_multi_select_membership_operators() {
        let kind = PropertyKind::multi_select(Vec::<String>::new());
        let value = TypedValue::MultiSelect(vec!["a".into(), "b".into()]);
        let any = MultiSelectHandler.parse_operand(&kind, FilterOp::In, &json!(["b", "z"])).unwrap();
        let all = MultiSelectHandler.parse_operand(&kind, FilterOp::All, &json!(["a", "z"])).unwrap();
        assert!(MultiSelectHandler.matches(&kind, FilterOp::In, Some(&value), &any));
        assert!(!MultiSelectHandler.matches(&kind, FilterOp::All, Some(&value), &all));
        assert!(MultiSelectHandler.matches(&kind, FilterOp::NotIn, None, &all));
    }

    #[test]
    fn test_media_respects_accept_and_max_files() {
        let kind = PropertyKind::Media(super::super::MediaAttributes {
            max_files: Some(1),
            accept: vec!["image/*".into()],
        });
        let png = json!({"name": "a.png", "file": "uploads/a.png", "type": "image/png"});
        assert!(MediaHandler.parse(&kind, &png).is_ok());
        assert!(MediaHandler.parse(&kind, &json!([png.clone(), png])).is_err());
        let pdf = json!({"name": "a.pdf", "file": "uploads/a.pdf", "type": "application/pdf"});
        assert!(MediaHandler.parse(&kind, &pdf).is_err());
    }
}
