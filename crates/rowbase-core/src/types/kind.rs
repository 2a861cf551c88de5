//! Property types and their attribute schemas.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    Text,
    Number,
    Date,
    Boolean,
    Select,
    MultiSelect,
    Media,
    RangeNumber,
    RangeDate,
    Formula,
}

impl PropertyType {
    pub const ALL: [PropertyType; 10] = [
        PropertyType::Text,
        PropertyType::Number,
        PropertyType::Date,
        PropertyType::Boolean,
        PropertyType::Select,
        PropertyType::MultiSelect,
        PropertyType::Media,
        PropertyType::RangeNumber,
        PropertyType::RangeDate,
        PropertyType::Formula,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Text => "TEXT",
            PropertyType::Number => "NUMBER",
            PropertyType::Date => "DATE",
            PropertyType::Boolean => "BOOLEAN",
            PropertyType::Select => "SELECT",
            PropertyType::MultiSelect => "MULTI_SELECT",
            PropertyType::Media => "MEDIA",
            PropertyType::RangeNumber => "RANGE_NUMBER",
            PropertyType::RangeDate => "RANGE_DATE",
            PropertyType::Formula => "FORMULA",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown property type '{s}'"))
    }
}

/// Value sub-store backing a property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueStore {
    /// Single text, number, date or boolean.
    Scalar,
    /// Ordered collection of entries.
    Multiple,
    /// Numeric or date min/max pair.
    Range,
    /// File references.
    Media,
    /// Nothing is stored; the value is derived at read time.
    Computed,
}

/// Editor hint for text properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextEditor {
    #[default]
    Plain,
    Multiline,
    Markdown,
    Html,
    Email,
    Url,
    Phone,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextAttributes {
    pub editor: TextEditor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NumberAttributes {
    /// Fixed number of decimals; values are rounded on input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DateAttributes {
    pub include_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Stored value.
    pub value: String,
    /// Display name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SelectOption {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            name: value.clone(),
            value,
            color: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectAttributes {
    pub options: Vec<SelectOption>,
}

impl SelectAttributes {
    pub fn option(&self, value: &str) -> Option<&SelectOption> {
        self.options.iter().find(|o| o.value == value)
    }

    /// Position of an option, used as its sort rank.
    pub fn position(&self, value: &str) -> Option<usize> {
        self.options.iter().position(|o| o.value == value)
    }

    /// Resolve raw input to an option value, matching the value exactly or
    /// the display name case-insensitively.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        self.option(raw)
            .or_else(|| self.options.iter().find(|o| o.name.eq_ignore_ascii_case(raw)))
            .map(|o| o.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_files: Option<u32>,
    /// Accepted mime types; `image/*` style wildcards match a prefix.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accept: Vec<String>,
}

impl MediaAttributes {
    pub fn accepts(&self, mime_type: &str) -> bool {
        if self.accept.is_empty() {
            return true;
        }
        self.accept.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => mime_type.starts_with(prefix),
            None => pattern.eq_ignore_ascii_case(mime_type),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormulaAttributes {
    /// Arithmetic over NUMBER property names, e.g. `price * quantity`.
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

/// A property type together with its type-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyKind {
    Text(TextAttributes),
    Number(NumberAttributes),
    Date(DateAttributes),
    Boolean,
    Select(SelectAttributes),
    /// Options may be empty, in which case any tag is accepted.
    MultiSelect(SelectAttributes),
    Media(MediaAttributes),
    RangeNumber(NumberAttributes),
    RangeDate(DateAttributes),
    Formula(FormulaAttributes),
}

impl PropertyKind {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyKind::Text(_) => PropertyType::Text,
            PropertyKind::Number(_) => PropertyType::Number,
            PropertyKind::Date(_) => PropertyType::Date,
            PropertyKind::Boolean => PropertyType::Boolean,
            PropertyKind::Select(_) => PropertyType::Select,
            PropertyKind::MultiSelect(_) => PropertyType::MultiSelect,
            PropertyKind::Media(_) => PropertyType::Media,
            PropertyKind::RangeNumber(_) => PropertyType::RangeNumber,
            PropertyKind::RangeDate(_) => PropertyType::RangeDate,
            PropertyKind::Formula(_) => PropertyType::Formula,
        }
    }

    pub fn text() -> Self {
        PropertyKind::Text(TextAttributes::default())
    }

    pub fn text_with(editor: TextEditor) -> Self {
        PropertyKind::Text(TextAttributes {
            editor,
            ..Default::default()
        })
    }

    pub fn number() -> Self {
        PropertyKind::Number(NumberAttributes::default())
    }

    pub fn decimal(decimals: u8) -> Self {
        PropertyKind::Number(NumberAttributes {
            decimals: Some(decimals),
            ..Default::default()
        })
    }

    pub fn date() -> Self {
        PropertyKind::Date(DateAttributes::default())
    }

    pub fn datetime() -> Self {
        PropertyKind::Date(DateAttributes { include_time: true })
    }

    pub fn boolean() -> Self {
        PropertyKind::Boolean
    }

    pub fn select<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyKind::Select(SelectAttributes {
            options: values.into_iter().map(SelectOption::new).collect(),
        })
    }

    pub fn multi_select<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyKind::MultiSelect(SelectAttributes {
            options: values.into_iter().map(SelectOption::new).collect(),
        })
    }

    pub fn media() -> Self {
        PropertyKind::Media(MediaAttributes::default())
    }

    pub fn range_number() -> Self {
        PropertyKind::RangeNumber(NumberAttributes::default())
    }

    pub fn range_date() -> Self {
        PropertyKind::RangeDate(DateAttributes::default())
    }

    pub fn formula(expression: impl Into<String>) -> Self {
        PropertyKind::Formula(FormulaAttributes {
            expression: expression.into(),
            decimals: None,
        })
    }

    /// Options for SELECT and MULTI_SELECT.
    pub fn select_attributes(&self) -> Option<&SelectAttributes> {
        match self {
            PropertyKind::Select(attrs) | PropertyKind::MultiSelect(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Whether dates carry a time component.
    pub fn includes_time(&self) -> bool {
        match self {
            PropertyKind::Date(attrs) | PropertyKind::RangeDate(attrs) => attrs.include_time,
            _ => false,
        }
    }

    pub fn decimals(&self) -> Option<u8> {
        match self {
            PropertyKind::Number(attrs) | PropertyKind::RangeNumber(attrs) => attrs.decimals,
            PropertyKind::Formula(attrs) => attrs.decimals,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_json_is_tagged_by_type() {
        let kind = PropertyKind::select(["draft", "sent"]);
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "SELECT");
        assert_eq!(json["options"][1]["value"], "sent");

        let parsed: PropertyKind =
            serde_json::from_value(serde_json::json!({"type": "RANGE_DATE"})).unwrap();
        assert_eq!(parsed, PropertyKind::range_date());
    }

    #[test]
    fn test_property_type_from_str() {
        assert_eq!("multi_select".parse::<PropertyType>(), Ok(PropertyType::MultiSelect));
        assert!("BLOB".parse::<PropertyType>().is_err());
    }

    #[test]
    fn test_select_resolves_by_value_or_name() {
        let attrs = SelectAttributes {
            options: vec![SelectOption::new("d").with_name("Draft")],
        };
        assert_eq!(attrs.resolve("d"), Some("d"));
        assert_eq!(attrs.resolve("draft"), Some("d"));
        assert_eq!(attrs.resolve("sent"), None);
    }

    #[test]
    fn test_media_accept_wildcards() {
        let attrs = MediaAttributes {
            max_files: None,
            accept: vec!["image/*".into(), "application/pdf".into()],
        };
        assert!(attrs.accepts("image/png"));
        assert!(attrs.accepts("application/pdf"));
        assert!(!attrs.accepts("text/plain"));
    }
}
