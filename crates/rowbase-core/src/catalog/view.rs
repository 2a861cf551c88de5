//! Views, property groups and templates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::query::filter::RowFilter;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{other}'")),
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub property: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// How a view lays rows out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "camelCase")]
pub enum ViewLayout {
    #[default]
    Table,
    /// Columns per option of a SELECT property.
    #[serde(rename_all = "camelCase")]
    Board { group_by: String },
    /// Rows placed by a DATE or RANGE_DATE property.
    #[serde(rename_all = "camelCase")]
    Calendar { date_property: String },
}

fn default_page_size() -> i64 {
    25
}

/// A saved query over an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDef {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub layout: ViewLayout,
    /// Visible properties in display order. Empty shows all.
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub filters: Vec<RowFilter>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl ViewDef {
    pub fn table(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            layout: ViewLayout::Table,
            properties: Vec::new(),
            filters: Vec::new(),
            sort: Vec::new(),
            page_size: default_page_size(),
        }
    }

    pub fn board(name: impl Into<String>, group_by: impl Into<String>) -> Self {
        Self {
            layout: ViewLayout::Board {
                group_by: group_by.into(),
            },
            ..Self::table(name)
        }
    }

    pub fn calendar(name: impl Into<String>, date_property: impl Into<String>) -> Self {
        Self {
            layout: ViewLayout::Calendar {
                date_property: date_property.into(),
            },
            ..Self::table(name)
        }
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Every property name the view refers to.
    pub fn referenced_properties(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.properties.iter().map(String::as_str).collect();
        names.extend(self.sort.iter().map(|s| s.property.as_str()));
        match &self.layout {
            ViewLayout::Table => {}
            ViewLayout::Board { group_by } => names.push(group_by),
            ViewLayout::Calendar { date_property } => names.push(date_property),
        }
        names
    }
}

/// A named group of properties for form layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyGroup {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub properties: Vec<String>,
}

impl PropertyGroup {
    pub fn new<I, S>(name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }
}

/// Default payload keyed by property name, applied before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub values: Map<String, JsonValue>,
}

impl TemplateDef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            values: Map::new(),
        }
    }

    pub fn with_value(mut self, property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.values.insert(property.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_view_layout_json() {
        let view = ViewDef::board("pipeline", "status").with_sort(SortSpec::desc("amount"));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["layout"], "board");
        assert_eq!(json["groupBy"], "status");
        assert_eq!(json["sort"][0]["direction"], "desc");

        let parsed: ViewDef = serde_json::from_value(json!({"name": "all", "layout": "table"})).unwrap();
        assert_eq!(parsed.page_size, 25);
        assert_eq!(parsed.layout, ViewLayout::Table);
    }

    #[test]
    fn test_referenced_properties() {
        let view = ViewDef::calendar("due", "dueRange")
            .with_properties(["title"])
            .with_sort(SortSpec::asc("folio"));
        assert_eq!(view.referenced_properties(), vec!["title", "folio", "dueRange"]);
    }
}
