//! Property definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ids::PropertyId;
use crate::types::PropertyKind;

/// Names of the built-in properties every entity carries.
pub mod builtin {
    pub const ID: &str = "id";
    pub const FOLIO: &str = "folio";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";

    pub const ALL: [&str; 4] = [ID, FOLIO, CREATED_AT, UPDATED_AT];
}

/// A typed field on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    #[serde(default)]
    pub id: PropertyId,
    /// Unique within the entity; fixed once rows exist.
    pub name: String,
    #[serde(default)]
    pub title: String,
    /// Type and type-specific attributes.
    #[serde(flatten)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Built-in, non-deletable, valued from the row header.
    #[serde(default)]
    pub is_default: bool,
    /// Input used on create when the property is not submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        Self {
            id: PropertyId::new(),
            title: name.clone(),
            name,
            kind,
            order: 0,
            required: false,
            unique: false,
            hidden: false,
            read_only: false,
            is_default: false,
            default_value: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<JsonValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// The four built-in properties, in their canonical order.
    pub fn defaults() -> Vec<PropertyDef> {
        let make = |name: &str, title: &str, kind: PropertyKind, order: u32| PropertyDef {
            title: title.to_string(),
            order,
            read_only: true,
            is_default: true,
            ..PropertyDef::new(name, kind)
        };
        vec![
            make(builtin::ID, "ID", PropertyKind::text(), 0),
            make(builtin::FOLIO, "Folio", PropertyKind::number(), 1),
            make(builtin::CREATED_AT, "Created at", PropertyKind::datetime(), 2),
            make(builtin::UPDATED_AT, "Updated at", PropertyKind::datetime(), 3),
        ]
    }
}
