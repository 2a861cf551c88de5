//! Row filters.
//!
//! A [`RowFilter`] is the declarative form as submitted by callers. It is
//! compiled against the entity's properties into a [`CompiledFilter`],
//! which holds the operand already parsed by the property's type handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::catalog::{EntityDef, PropertyDef};
use crate::error::ValidationErrors;
use crate::storage::Row;
use crate::types::{PropertyTypeRegistry, TypedValue};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    /// SQL-style pattern: `%` matches any run, `_` one character.
    Like,
    Gt,
    Gte,
    Lt,
    Lte,
    /// SELECT: value is one of the operands. MULTI_SELECT: shares any tag.
    In,
    NotIn,
    /// MULTI_SELECT holds every operand tag.
    All,
    /// Range intersects the operand range.
    Overlaps,
    IsEmpty,
    IsNotEmpty,
}

impl FilterOp {
    const ALL: [FilterOp; 16] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::Contains,
        FilterOp::StartsWith,
        FilterOp::EndsWith,
        FilterOp::Like,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::In,
        FilterOp::NotIn,
        FilterOp::All,
        FilterOp::Overlaps,
        FilterOp::IsEmpty,
        FilterOp::IsNotEmpty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Contains => "contains",
            FilterOp::StartsWith => "startsWith",
            FilterOp::EndsWith => "endsWith",
            FilterOp::Like => "like",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::NotIn => "notIn",
            FilterOp::All => "all",
            FilterOp::Overlaps => "overlaps",
            FilterOp::IsEmpty => "isEmpty",
            FilterOp::IsNotEmpty => "isNotEmpty",
        }
    }

    /// Operators that take no operand.
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOp::IsEmpty | FilterOp::IsNotEmpty)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown filter operator '{s}'"))
    }
}

/// A filter on one property, as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub property: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: JsonValue,
}

impl RowFilter {
    pub fn new(property: impl Into<String>, op: FilterOp, value: JsonValue) -> Self {
        Self {
            property: property.into(),
            op,
            value,
        }
    }

    pub fn eq(property: impl Into<String>, value: JsonValue) -> Self {
        Self::new(property, FilterOp::Eq, value)
    }

    pub fn is_empty(property: impl Into<String>) -> Self {
        Self::new(property, FilterOp::IsEmpty, JsonValue::Null)
    }
}

/// Filter operand after parsing by the property's type handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperand {
    None,
    Value(TypedValue),
    Values(Vec<TypedValue>),
    /// Lowercased text pattern.
    Pattern(String),
}

/// A filter bound to a concrete property.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub property: PropertyDef,
    pub op: FilterOp,
    pub operand: FilterOperand,
}

impl CompiledFilter {
    pub fn matches(&self, registry: &PropertyTypeRegistry, row: &Row) -> bool {
        let value = row.field(&self.property);
        registry.matches(&self.property, self.op, value.as_ref(), &self.operand)
    }
}

/// Compile filters against an entity.
///
/// Filters naming unknown properties are dropped so that payloads written
/// for a newer schema keep working. Unsupported operators and malformed
/// operands are collected as field errors.
pub fn compile_filters(
    entity: &EntityDef,
    registry: &PropertyTypeRegistry,
    filters: &[RowFilter],
) -> Result<Vec<CompiledFilter>, ValidationErrors> {
    let mut compiled = Vec::with_capacity(filters.len());
    let mut errors = ValidationErrors::new();

    for filter in filters {
        let Some(property) = entity.property(&filter.property) else {
            debug!(entity = %entity.name, property = %filter.property, "ignoring filter on unknown property");
            continue;
        };
        match registry.compile_operand(property, filter.op, &filter.value) {
            Ok(operand) => compiled.push(CompiledFilter {
                property: property.clone(),
                op: filter.op,
                operand,
            }),
            Err(error) => errors.push(error),
        }
    }

    if errors.is_empty() {
        Ok(compiled)
    } else {
        Err(errors)
    }
}

/// Match a value against a `%`/`_` pattern.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matched[j]: pattern[..j] matches value[..i] for the current i
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }

    for c in &value {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == *c,
            };
        }
        matched = next;
    }

    matched[pattern.len()]
}
