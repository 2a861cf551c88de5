//! Resolved rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use super::record::RowRecord;
use crate::catalog::{builtin, EntityDef, PropertyDef};
use crate::error::{Error, Result};
use crate::ids::{EntityId, RowId, TenantId};
use crate::security::Identity;
use crate::types::formula::Expr;
use crate::types::{from_micros, PropertyKind, TypedValue};

/// A row with every value resolved to its typed form.
///
/// `values` holds custom properties keyed by name, including computed
/// formula results. Built-in properties are read from the header fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub entity_id: EntityId,
    pub tenant_id: Option<TenantId>,
    pub folio: u64,
    pub created_by: Identity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub values: BTreeMap<String, TypedValue>,
}

impl Row {
    pub(crate) fn from_record(record: &RowRecord, values: BTreeMap<String, TypedValue>) -> Result<Self> {
        let timestamp = |micros: i64| {
            from_micros(micros)
                .ok_or_else(|| Error::Consistency(format!("row {} has an invalid timestamp {micros}", record.id)))
        };
        Ok(Self {
            id: record.id,
            entity_id: record.entity_id,
            tenant_id: record.tenant_id,
            folio: record.folio,
            created_by: record.created_by,
            created_at: timestamp(record.created_at)?,
            updated_at: timestamp(record.updated_at)?,
            version: record.version,
            values,
        })
    }

    /// Recompute every formula property from the current values.
    pub(crate) fn compute_formulas(&mut self, entity: &EntityDef) {
        for property in entity.custom_properties() {
            let PropertyKind::Formula(attrs) = &property.kind else {
                continue;
            };
            let result = Expr::parse(&attrs.expression).ok().and_then(|expr| {
                expr.eval(&|name: &str| {
                    entity
                        .property(name)
                        .and_then(|p| self.field(p))
                        .and_then(|v| v.as_number())
                })
            });
            match result {
                Some(value) => {
                    self.values.insert(property.name.clone(), TypedValue::Number(value));
                }
                None => {
                    self.values.remove(&property.name);
                }
            }
        }
    }

    /// Custom property value by name.
    pub fn value(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    /// Value of any property, built-in or custom.
    pub fn field(&self, property: &PropertyDef) -> Option<TypedValue> {
        if property.is_default {
            return match property.name.as_str() {
                builtin::ID => Some(TypedValue::Text(self.id.to_string())),
                builtin::FOLIO => Some(TypedValue::Number(self.folio as f64)),
                builtin::CREATED_AT => Some(TypedValue::Date(self.created_at)),
                builtin::UPDATED_AT => Some(TypedValue::Date(self.updated_at)),
                _ => None,
            };
        }
        self.values.get(&property.name).cloned()
    }

    /// The consumer-facing shape: one key per property, in property order,
    /// `null` where a property has no value.
    pub fn to_json(&self, entity: &EntityDef) -> JsonValue {
        let mut map = Map::new();
        for property in entity.ordered_properties() {
            let value = self.field(property).map(|v| v.to_json()).unwrap_or(JsonValue::Null);
            map.insert(property.name.clone(), value);
        }
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::types::PropertyKind;
    use serde_json::json;

    fn order() -> EntityDef {
        EntityDef::new("Order")
            .with_property(PropertyDef::new("price", PropertyKind::number()))
            .with_property(PropertyDef::new("quantity", PropertyKind::number()))
            .with_property(PropertyDef::new("total", PropertyKind::formula("price * quantity")))
    }

    fn row(values: BTreeMap<String, TypedValue>) -> Row {
        let record = RowRecord {
            id: RowId::new(),
            entity_id: EntityId::new(),
            tenant_id: None,
            folio: 7,
            created_by: Identity::User(UserId::new()),
            created_at: 1_704_067_200_000_000,
            updated_at: 1_704_067_200_000_000,
            deleted_at: None,
            version: 1,
        };
        Row::from_record(&record, values).unwrap()
    }

    #[test]
    fn test_formula_is_computed_and_dropped_when_inputs_missing() {
        let entity = order();
        let mut values = BTreeMap::new();
        values.insert("price".to_string(), TypedValue::Number(2.5));
        values.insert("quantity".to_string(), TypedValue::Number(4.0));
        let mut r = row(values);
        r.compute_formulas(&entity);
        assert_eq!(r.value("total"), Some(&TypedValue::Number(10.0)));

        r.values.remove("quantity");
        r.compute_formulas(&entity);
        assert_eq!(r.value("total"), None);
    }

    #[test]
    fn test_builtins_come_from_header() {
        let entity = order();
        let r = row(BTreeMap::new());
        let folio = entity.property(builtin::FOLIO).unwrap();
        assert_eq!(r.field(folio), Some(TypedValue::Number(7.0)));

        let json = r.to_json(&entity);
        assert_eq!(json["folio"], json!(7));
        assert_eq!(json["id"], json!(r.id.to_string()));
        assert_eq!(json["createdAt"], json!("2024-01-01T00:00:00Z"));
        assert_eq!(json["price"], JsonValue::Null);
    }
}
