//! Property type registry.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::handlers::{
    BooleanHandler, DateHandler, FormulaHandler, MediaHandler, MultiSelectHandler, NumberHandler,
    PropertyTypeHandler, RangeDateHandler, RangeNumberHandler, SelectHandler, TextHandler,
};
use super::kind::{PropertyType, ValueStore};
use super::locale::Locale;
use super::stored::StoredValue;
use super::value::TypedValue;
use crate::catalog::PropertyDef;
use crate::error::{Error, FieldError, Result};
use crate::query::filter::{FilterOp, FilterOperand};

/// Central registry of property type handlers.
///
/// The row store and query engine call into the registry and never match
/// on property types themselves.
#[derive(Clone)]
pub struct PropertyTypeRegistry {
    handlers: HashMap<PropertyType, Arc<dyn PropertyTypeHandler>>,
}

impl Default for PropertyTypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for PropertyTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("PropertyTypeRegistry").field("types", &types).finish()
    }
}

impl PropertyTypeRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in type.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TextHandler));
        registry.register(Arc::new(NumberHandler));
        registry.register(Arc::new(DateHandler));
        registry.register(Arc::new(BooleanHandler));
        registry.register(Arc::new(SelectHandler));
        registry.register(Arc::new(MultiSelectHandler));
        registry.register(Arc::new(MediaHandler));
        registry.register(Arc::new(RangeNumberHandler));
        registry.register(Arc::new(RangeDateHandler));
        registry.register(Arc::new(FormulaHandler));
        registry
    }

    /// Register a handler, replacing any previous handler for its type.
    pub fn register(&mut self, handler: Arc<dyn PropertyTypeHandler>) -> Option<Arc<dyn PropertyTypeHandler>> {
        self.handlers.insert(handler.property_type(), handler)
    }

    pub fn handler(&self, property_type: PropertyType) -> Result<&dyn PropertyTypeHandler> {
        self.handlers
            .get(&property_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| Error::Consistency(format!("no handler registered for {property_type}")))
    }

    /// Sub-store for a property; `Computed` when unregistered.
    pub fn store(&self, property: &PropertyDef) -> ValueStore {
        self.handler(property.kind.property_type())
            .map(|h| h.store())
            .unwrap_or(ValueStore::Computed)
    }

    /// Check a property definition's attributes.
    pub fn validate_definition(&self, property: &PropertyDef) -> std::result::Result<(), FieldError> {
        let handler = self
            .handler(property.kind.property_type())
            .map_err(|e| FieldError::new(&property.name, e.to_string()))?;
        handler
            .validate_attributes(&property.kind)
            .map_err(|reason| FieldError::new(&property.name, reason))
    }

    /// Resolve raw input for a property.
    ///
    /// `Ok(None)` means "no value": null input or input that parses to an
    /// empty value. Required-ness is checked by the caller, which knows
    /// whether the write is a create or a partial update.
    pub fn validate(
        &self,
        property: &PropertyDef,
        raw: &JsonValue,
    ) -> std::result::Result<Option<TypedValue>, FieldError> {
        let handler = self
            .handler(property.kind.property_type())
            .map_err(|e| FieldError::new(&property.name, e.to_string()))?;
        if handler.store() == ValueStore::Computed {
            return Err(FieldError::new(&property.name, "is computed and cannot be set"));
        }
        if raw.is_null() {
            return Ok(None);
        }
        let value = handler
            .parse(&property.kind, raw)
            .map_err(|reason| FieldError::new(&property.name, reason))?;
        Ok((!value.is_empty()).then_some(value))
    }

    /// Storage representation; `None` for computed types.
    pub fn serialize_for_storage(&self, property: &PropertyDef, value: &TypedValue) -> Result<Option<StoredValue>> {
        let handler = self.handler(property.kind.property_type())?;
        if handler.store() == ValueStore::Computed {
            return Ok(None);
        }
        handler.to_storage(value).map(Some).ok_or_else(|| {
            Error::Consistency(format!(
                "value {value:?} does not belong to {} property {}",
                property.kind.property_type(),
                property.name
            ))
        })
    }

    /// Inverse of [`serialize_for_storage`](Self::serialize_for_storage).
    pub fn deserialize_from_storage(&self, property: &PropertyDef, stored: &StoredValue) -> Result<TypedValue> {
        self.handler(property.kind.property_type())?
            .from_storage(stored)
            .ok_or_else(|| {
                Error::Consistency(format!(
                    "stored value for {} does not match its type {}",
                    property.name,
                    property.kind.property_type()
                ))
            })
    }

    /// Display string for a value.
    pub fn format(&self, property: &PropertyDef, value: &TypedValue, locale: &Locale) -> String {
        match self.handler(property.kind.property_type()) {
            Ok(handler) => handler.format(&property.kind, value, locale),
            Err(_) => value.to_json().to_string(),
        }
    }

    pub fn compare(&self, property: &PropertyDef, a: &TypedValue, b: &TypedValue) -> Ordering {
        match self.handler(property.kind.property_type()) {
            Ok(handler) => handler.compare(&property.kind, a, b),
            Err(_) => Ordering::Equal,
        }
    }

    /// Operators a property accepts in filters.
    pub fn operators(&self, property: &PropertyDef) -> Vec<FilterOp> {
        let mut ops = self
            .handler(property.kind.property_type())
            .map(|h| h.operators().to_vec())
            .unwrap_or_default();
        ops.extend([FilterOp::IsEmpty, FilterOp::IsNotEmpty]);
        ops
    }

    /// Parse a filter operand, rejecting operators the type does not support.
    pub fn compile_operand(
        &self,
        property: &PropertyDef,
        op: FilterOp,
        raw: &JsonValue,
    ) -> std::result::Result<FilterOperand, FieldError> {
        let handler = self
            .handler(property.kind.property_type())
            .map_err(|e| FieldError::new(&property.name, e.to_string()))?;
        if op.is_unary() {
            return Ok(FilterOperand::None);
        }
        if !handler.operators().contains(&op) {
            return Err(FieldError::new(
                &property.name,
                format!("operator {op} is not supported for {}", property.kind.property_type()),
            ));
        }
        handler
            .parse_operand(&property.kind, op, raw)
            .map_err(|reason| FieldError::new(&property.name, reason))
    }

    pub fn matches(
        &self,
        property: &PropertyDef,
        op: FilterOp,
        value: Option<&TypedValue>,
        operand: &FilterOperand,
    ) -> bool {
        let present = value.filter(|v| !v.is_empty());
        match op {
            FilterOp::IsEmpty => present.is_none(),
            FilterOp::IsNotEmpty => present.is_some(),
            _ => match self.handler(property.kind.property_type()) {
                Ok(handler) => handler.matches(&property.kind, op, present, operand),
                Err(_) => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyKind;
    use serde_json::json;

    fn status() -> PropertyDef {
        PropertyDef::new("status", PropertyKind::select(["draft", "sent"]))
    }

    #[test]
    fn test_null_and_empty_are_no_value() {
        let registry = PropertyTypeRegistry::standard();
        let notes = PropertyDef::new("notes", PropertyKind::text());
        assert_eq!(registry.validate(&notes, &JsonValue::Null), Ok(None));
        assert_eq!(registry.validate(&notes, &json!("")), Ok(None));
    }

    #[test]
    fn test_formula_input_is_rejected() {
        let registry = PropertyTypeRegistry::standard();
        let total = PropertyDef::new("total", PropertyKind::formula("a + b"));
        let err = registry.validate(&total, &json!(3)).unwrap_err();
        assert_eq!(err.property, "total");
    }

    #[test]
    fn test_unsupported_operator_names_the_property() {
        let registry = PropertyTypeRegistry::standard();
        let err = registry
            .compile_operand(&status(), FilterOp::Gt, &json!("draft"))
            .unwrap_err();
        assert_eq!(err.property, "status");
        assert!(err.reason.contains("gt"));
    }

    #[test]
    fn test_storage_roundtrip_through_handlers() {
        let registry = PropertyTypeRegistry::standard();
        let property = status();
        let value = registry.validate(&property, &json!("sent")).unwrap().unwrap();
        let stored = registry.serialize_for_storage(&property, &value).unwrap().unwrap();
        assert_eq!(registry.deserialize_from_storage(&property, &stored).unwrap(), value);

        let flag = PropertyDef::new("flag", PropertyKind::boolean());
        assert!(matches!(
            registry.deserialize_from_storage(&flag, &stored),
            Err(Error::Consistency(_))
        ));
    }

    #[test]
    fn test_format_uses_option_name() {
        let registry = PropertyTypeRegistry::standard();
        let mut property = status();
        if let PropertyKind::Select(attrs) = &mut property.kind {
            attrs.options[0].name = "Draft".into();
        }
        let value = TypedValue::Select("draft".into());
        assert_eq!(registry.format(&property, &value, &Locale::default()), "Draft");
    }

    #[test]
    fn test_custom_handler_replaces_builtin() {
        struct Shouting;
        impl PropertyTypeHandler for Shouting {
            fn property_type(&self) -> PropertyType {
                PropertyType::Text
            }
            fn store(&self) -> ValueStore {
                ValueStore::Scalar
            }
            fn parse(&self, kind: &crate::types::PropertyKind, raw: &JsonValue) -> std::result::Result<TypedValue, String> {
                TextHandler.parse(kind, raw)
            }
            fn to_storage(&self, value: &TypedValue) -> Option<StoredValue> {
                TextHandler.to_storage(value)
            }
            fn from_storage(&self, stored: &StoredValue) -> Option<TypedValue> {
                TextHandler.from_storage(stored)
            }
            fn format(&self, _kind: &crate::types::PropertyKind, value: &TypedValue, _locale: &Locale) -> String {
                value.as_text().unwrap_or_default().to_uppercase()
            }
            fn compare(&self, kind: &crate::types::PropertyKind, a: &TypedValue, b: &TypedValue) -> Ordering {
                TextHandler.compare(kind, a, b)
            }
            fn operators(&self) -> &'static [FilterOp] {
                &[]
            }
            fn matches(&self, _: &crate::types::PropertyKind, _: FilterOp, _: Option<&TypedValue>, _: &FilterOperand) -> bool {
                false
            }
        }

        let mut registry = PropertyTypeRegistry::standard();
        assert!(registry.register(Arc::new(Shouting)).is_some());
        let name = PropertyDef::new("name", PropertyKind::text());
        let value = TypedValue::Text("ada".into());
        assert_eq!(registry.format(&name, &value, &Locale::default()), "ADA");
        assert_eq!(registry.operators(&name), vec![FilterOp::IsEmpty, FilterOp::IsNotEmpty]);
    }
}
