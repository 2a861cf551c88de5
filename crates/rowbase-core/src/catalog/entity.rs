//! Entity definitions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::property::PropertyDef;
use super::view::{PropertyGroup, SortSpec, TemplateDef, ViewDef, ViewLayout};
use crate::error::ValidationErrors;
use crate::ids::{EntityId, PropertyId, TenantId};
use crate::types::formula::Expr;
use crate::types::{PropertyKind, PropertyType, PropertyTypeRegistry};

/// Lifecycle rules for an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifecycleRules {
    /// Deleted rows keep a tombstone instead of being removed.
    pub soft_delete: bool,
    /// Ordering applied when a query names no sort.
    pub default_order: Vec<SortSpec>,
}

/// A runtime-defined schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDef {
    #[serde(default)]
    pub id: EntityId,
    /// `None` for system entities visible to every tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Unique among the entities visible to a tenant.
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_plural: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub views: Vec<ViewDef>,
    #[serde(default)]
    pub groups: Vec<PropertyGroup>,
    #[serde(default)]
    pub templates: Vec<TemplateDef>,
    #[serde(default)]
    pub lifecycle: LifecycleRules,
}

/// Lowercase, dash-separated and URL-safe.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn is_url_safe(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl EntityDef {
    /// A tenant-less entity carrying the built-in properties.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: EntityId::new(),
            tenant_id: None,
            slug: slugify(&name),
            title: name.clone(),
            title_plural: format!("{name}s"),
            name,
            icon: None,
            is_system: false,
            properties: PropertyDef::defaults(),
            views: Vec::new(),
            groups: Vec::new(),
            templates: Vec::new(),
            lifecycle: LifecycleRules::default(),
        }
    }

    pub fn for_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self.tenant_id = None;
        self
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    pub fn with_titles(mut self, title: impl Into<String>, plural: impl Into<String>) -> Self {
        self.title = title.into();
        self.title_plural = plural.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Append a property after the existing ones.
    pub fn with_property(mut self, mut property: PropertyDef) -> Self {
        property.order = self.next_order();
        self.properties.push(property);
        self
    }

    pub fn with_view(mut self, view: ViewDef) -> Self {
        self.views.push(view);
        self
    }

    pub fn with_group(mut self, group: PropertyGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_template(mut self, template: TemplateDef) -> Self {
        self.templates.push(template);
        self
    }

    pub fn with_soft_delete(mut self) -> Self {
        self.lifecycle.soft_delete = true;
        self
    }

    pub fn with_default_order(mut self, order: Vec<SortSpec>) -> Self {
        self.lifecycle.default_order = order;
        self
    }

    pub fn has_soft_delete(&self) -> bool {
        self.lifecycle.soft_delete
    }

    pub fn visible_to(&self, tenant: Option<TenantId>) -> bool {
        self.tenant_id.is_none() || self.tenant_id == tenant
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_by_id(&self, id: PropertyId) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.id == id)
    }

    /// Properties in display order.
    pub fn ordered_properties(&self) -> Vec<&PropertyDef> {
        let mut properties: Vec<&PropertyDef> = self.properties.iter().collect();
        properties.sort_by_key(|p| p.order);
        properties
    }

    /// Properties whose values live in the row value stores.
    pub fn custom_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| !p.is_default)
    }

    pub fn view(&self, name: &str) -> Option<&ViewDef> {
        self.views.iter().find(|v| v.name == name)
    }

    pub fn template(&self, name: &str) -> Option<&TemplateDef> {
        self.templates.iter().find(|t| t.name == name)
    }

    fn next_order(&self) -> u32 {
        self.properties.iter().map(|p| p.order + 1).max().unwrap_or(0)
    }

    /// Fill derived fields and restore the built-in properties.
    ///
    /// Applied to every definition before it is validated and stored.
    pub fn normalize(&mut self) {
        if self.slug.is_empty() {
            self.slug = slugify(&self.name);
        }
        if self.title.is_empty() {
            self.title = self.name.clone();
        }
        if self.title_plural.is_empty() {
            self.title_plural = format!("{}s", self.title);
        }
        if self.is_system {
            self.tenant_id = None;
        }

        let mut builtins = PropertyDef::defaults();
        for builtin in &mut builtins {
            if let Some(existing) = self.properties.iter().find(|p| p.name == builtin.name) {
                builtin.id = existing.id;
            }
        }
        let custom: Vec<PropertyDef> = self
            .properties
            .drain(..)
            .filter(|p| !builtins.iter().any(|b| b.name == p.name))
            .collect();
        let mut custom = custom;
        custom.sort_by_key(|p| p.order);
        self.properties = builtins;
        for (i, mut property) in custom.into_iter().enumerate() {
            property.order = (super::property::builtin::ALL.len() + i) as u32;
            property.is_default = false;
            if property.title.is_empty() {
                property.title = property.name.clone();
            }
            self.properties.push(property);
        }
    }

    /// Check the definition as a whole, collecting every problem.
    pub fn validate(&self, registry: &PropertyTypeRegistry) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.name.trim().is_empty() {
            errors.add("name", "entity name cannot be empty");
        }
        if !is_url_safe(&self.slug) {
            errors.add("slug", format!("'{}' is not URL-safe", self.slug));
        }

        let mut names = HashSet::new();
        for property in &self.properties {
            if property.name.trim().is_empty() {
                errors.add("properties", "property name cannot be empty");
                continue;
            }
            if !names.insert(property.name.as_str()) {
                errors.add(&property.name, "property name is defined twice");
            }
            if let Err(error) = registry.validate_definition(property) {
                errors.push(error);
            }
            self.validate_property_references(property, &mut errors);
            if let Some(default) = &property.default_value {
                if property.is_default {
                    errors.add(&property.name, "built-in properties cannot carry a default");
                } else if let Err(error) = registry.validate(property, default) {
                    errors.add(&property.name, format!("invalid default: {}", error.reason));
                }
            }
            if property.unique && registry.store(property) != crate::types::ValueStore::Scalar {
                errors.add(&property.name, "only single-valued properties can be unique");
            }
        }

        for view in &self.views {
            for referenced in view.referenced_properties() {
                if self.property(referenced).is_none() {
                    errors.add(
                        format!("views.{}", view.name),
                        format!("unknown property '{referenced}'"),
                    );
                }
            }
            let layout_type = match &view.layout {
                ViewLayout::Table => None,
                ViewLayout::Board { group_by } => Some((group_by, &[PropertyType::Select][..])),
                ViewLayout::Calendar { date_property } => {
                    Some((date_property, &[PropertyType::Date, PropertyType::RangeDate][..]))
                }
            };
            if let Some((name, allowed)) = layout_type {
                if let Some(p) = self.property(name) {
                    if !allowed.contains(&p.kind.property_type()) {
                        errors.add(
                            format!("views.{}", view.name),
                            format!("'{name}' cannot drive a {:?} layout", view.layout),
                        );
                    }
                }
            }
            if view.page_size == 0 || view.page_size < -1 {
                errors.add(format!("views.{}", view.name), "pageSize must be positive or -1");
            }
        }

        for group in &self.groups {
            for referenced in &group.properties {
                if self.property(referenced).is_none() {
                    errors.add(
                        format!("groups.{}", group.name),
                        format!("unknown property '{referenced}'"),
                    );
                }
            }
        }

        for template in &self.templates {
            for key in template.values.keys() {
                if self.property(key).is_none() {
                    errors.add(
                        format!("templates.{}", template.name),
                        format!("unknown property '{key}'"),
                    );
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Formulas may only read NUMBER properties of the same entity.
    fn validate_property_references(&self, property: &PropertyDef, errors: &mut ValidationErrors) {
        let PropertyKind::Formula(attrs) = &property.kind else {
            return;
        };
        let Ok(expr) = Expr::parse(&attrs.expression) else {
            return;
        };
        for name in expr.references() {
            match self.property(name) {
                Some(p) if p.kind.property_type() == PropertyType::Number => {}
                Some(_) => errors.add(&property.name, format!("formula reads '{name}', which is not a NUMBER")),
                None => errors.add(&property.name, format!("formula reads unknown property '{name}'")),
            }
        }
    }
}
