//! Entity catalog.
//!
//! Runtime-defined schemas: entities, their properties, views, groups,
//! templates and the relationship types between them.

#[allow(clippy::module_inception)]
mod catalog;
mod entity;
mod property;
mod relationship;
mod view;

pub use catalog::{CatalogSnapshot, EntityCatalog};
pub use entity::{slugify, EntityDef, LifecycleRules};
pub use property::{builtin, PropertyDef};
pub use relationship::{Cardinality, DeleteBehavior, RelationshipDef};
pub use view::{PropertyGroup, SortDirection, SortSpec, TemplateDef, ViewDef, ViewLayout};
