//! Rowbase core: runtime-defined entities stored as typed rows.
//!
//! Tenants define entities with typed properties at runtime and store rows
//! for them without migrations. The crate provides the entity catalog, the
//! property type system, a sled-backed row store, the relationship graph,
//! the query engine and the permission resolver, wired together by
//! [`Database`].

pub mod cache;
pub mod catalog;
pub mod database;
pub mod error;
pub mod events;
pub mod ids;
pub mod query;
pub mod relationship;
pub mod security;
pub mod storage;
pub mod types;

pub use catalog::{
    Cardinality, CatalogSnapshot, DeleteBehavior, EntityCatalog, EntityDef, PropertyDef, RelationshipDef,
    SortDirection, SortSpec, TemplateDef, ViewDef,
};
pub use database::Database;
pub use error::{ConflictError, Error, FieldError, ResourceKind, Result, ValidationErrors};
pub use events::{RowAction, RowEvent, RowEventHandler};
pub use ids::{ApiKeyId, EntityId, PropertyId, RelationshipDefId, RelationshipId, RowId, TenantId, UserId};
pub use query::{FilterOp, QueryEngine, QueryRequest, RowFilter, RowPage};
pub use relationship::{Relationship, RelationshipGraph};
pub use security::{Action, Actor, Identity, PermissionResolver};
pub use storage::{EngineConfig, JsonMap, LinkDirection, RetryPolicy, Row, RowStore, StorageConfig};
pub use types::{PropertyKind, PropertyType, PropertyTypeRegistry, TypedValue};
