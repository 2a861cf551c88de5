//! Database facade combining storage, catalog, rows, links and queries.
//!
//! Schema mutations live here because they touch several components at
//! once: the catalog definition, any stored values, and the row cache.
//! Each mutation holds the row store's schema guard exclusively, so no row
//! write runs against a definition that is being changed. It is persisted
//! and followed by a catalog invalidation and reload.

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::catalog::{
    builtin, CatalogSnapshot, EntityCatalog, EntityDef, PropertyDef, RelationshipDef, TemplateDef, ViewDef,
};
use crate::error::{ConflictError, Error, ResourceKind, Result, ValidationErrors};
use crate::events::{EventReceiver, EventSink};
use crate::ids::{EntityId, RelationshipDefId, TenantId};
use crate::query::QueryEngine;
use crate::relationship::RelationshipGraph;
use crate::security::{Action, EntityGrant, PermissionStore, RowGrant};
use crate::storage::{with_retry, EngineConfig, Row, RowStore, StorageEngine};
use crate::types::{PropertyTypeRegistry, ValueStore};

/// An open rowbase database.
pub struct Database {
    storage: Arc<StorageEngine>,
    catalog: Arc<EntityCatalog>,
    permissions: Arc<PermissionStore>,
    registry: Arc<PropertyTypeRegistry>,
    rows: Arc<RowStore>,
    graph: RelationshipGraph,
    query: QueryEngine,
    events: SyncMutex<Option<EventReceiver>>,
}

impl Database {
    /// Open a database with the built-in property types.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_registry(config, PropertyTypeRegistry::standard())
    }

    /// Open a database with a custom property type registry.
    pub fn open_with_registry(config: EngineConfig, registry: PropertyTypeRegistry) -> Result<Self> {
        let storage = Arc::new(StorageEngine::open(config.storage)?);
        let catalog = Arc::new(EntityCatalog::open(storage.db())?);
        let permissions = Arc::new(PermissionStore::open(storage.db())?);
        let registry = Arc::new(registry);

        let (sink, events) = match config.event_buffer {
            Some(buffer) => {
                let (sink, rx) = EventSink::channel(buffer);
                (sink, Some(rx))
            }
            None => (EventSink::disabled(), None),
        };
        let rows = Arc::new(RowStore::new(
            Arc::clone(&storage),
            Arc::clone(&catalog),
            Arc::clone(&permissions),
            Arc::clone(&registry),
            config.row_cache_capacity,
            sink,
        ));
        let graph = RelationshipGraph::new(Arc::clone(&storage), Arc::clone(&rows));
        let query = QueryEngine::new(Arc::clone(&rows));

        let snapshot = catalog.init()?;
        info!(
            entities = snapshot.get_all(None).len(),
            "database opened"
        );

        Ok(Self {
            storage,
            catalog,
            permissions,
            registry,
            rows,
            graph,
            query,
            events: SyncMutex::new(events),
        })
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn registry(&self) -> &PropertyTypeRegistry {
        &self.registry
    }

    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// Take the row event receiver. Returns `None` once taken or when
    /// events are disabled.
    pub fn take_events(&self) -> Option<EventReceiver> {
        self.events.lock().take()
    }

    /// Notified with a new generation on every schema change.
    pub fn subscribe_schema(&self) -> watch::Receiver<u64> {
        self.catalog.subscribe()
    }

    /// Current catalog snapshot.
    pub fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        self.catalog.init()
    }

    /// An entity visible to the tenant, by id, name or slug.
    pub fn entity(&self, tenant: Option<TenantId>, key: &str) -> Result<Arc<EntityDef>> {
        self.catalog.init()?.get_by_id_name_or_slug(tenant, key)
    }

    /// The entity a row belongs to.
    pub fn entity_of(&self, row: &Row) -> Result<Arc<EntityDef>> {
        self.catalog
            .init()?
            .entity(row.entity_id)
            .ok_or_else(|| Error::Consistency(format!("row {} belongs to unknown entity {}", row.id, row.entity_id)))
    }

    /// Flush pending writes.
    pub async fn flush(&self) -> Result<()> {
        self.storage.run("flush", |engine| engine.flush()).await
    }

    fn entity_by_id(snapshot: &CatalogSnapshot, id: EntityId) -> Result<Arc<EntityDef>> {
        snapshot
            .entity(id)
            .ok_or_else(|| Error::not_found(ResourceKind::Entity, id))
    }

    /// Normalize, validate and persist a definition, then reload the catalog.
    async fn store_entity(&self, mut entity: EntityDef) -> Result<Arc<EntityDef>> {
        entity.normalize();
        entity.validate(&self.registry).map_err(Error::Validation)?;
        let id = entity.id;
        let catalog = Arc::clone(&self.catalog);
        with_retry(self.storage.retry_policy(), "store entity", move || catalog.put_entity(&entity)).await?;
        let snapshot = self.refresh().await?;
        Self::entity_by_id(&snapshot, id)
    }

    /// Drop cached rows and the catalog snapshot, then reload.
    async fn refresh(&self) -> Result<Arc<CatalogSnapshot>> {
        self.rows.cache().clear();
        self.catalog.invalidate();
        self.rows.snapshot().await
    }

    async fn has_rows(&self, entity: EntityId) -> Result<bool> {
        self.storage
            .run("check rows", move |engine| engine.entity_has_rows(entity))
            .await
    }

    async fn has_values(&self, entity: EntityId, property: &PropertyDef) -> Result<bool> {
        let store = self.registry.store(property);
        if store == ValueStore::Computed {
            return Ok(false);
        }
        let property = property.id;
        self.storage
            .run("check values", move |engine| engine.property_has_values(entity, property, store))
            .await
    }

    /// Create an entity. Built-in properties are added automatically.
    #[instrument(skip_all, fields(entity = %entity.name))]
    pub async fn define_entity(&self, mut entity: EntityDef) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let snapshot = self.rows.snapshot().await?;
        entity.normalize();
        if snapshot.entity(entity.id).is_some() || snapshot.name_taken(&entity) {
            return Err(ConflictError::Duplicate {
                kind: "entity".into(),
                name: entity.name,
            }
            .into());
        }
        let stored = self.store_entity(entity).await?;
        info!(entity = %stored.name, id = %stored.id, tenant = ?stored.tenant_id, "entity defined");
        Ok(stored)
    }

    /// Append a property to an entity.
    #[instrument(skip(self, property), fields(property = %property.name))]
    pub async fn add_property(&self, entity: EntityId, property: PropertyDef) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let current = Self::entity_by_id(&*self.rows.snapshot().await?, entity)?;
        if builtin::ALL.contains(&property.name.as_str()) {
            return Err(ConflictError::DefaultProperty { property: property.name }.into());
        }
        if current.property(&property.name).is_some() {
            return Err(ConflictError::Duplicate {
                kind: "property".into(),
                name: property.name,
            }
            .into());
        }
        let name = property.name.clone();
        let stored = self.store_entity(current.as_ref().clone().with_property(property)).await?;
        info!(entity = %stored.name, property = %name, "property added");
        Ok(stored)
    }

    /// Replace a property definition.
    ///
    /// The type is fixed once any row stores a value for the property, the
    /// name is fixed once the entity has rows, and uniqueness can only be
    /// switched on while no values exist.
    #[instrument(skip(self, update), fields(property = %name))]
    pub async fn update_property(&self, entity: EntityId, name: &str, mut update: PropertyDef) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let current = Self::entity_by_id(&*self.rows.snapshot().await?, entity)?;
        let existing = current
            .property(name)
            .ok_or_else(|| Error::not_found(ResourceKind::Property, name))?;
        if existing.is_default {
            return Err(ConflictError::DefaultProperty {
                property: name.to_string(),
            }
            .into());
        }

        let (entity_name, property) = (current.name.clone(), name.to_string());
        let populated = self.has_values(entity, existing).await?;
        if existing.kind.property_type() != update.kind.property_type() && populated {
            return Err(ConflictError::ImmutablePropertyType {
                entity: entity_name,
                property,
            }
            .into());
        }
        if update.unique && !existing.unique && populated {
            return Err(ConflictError::UniqueOnPopulated {
                entity: entity_name,
                property,
            }
            .into());
        }
        if update.name != name {
            if current.property(&update.name).is_some() {
                return Err(ConflictError::Duplicate {
                    kind: "property".into(),
                    name: update.name,
                }
                .into());
            }
            if self.has_rows(entity).await? {
                return Err(ConflictError::ImmutablePropertyName {
                    entity: entity_name,
                    property,
                }
                .into());
            }
        }

        update.id = existing.id;
        update.order = existing.order;
        let mut next = current.as_ref().clone();
        for property in &mut next.properties {
            if property.id == update.id {
                *property = update.clone();
            }
        }
        let stored = self.store_entity(next).await?;
        info!(entity = %stored.name, property = %update.name, "property updated");
        Ok(stored)
    }

    /// Remove a custom property and every value stored for it.
    #[instrument(skip(self))]
    pub async fn remove_property(&self, entity: EntityId, name: &str) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let current = Self::entity_by_id(&*self.rows.snapshot().await?, entity)?;
        let property = current
            .property(name)
            .ok_or_else(|| Error::not_found(ResourceKind::Property, name))?
            .clone();
        if property.is_default {
            return Err(ConflictError::DefaultProperty {
                property: name.to_string(),
            }
            .into());
        }

        let mut next = current.as_ref().clone();
        next.properties.retain(|p| p.id != property.id);
        let stored = self.store_entity(next).await?;

        let store = self.registry.store(&property);
        if store != ValueStore::Computed {
            let property_id = property.id;
            let removed = self
                .storage
                .run("purge property", move |engine| {
                    engine.purge_property_values(entity, property_id, store)
                })
                .await?;
            info!(entity = %stored.name, property = %name, removed, "property removed");
        } else {
            info!(entity = %stored.name, property = %name, "formula property removed");
        }
        Ok(stored)
    }

    /// Put custom properties in the given order. Properties not named keep
    /// their relative order after the named ones.
    pub async fn reorder_properties(&self, entity: EntityId, names: &[String]) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let current = Self::entity_by_id(&*self.rows.snapshot().await?, entity)?;
        let mut errors = ValidationErrors::new();
        for name in names {
            match current.property(name) {
                None => errors.add(name, format!("is not a property of {}", current.name)),
                Some(p) if p.is_default => errors.add(name, "built-in properties keep their position"),
                Some(_) => {}
            }
        }
        errors.into_result()?;

        let mut ordered: Vec<&str> = names.iter().map(String::as_str).collect();
        ordered.dedup();
        for property in current.ordered_properties() {
            if !property.is_default && !ordered.contains(&property.name.as_str()) {
                ordered.push(&property.name);
            }
        }
        let mut next = current.as_ref().clone();
        for property in next.properties.iter_mut().filter(|p| !p.is_default) {
            if let Some(position) = ordered.iter().position(|n| *n == property.name) {
                property.order = (builtin::ALL.len() + position) as u32;
            }
        }
        let stored = self.store_entity(next).await?;
        info!(entity = %stored.name, "properties reordered");
        Ok(stored)
    }

    /// Add a view or replace the one with the same name.
    pub async fn put_view(&self, entity: EntityId, view: ViewDef) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let mut next = Self::entity_by_id(&*self.rows.snapshot().await?, entity)?.as_ref().clone();
        next.views.retain(|v| v.name != view.name);
        next.views.push(view);
        self.store_entity(next).await
    }

    /// Add a template or replace the one with the same name.
    pub async fn put_template(&self, entity: EntityId, template: TemplateDef) -> Result<Arc<EntityDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let mut next = Self::entity_by_id(&*self.rows.snapshot().await?, entity)?.as_ref().clone();
        next.templates.retain(|t| t.name != template.name);
        next.templates.push(template);
        self.store_entity(next).await
    }

    /// Delete an entity that has no rows and no relationship definitions.
    #[instrument(skip(self))]
    pub async fn delete_entity(&self, entity: EntityId) -> Result<()> {
        let _schema = self.rows.schema_exclusive().await;
        let snapshot = self.rows.snapshot().await?;
        let current = Self::entity_by_id(&snapshot, entity)?;
        if self.has_rows(entity).await? {
            return Err(ConflictError::EntityInUse {
                entity: current.name.clone(),
                reason: "rows exist".into(),
            }
            .into());
        }
        if let Some(relationship) = snapshot.relationships_involving(entity).first() {
            return Err(ConflictError::EntityInUse {
                entity: current.name.clone(),
                reason: format!("relationship {} references it", relationship.name),
            }
            .into());
        }

        let catalog = Arc::clone(&self.catalog);
        with_retry(self.storage.retry_policy(), "remove entity", move || catalog.remove_entity(entity)).await?;
        let permissions = Arc::clone(&self.permissions);
        let purge = with_retry(self.storage.retry_policy(), "purge entity permissions", move || {
            permissions.purge_entity(entity)
        });
        if let Err(e) = purge.await {
            warn!(entity = %current.name, error = %e, "failed to purge permissions of deleted entity");
        }
        self.refresh().await?;
        info!(entity = %current.name, "entity deleted");
        Ok(())
    }

    /// Declare a relationship type between two entities.
    #[instrument(skip_all, fields(relationship = %relationship.name))]
    pub async fn define_relationship(&self, relationship: RelationshipDef) -> Result<Arc<RelationshipDef>> {
        let _schema = self.rows.schema_exclusive().await;
        let snapshot = self.rows.snapshot().await?;
        let mut errors = ValidationErrors::new();
        if relationship.name.trim().is_empty() {
            errors.add("name", "relationship name cannot be empty");
        }
        for (field, id) in [("parentEntity", relationship.parent_entity), ("childEntity", relationship.child_entity)] {
            match snapshot.entity(id) {
                Some(entity) if entity.visible_to(relationship.tenant_id) => {}
                _ => errors.add(field, format!("entity {id} is not visible here")),
            }
        }
        errors.into_result()?;
        let taken = snapshot
            .relationships(relationship.tenant_id)
            .iter()
            .any(|r| r.id == relationship.id || r.name == relationship.name);
        if taken {
            return Err(ConflictError::Duplicate {
                kind: "relationship".into(),
                name: relationship.name,
            }
            .into());
        }

        let id = relationship.id;
        let name = relationship.name.clone();
        let catalog = Arc::clone(&self.catalog);
        with_retry(self.storage.retry_policy(), "store relationship", move || {
            catalog.put_relationship(&relationship)
        })
        .await?;
        let snapshot = self.refresh().await?;
        info!(relationship = %name, "relationship defined");
        snapshot
            .relationship(id)
            .ok_or_else(|| Error::Consistency(format!("relationship {name} vanished after store")))
    }

    /// Remove a relationship type no rows are linked through.
    pub async fn remove_relationship(&self, id: RelationshipDefId) -> Result<()> {
        let _schema = self.rows.schema_exclusive().await;
        let relationship = self
            .rows
            .snapshot()
            .await?
            .relationship(id)
            .ok_or_else(|| Error::not_found(ResourceKind::Relationship, id))?;
        let in_use = self
            .storage
            .run("check links", move |engine| engine.relationship_in_use(id))
            .await?;
        if in_use {
            return Err(ConflictError::RelationshipInUse {
                relationship: relationship.name.clone(),
            }
            .into());
        }
        let catalog = Arc::clone(&self.catalog);
        with_retry(self.storage.retry_policy(), "remove relationship", move || {
            catalog.remove_relationship(id)
        })
        .await?;
        self.refresh().await?;
        info!(relationship = %relationship.name, "relationship removed");
        Ok(())
    }

    /// Grant a role the given actions on an entity, replacing its previous grant.
    pub async fn grant(&self, entity: EntityId, role: &str, actions: Vec<Action>) -> Result<()> {
        self.rows
            .snapshot()
            .await?
            .entity(entity)
            .ok_or_else(|| Error::not_found(ResourceKind::Entity, entity))?;
        let grant = EntityGrant {
            entity_id: entity,
            role: role.to_string(),
            actions,
        };
        let permissions = Arc::clone(&self.permissions);
        with_retry(self.storage.retry_policy(), "grant entity", move || permissions.grant_entity(&grant)).await?;
        info!(entity = %entity, role, "entity permission granted");
        Ok(())
    }

    /// Remove a role's grant on an entity.
    pub async fn revoke(&self, entity: EntityId, role: &str) -> Result<bool> {
        let permissions = Arc::clone(&self.permissions);
        let role = role.to_string();
        with_retry(self.storage.retry_policy(), "revoke entity", move || {
            permissions.revoke_entity(entity, &role)
        })
        .await
    }

    /// Set a row-level allow or deny entry for one identity.
    pub async fn grant_row(&self, grant: RowGrant) -> Result<()> {
        let permissions = Arc::clone(&self.permissions);
        with_retry(self.storage.retry_policy(), "grant row", move || permissions.set_row_grant(&grant)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyKind;

    #[tokio::test]
    async fn test_define_entity_adds_builtins_and_rejects_duplicates() {
        let db = Database::open(EngineConfig::temporary()).unwrap();
        let entity = db
            .define_entity(EntityDef::new("Invoice").with_property(PropertyDef::new("amount", PropertyKind::number())))
            .await
            .unwrap();
        assert_eq!(entity.slug, "invoice");
        for name in builtin::ALL {
            assert!(entity.property(name).unwrap().is_default);
        }

        let err = db.define_entity(EntityDef::new("Invoice")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(ConflictError::Duplicate { .. })));
        assert_eq!(db.catalog().get_all(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_builtins_cannot_be_changed() {
        let db = Database::open(EngineConfig::temporary()).unwrap();
        let entity = db.define_entity(EntityDef::new("Task")).await.unwrap();
        let err = db.remove_property(entity.id, builtin::FOLIO).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(ConflictError::DefaultProperty { .. })));
        let err = db
            .add_property(entity.id, PropertyDef::new(builtin::ID, PropertyKind::number()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ConflictError::DefaultProperty { .. })));
    }

    #[tokio::test]
    async fn test_schema_change_broadcasts_invalidation() {
        let db = Database::open(EngineConfig::temporary()).unwrap();
        let mut rx = db.subscribe_schema();
        let before = *rx.borrow_and_update();
        db.define_entity(EntityDef::new("Note")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow() > before);
    }

    #[tokio::test]
    async fn test_reorder_moves_named_properties_first() {
        let db = Database::open(EngineConfig::temporary()).unwrap();
        let entity = db
            .define_entity(
                EntityDef::new("Contact")
                    .with_property(PropertyDef::new("name", PropertyKind::text()))
                    .with_property(PropertyDef::new("email", PropertyKind::text()))
                    .with_property(PropertyDef::new("phone", PropertyKind::text())),
            )
            .await
            .unwrap();
        let entity = db
            .reorder_properties(entity.id, &["phone".to_string()])
            .await
            .unwrap();
        let custom: Vec<&str> = entity
            .ordered_properties()
            .into_iter()
            .filter(|p| !p.is_default)
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(custom, vec!["phone", "name", "email"]);

        let err = db.reorder_properties(entity.id, &["missing".to_string()]).await.unwrap_err();
        assert!(err.field_errors().unwrap().contains("missing"));
    }
}
