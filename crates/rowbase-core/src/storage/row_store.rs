//! Row store: create, read, update and delete rows of any entity.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, instrument, warn};

use super::engine::{LinkDirection, RowDelete, RowWrite, StorageEngine, UniqueClaim};
use super::key;
use super::record::RowRecord;
use super::retry::with_retry;
use super::row::Row;
use crate::cache::{Lookup, RowCache};
use crate::catalog::{CatalogSnapshot, DeleteBehavior, EntityCatalog, EntityDef, PropertyDef};
use crate::error::{ConflictError, Error, ResourceKind, Result, ValidationErrors};
use crate::events::{EventSink, RowAction, RowEvent};
use crate::ids::{EntityId, PropertyId, RowId, TenantId};
use crate::security::{Action, Actor, PermissionData, PermissionResolver, PermissionStore};
use crate::types::{to_micros, PropertyTypeRegistry, TypedValue, ValueStore};

/// Deepest chain of cascading deletes followed from one row.
pub const MAX_CASCADE_DEPTH: usize = 32;

/// Submitted values, keyed by property name.
pub type JsonMap = Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Create,
    Update,
}

/// Outcome of a bulk import.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub created: Vec<RowId>,
    /// Input position and failure of each rejected row.
    pub failures: Vec<(usize, Error)>,
}

/// Holds a per-row write lock; drops the map entry when nobody else waits.
struct RowGuard<'a> {
    locks: &'a DashMap<RowId, Arc<Mutex<()>>>,
    row: RowId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.row, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Stored properties of an entity and the sub-store each lives in.
fn layout(entity: &EntityDef, registry: &PropertyTypeRegistry) -> Vec<(PropertyId, ValueStore)> {
    entity
        .custom_properties()
        .map(|p| (p.id, registry.store(p)))
        .filter(|(_, store)| *store != ValueStore::Computed)
        .collect()
}

fn now_micros() -> i64 {
    to_micros(&Utc::now())
}

fn unique_key(entity: &EntityDef, property: &PropertyDef, tenant: Option<TenantId>, value: &TypedValue) -> Vec<u8> {
    key::unique_key(entity.id, property.id, tenant, &value.canonical_key())
}

/// Header and values of a live row, resolved against the current catalog.
fn load_blocking(
    engine: &StorageEngine,
    catalog: &EntityCatalog,
    registry: &PropertyTypeRegistry,
    row_id: RowId,
) -> Result<Option<Row>> {
    let snapshot = catalog.init()?;
    let unknown_entity =
        |entity_id: EntityId| Error::Consistency(format!("row {row_id} belongs to unknown entity {entity_id}"));
    let stored = engine.read_row(row_id, |entity_id| {
        let entity = snapshot.entity(entity_id).ok_or_else(|| unknown_entity(entity_id))?;
        Ok(layout(&entity, registry))
    })?;
    let Some((record, stored)) = stored else {
        return Ok(None);
    };

    let entity = snapshot
        .entity(record.entity_id)
        .ok_or_else(|| unknown_entity(record.entity_id))?;
    let mut values = BTreeMap::new();
    for (property_id, stored) in stored {
        let Some(property) = entity.property_by_id(property_id) else {
            continue;
        };
        values.insert(property.name.clone(), registry.deserialize_from_storage(property, &stored)?);
    }
    let mut row = Row::from_record(&record, values)?;
    row.compute_formulas(&entity);
    Ok(Some(row))
}

/// Generic row storage for runtime-defined entities.
///
/// Every write validates against the entity's properties through the
/// [`PropertyTypeRegistry`], checks permissions through the
/// [`PermissionResolver`] and commits header and values in one transaction.
/// Writers to the same row are serialized by a per-row lock, and all row
/// writes share a schema guard that schema changes take exclusively.
pub struct RowStore {
    storage: Arc<StorageEngine>,
    catalog: Arc<EntityCatalog>,
    permissions: Arc<PermissionStore>,
    registry: Arc<PropertyTypeRegistry>,
    cache: RowCache,
    locks: DashMap<RowId, Arc<Mutex<()>>>,
    schema: RwLock<()>,
    events: EventSink,
}

impl RowStore {
    pub fn new(
        storage: Arc<StorageEngine>,
        catalog: Arc<EntityCatalog>,
        permissions: Arc<PermissionStore>,
        registry: Arc<PropertyTypeRegistry>,
        cache_capacity: usize,
        events: EventSink,
    ) -> Self {
        Self {
            storage,
            catalog,
            permissions,
            registry,
            cache: RowCache::new(cache_capacity),
            locks: DashMap::new(),
            schema: RwLock::new(()),
            events,
        }
    }

    /// Current catalog snapshot. A cold catalog is loaded on the blocking pool.
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Ok(snapshot) = self.catalog.snapshot() {
            return Ok(snapshot);
        }
        let catalog = Arc::clone(&self.catalog);
        self.storage.run("load catalog", move |_| catalog.init()).await
    }

    /// Shared side of the schema guard, held by row and link writes.
    pub(crate) async fn schema_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.schema.read().await
    }

    /// Exclusive side of the schema guard, held by schema changes.
    pub(crate) async fn schema_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.schema.write().await
    }

    /// The caller's entity as the current catalog defines it.
    async fn current_entity(&self, entity: &EntityDef) -> Result<Arc<EntityDef>> {
        self.snapshot()
            .await?
            .entity(entity.id)
            .ok_or_else(|| Error::not_found(ResourceKind::Entity, &entity.name))
    }

    pub fn registry(&self) -> &PropertyTypeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &RowCache {
        &self.cache
    }

    /// Permission entries for an entity and the given rows.
    pub async fn permission_data(&self, entity: EntityId, rows: Vec<RowId>) -> Result<PermissionData> {
        let store = Arc::clone(&self.permissions);
        with_retry(self.storage.retry_policy(), "load permissions", move || store.load(entity, &rows)).await
    }

    async fn lock_row(&self, row: RowId) -> RowGuard<'_> {
        let lock = Arc::clone(self.locks.entry(row).or_default().value());
        let guard = lock.lock_owned().await;
        RowGuard {
            locks: &self.locks,
            row,
            guard: Some(guard),
        }
    }

    async fn load(&self, row_id: RowId) -> Result<Option<Row>> {
        let catalog = Arc::clone(&self.catalog);
        let registry = Arc::clone(&self.registry);
        self.storage
            .run("read row", move |engine| load_blocking(engine, &catalog, &registry, row_id))
            .await
    }

    /// Fetch a row without permission checks, through the cache.
    #[instrument(skip(self))]
    pub async fn get(&self, row_id: RowId) -> Result<Arc<Row>> {
        match self.cache.get(row_id) {
            Lookup::Hit(row) => return Ok(row),
            Lookup::Gone => return Err(Error::not_found(ResourceKind::Row, row_id)),
            Lookup::Miss => {}
        }
        let row = self
            .load(row_id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| Error::not_found(ResourceKind::Row, row_id))?;
        self.cache.fill(Arc::clone(&row));
        Ok(row)
    }

    /// Fetch many rows, skipping ids that no longer resolve. Keeps input order.
    pub async fn get_many(&self, ids: Vec<RowId>) -> Result<Vec<Arc<Row>>> {
        let mut found: Vec<Option<Arc<Row>>> = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (position, id) in ids.iter().enumerate() {
            match self.cache.get(*id) {
                Lookup::Hit(row) => found.push(Some(row)),
                Lookup::Gone => found.push(None),
                Lookup::Miss => {
                    found.push(None);
                    missing.push((position, *id));
                }
            }
        }

        if !missing.is_empty() {
            let catalog = Arc::clone(&self.catalog);
            let registry = Arc::clone(&self.registry);
            let batch: Vec<RowId> = missing.iter().map(|(_, id)| *id).collect();
            let loaded = self
                .storage
                .run("read rows", move |engine| {
                    batch
                        .iter()
                        .map(|id| load_blocking(engine, &catalog, &registry, *id))
                        .collect::<Result<Vec<_>>>()
                })
                .await?;
            for ((position, _), row) in missing.into_iter().zip(loaded) {
                if let Some(row) = row {
                    let row = Arc::new(row);
                    self.cache.fill(Arc::clone(&row));
                    found[position] = Some(row);
                }
            }
        }
        Ok(found.into_iter().flatten().collect())
    }

    fn entity_of(&self, snapshot: &CatalogSnapshot, row: &Row) -> Result<Arc<EntityDef>> {
        snapshot
            .entity(row.entity_id)
            .ok_or_else(|| Error::Consistency(format!("row {} belongs to unknown entity {}", row.id, row.entity_id)))
    }

    /// Fetch a row the actor may read.
    ///
    /// Rows the actor cannot read report `NotFound`, exactly like absent rows.
    pub async fn read(&self, actor: &Actor, row_id: RowId) -> Result<Arc<Row>> {
        let row = self.get(row_id).await?;
        let snapshot = self.snapshot().await?;
        let entity = self.entity_of(&snapshot, &row)?;
        let data = self.permission_data(entity.id, vec![row_id]).await?;
        if !actor.reaches_tenant(row.tenant_id)
            || !PermissionResolver::check(Some(actor), &entity, Some(row_id), Action::Read, &data)
        {
            return Err(Error::not_found(ResourceKind::Row, row_id));
        }
        Ok(row)
    }

    /// Live rows of an entity in one tenant partition, in creation order.
    pub async fn list(&self, entity: &EntityDef, tenant: Option<TenantId>) -> Result<Vec<Arc<Row>>> {
        let entity_id = entity.id;
        let ids = self
            .storage
            .run("list rows", move |engine| engine.list_row_ids(entity_id, tenant))
            .await?;
        self.get_many(ids).await
    }

    /// Validate submitted values, collecting every failing field.
    ///
    /// Built-in properties are valued from the row header and ignored here.
    /// On create, defaults fill absent properties and required ones must end
    /// up with a value. On update, `None` clears a property.
    fn resolve_values(
        &self,
        entity: &EntityDef,
        input: &JsonMap,
        mode: WriteMode,
    ) -> Result<BTreeMap<String, Option<TypedValue>>> {
        let mut errors = ValidationErrors::new();
        let mut resolved = BTreeMap::new();

        for (name, raw) in input {
            let Some(property) = entity.property(name) else {
                errors.add(name, format!("is not a property of {}", entity.name));
                continue;
            };
            if property.is_default {
                continue;
            }
            if mode == WriteMode::Update && property.read_only {
                errors.add(name, "is read-only");
                continue;
            }
            match self.registry.validate(property, raw) {
                Ok(None) if mode == WriteMode::Update && property.required => errors.add(name, "is required"),
                Ok(value) => {
                    resolved.insert(name.clone(), value);
                }
                Err(error) => errors.push(error),
            }
        }

        if mode == WriteMode::Create {
            for property in entity.custom_properties() {
                if errors.contains(&property.name) || self.registry.store(property) == ValueStore::Computed {
                    continue;
                }
                let has_value = matches!(resolved.get(&property.name), Some(Some(_)));
                if !has_value {
                    if let Some(default) = &property.default_value {
                        match self.registry.validate(property, default) {
                            Ok(Some(value)) => {
                                resolved.insert(property.name.clone(), Some(value));
                                continue;
                            }
                            Ok(None) => {}
                            Err(error) => {
                                errors.push(error);
                                continue;
                            }
                        }
                    }
                    if property.required {
                        errors.add(&property.name, "is required");
                    }
                }
            }
            resolved.retain(|_, value| value.is_some());
        }

        errors.into_result()?;
        Ok(resolved)
    }

    fn notify(&self, entity: &EntityDef, row_id: RowId, tenant_id: Option<TenantId>, action: RowAction) {
        self.events.notify(RowEvent {
            entity: entity.name.clone(),
            entity_id: entity.id,
            row_id,
            tenant_id,
            action,
        });
    }

    /// Create a row.
    ///
    /// The folio is taken before the write, so a failed create leaves a gap
    /// in the sequence.
    #[instrument(skip(self, entity, actor, values), fields(entity = %entity.name))]
    pub async fn create(
        &self,
        entity: &EntityDef,
        tenant: Option<TenantId>,
        actor: &Actor,
        values: &JsonMap,
    ) -> Result<Arc<Row>> {
        let _schema = self.schema_shared().await;
        let current = self.current_entity(entity).await?;
        let entity = current.as_ref();
        if !entity.visible_to(tenant) {
            return Err(Error::not_found(ResourceKind::Entity, &entity.name));
        }
        if !actor.writes_tenant(tenant) {
            return Err(Error::Permission(format!("{} may not write to this tenant", actor.identity)));
        }
        let data = self.permission_data(entity.id, Vec::new()).await?;
        if !PermissionResolver::check(Some(actor), entity, None, Action::Create, &data) {
            return Err(Error::Permission(format!("{} may not create {}", actor.identity, entity.name)));
        }

        let resolved = self.resolve_values(entity, values, WriteMode::Create)?;
        let mut values = BTreeMap::new();
        let mut puts = Vec::new();
        let mut claims = Vec::new();
        for (name, value) in resolved {
            let (Some(property), Some(value)) = (entity.property(&name), value) else {
                continue;
            };
            if property.unique {
                claims.push(UniqueClaim {
                    key: unique_key(entity, property, tenant, &value),
                    entity: entity.name.clone(),
                    property: property.name.clone(),
                    value: value.canonical_key(),
                });
            }
            if let Some(stored) = self.registry.serialize_for_storage(property, &value)? {
                puts.push((property.id, stored));
            }
            values.insert(name, value);
        }

        let entity_id = entity.id;
        let folio = self
            .storage
            .run("next folio", move |engine| engine.next_folio(entity_id, tenant))
            .await?;
        let now = now_micros();
        let write = Arc::new(RowWrite {
            record: RowRecord {
                id: RowId::new(),
                entity_id,
                tenant_id: tenant,
                folio,
                created_by: actor.identity,
                created_at: now,
                updated_at: now,
                deleted_at: None,
                version: 1,
            },
            is_new: true,
            puts,
            removes: Vec::new(),
            claims,
            releases: Vec::new(),
        });
        let pending = Arc::clone(&write);
        self.storage
            .run("create row", move |engine| engine.write_row(&pending))
            .await?;

        let mut row = Row::from_record(&write.record, values)?;
        row.compute_formulas(entity);
        let row = Arc::new(row);
        self.cache.put(Arc::clone(&row));
        self.notify(entity, row.id, tenant, RowAction::Created);
        debug!(row = %row.id, folio, "row created");
        Ok(row)
    }

    /// Create a row pre-filled from one of the entity's templates.
    /// Submitted values override the template's.
    pub async fn create_from_template(
        &self,
        entity: &EntityDef,
        template: &str,
        tenant: Option<TenantId>,
        actor: &Actor,
        values: &JsonMap,
    ) -> Result<Arc<Row>> {
        let current = self.current_entity(entity).await?;
        let template = current
            .template(template)
            .ok_or_else(|| Error::not_found(ResourceKind::Template, template))?;
        let mut merged = template.values.clone();
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.create(&current, tenant, actor, &merged).await
    }

    /// Update the submitted properties of a row. Other properties are untouched;
    /// `null` clears a property; multi-valued collections are replaced whole.
    #[instrument(skip(self, entity, actor, values), fields(entity = %entity.name))]
    pub async fn update(&self, row_id: RowId, entity: &EntityDef, actor: &Actor, values: &JsonMap) -> Result<Arc<Row>> {
        let _schema = self.schema_shared().await;
        let _guard = self.lock_row(row_id).await;
        let latest = self.current_entity(entity).await?;
        let entity = latest.as_ref();

        let current = self
            .load(row_id)
            .await?
            .filter(|row| row.entity_id == entity.id)
            .ok_or_else(|| Error::not_found(ResourceKind::Row, row_id))?;
        let data = self.permission_data(entity.id, vec![row_id]).await?;
        if !actor.reaches_tenant(current.tenant_id)
            || !PermissionResolver::check(Some(actor), entity, Some(row_id), Action::Read, &data)
        {
            return Err(Error::not_found(ResourceKind::Row, row_id));
        }
        if !actor.writes_tenant(current.tenant_id) {
            return Err(Error::Permission(format!("{} may not write to this tenant", actor.identity)));
        }
        if !PermissionResolver::check(Some(actor), entity, Some(row_id), Action::Update, &data) {
            return Err(Error::Permission(format!("{} may not update row {row_id}", actor.identity)));
        }

        let resolved = self.resolve_values(entity, values, WriteMode::Update)?;
        let mut next = current.values.clone();
        let mut puts = Vec::new();
        let mut removes = Vec::new();
        let mut claims = Vec::new();
        let mut releases = Vec::new();
        for (name, value) in resolved {
            let Some(property) = entity.property(&name) else {
                continue;
            };
            let previous = current.values.get(&name);
            if property.unique {
                if let Some(previous) = previous {
                    if Some(previous) != value.as_ref() {
                        releases.push(unique_key(entity, property, current.tenant_id, previous));
                    }
                }
                if let Some(value) = &value {
                    claims.push(UniqueClaim {
                        key: unique_key(entity, property, current.tenant_id, value),
                        entity: entity.name.clone(),
                        property: property.name.clone(),
                        value: value.canonical_key(),
                    });
                }
            }
            match value {
                Some(value) => {
                    if let Some(stored) = self.registry.serialize_for_storage(property, &value)? {
                        puts.push((property.id, stored));
                    }
                    next.insert(name, value);
                }
                None => {
                    removes.push((property.id, self.registry.store(property)));
                    next.remove(&name);
                }
            }
        }

        let write = Arc::new(RowWrite {
            record: RowRecord {
                id: current.id,
                entity_id: current.entity_id,
                tenant_id: current.tenant_id,
                folio: current.folio,
                created_by: current.created_by,
                created_at: to_micros(&current.created_at),
                updated_at: now_micros(),
                deleted_at: None,
                version: current.version + 1,
            },
            is_new: false,
            puts,
            removes,
            claims,
            releases,
        });
        let pending = Arc::clone(&write);
        self.storage
            .run("update row", move |engine| engine.write_row(&pending))
            .await?;

        let mut row = Row::from_record(&write.record, next)?;
        row.compute_formulas(entity);
        let row = Arc::new(row);
        self.cache.put(Arc::clone(&row));
        self.notify(entity, row_id, row.tenant_id, RowAction::Updated);
        debug!(row = %row_id, version = row.version, "row updated");
        Ok(row)
    }

    /// Delete a row together with its values and links.
    ///
    /// Children linked through a `required` relationship block the delete;
    /// children linked through a `cascade` relationship are deleted first,
    /// each as its own step. Returns the number of rows deleted.
    #[instrument(skip(self, actor))]
    pub async fn delete(&self, row_id: RowId, actor: &Actor) -> Result<usize> {
        let _schema = self.schema_shared().await;
        let row = self.get(row_id).await?;
        let snapshot = self.snapshot().await?;
        let entity = self.entity_of(&snapshot, &row)?;
        let data = self.permission_data(entity.id, vec![row_id]).await?;
        if !actor.reaches_tenant(row.tenant_id)
            || !PermissionResolver::check(Some(actor), &entity, Some(row_id), Action::Read, &data)
        {
            return Err(Error::not_found(ResourceKind::Row, row_id));
        }
        if !actor.writes_tenant(row.tenant_id) {
            return Err(Error::Permission(format!("{} may not write to this tenant", actor.identity)));
        }
        if !PermissionResolver::check(Some(actor), &entity, Some(row_id), Action::Delete, &data) {
            return Err(Error::Permission(format!("{} may not delete row {row_id}", actor.identity)));
        }

        let plan = self.plan_delete(&snapshot, actor, row_id).await?;
        let mut deleted = 0;
        for step in plan {
            if self.delete_one(&snapshot, step).await? {
                deleted += 1;
            }
        }
        debug!(row = %row_id, deleted, "delete finished");
        Ok(deleted)
    }

    /// Rows to delete, descendants before their parents.
    async fn plan_delete(&self, snapshot: &CatalogSnapshot, actor: &Actor, root: RowId) -> Result<Vec<RowId>> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(root, 0usize, false)];

        while let Some((row_id, depth, expanded)) = stack.pop() {
            if expanded {
                order.push(row_id);
                continue;
            }
            if !seen.insert(row_id) {
                continue;
            }
            if depth > MAX_CASCADE_DEPTH {
                return Err(ConflictError::CascadeDepth {
                    depth: MAX_CASCADE_DEPTH,
                }
                .into());
            }
            if row_id != root {
                self.check_cascade_permission(snapshot, actor, row_id).await?;
            }
            stack.push((row_id, depth, true));

            let links = self
                .storage
                .run("read links", move |engine| engine.links_of(row_id, LinkDirection::Children))
                .await?;
            for link in &links {
                let Some(relationship) = snapshot.relationship(link.relationship) else {
                    continue;
                };
                match relationship.on_parent_delete {
                    DeleteBehavior::Required => {
                        return Err(ConflictError::DeleteRestricted {
                            row: row_id,
                            relationship: relationship.name.clone(),
                            count: links.iter().filter(|l| l.relationship == relationship.id).count(),
                        }
                        .into());
                    }
                    DeleteBehavior::Cascade => stack.push((link.row, depth + 1, false)),
                    DeleteBehavior::Detach => {}
                }
            }
        }
        Ok(order)
    }

    async fn check_cascade_permission(&self, snapshot: &CatalogSnapshot, actor: &Actor, row_id: RowId) -> Result<()> {
        let row = match self.get(row_id).await {
            Ok(row) => row,
            Err(Error::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let entity = self.entity_of(snapshot, &row)?;
        let data = self.permission_data(entity.id, vec![row_id]).await?;
        if !PermissionResolver::check(Some(actor), &entity, Some(row_id), Action::Delete, &data) {
            return Err(Error::Permission(format!(
                "{} may not delete dependent row {row_id} of {}",
                actor.identity, entity.name
            )));
        }
        Ok(())
    }

    /// One bounded, retryable delete step.
    async fn delete_one(&self, snapshot: &CatalogSnapshot, row_id: RowId) -> Result<bool> {
        let _guard = self.lock_row(row_id).await;
        let Some(row) = self.load(row_id).await? else {
            return Ok(false);
        };
        let entity = self.entity_of(snapshot, &row)?;

        let releases = entity
            .custom_properties()
            .filter(|p| p.unique)
            .filter_map(|p| row.value(&p.name).map(|v| unique_key(&entity, p, row.tenant_id, v)))
            .collect();
        let restricted = snapshot
            .relationships_as_parent(entity.id)
            .into_iter()
            .filter(|r| r.on_parent_delete == DeleteBehavior::Required)
            .map(|r| (r.id, r.name.clone()))
            .collect();
        let delete = Arc::new(RowDelete {
            row: row_id,
            soft: entity.has_soft_delete(),
            deleted_at: now_micros(),
            values: layout(&entity, &self.registry),
            releases,
            restricted,
        });
        let removed = self
            .storage
            .run("delete row", move |engine| engine.delete_row(&delete))
            .await?;
        if removed.is_none() {
            return Ok(false);
        }

        self.cache.tombstone(row_id);
        let permissions = Arc::clone(&self.permissions);
        let purge = with_retry(self.storage.retry_policy(), "purge row permissions", move || {
            permissions.purge_row(row_id)
        });
        if let Err(e) = purge.await {
            warn!(row = %row_id, error = %e, "failed to purge permissions of deleted row");
        }
        self.notify(&entity, row_id, row.tenant_id, RowAction::Deleted);
        Ok(true)
    }

    /// Create many rows, each independently. Failures are reported per row
    /// and do not stop the import.
    pub async fn import(
        &self,
        entity: &EntityDef,
        tenant: Option<TenantId>,
        actor: &Actor,
        rows: &[JsonMap],
    ) -> ImportReport {
        let mut report = ImportReport::default();
        for (position, values) in rows.iter().enumerate() {
            match self.create(entity, tenant, actor, values).await {
                Ok(row) => report.created.push(row.id),
                Err(error) => {
                    debug!(position, %error, "import row rejected");
                    report.failures.push((position, error));
                }
            }
        }
        report
    }
}
