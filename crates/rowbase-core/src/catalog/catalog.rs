//! Entity catalog: persisted definitions plus the cached snapshot readers use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sled::{Db, Tree};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::{EntityDef, RelationshipDef};
use crate::error::{Error, ResourceKind, Result};
use crate::ids::{EntityId, RelationshipDefId, TenantId};

/// Tree name for entity definitions.
const ENTITY_TREE: &str = "catalog:entities";

/// Tree name for relationship definitions.
const RELATIONSHIP_TREE: &str = "catalog:relationships";

/// An immutable view of every definition, as loaded by one initialization.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    generation: u64,
    entities: Vec<Arc<EntityDef>>,
    relationships: Vec<Arc<RelationshipDef>>,
}

impl CatalogSnapshot {
    pub fn new(generation: u64, entities: Vec<EntityDef>, relationships: Vec<RelationshipDef>) -> Self {
        let mut entities: Vec<Arc<EntityDef>> = entities.into_iter().map(Arc::new).collect();
        entities.sort_by(|a, b| b.is_system.cmp(&a.is_system).then_with(|| a.name.cmp(&b.name)));
        Self {
            generation,
            entities,
            relationships: relationships.into_iter().map(Arc::new).collect(),
        }
    }

    /// Invalidation generation this snapshot was loaded under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// System entities plus the tenant's own, system first.
    pub fn get_all(&self, tenant: Option<TenantId>) -> Vec<Arc<EntityDef>> {
        self.entities
            .iter()
            .filter(|e| e.visible_to(tenant))
            .cloned()
            .collect()
    }

    /// Look up a visible entity by id string, name or slug.
    pub fn get_by_id_name_or_slug(&self, tenant: Option<TenantId>, key: &str) -> Result<Arc<EntityDef>> {
        let id = key.parse::<EntityId>().ok();
        self.entities
            .iter()
            .filter(|e| e.visible_to(tenant))
            .find(|e| Some(e.id) == id || e.name == key || e.slug == key)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::Entity, key))
    }

    /// Look up by id regardless of tenant. Used to resolve stored rows.
    pub fn entity(&self, id: EntityId) -> Option<Arc<EntityDef>> {
        self.entities.iter().find(|e| e.id == id).cloned()
    }

    pub fn relationship(&self, id: RelationshipDefId) -> Option<Arc<RelationshipDef>> {
        self.relationships.iter().find(|r| r.id == id).cloned()
    }

    pub fn relationships(&self, tenant: Option<TenantId>) -> Vec<Arc<RelationshipDef>> {
        self.relationships
            .iter()
            .filter(|r| r.visible_to(tenant))
            .cloned()
            .collect()
    }

    pub fn relationship_by_name(&self, tenant: Option<TenantId>, name: &str) -> Result<Arc<RelationshipDef>> {
        self.relationships
            .iter()
            .filter(|r| r.visible_to(tenant))
            .find(|r| r.name == name || r.id.to_string() == name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::Relationship, name))
    }

    /// Relationship definitions where the entity is the parent side.
    pub fn relationships_as_parent(&self, entity: EntityId) -> Vec<Arc<RelationshipDef>> {
        self.relationships
            .iter()
            .filter(|r| r.parent_entity == entity)
            .cloned()
            .collect()
    }

    pub fn relationships_involving(&self, entity: EntityId) -> Vec<Arc<RelationshipDef>> {
        self.relationships
            .iter()
            .filter(|r| r.involves(entity))
            .cloned()
            .collect()
    }

    /// Whether another visible entity already uses this name or slug.
    pub fn name_taken(&self, candidate: &EntityDef) -> bool {
        self.entities.iter().any(|e| {
            e.id != candidate.id
                && (e.visible_to(candidate.tenant_id) || candidate.tenant_id.is_none())
                && (e.name == candidate.name || e.slug == candidate.slug)
        })
    }
}

/// Process-wide entity catalog.
///
/// Definitions persist as JSON in sled. Readers work from an immutable
/// [`CatalogSnapshot`] loaded by [`init`](Self::init) and dropped by
/// [`invalidate`](Self::invalidate); every invalidation is broadcast to
/// subscribers so other holders can reload.
pub struct EntityCatalog {
    entity_tree: Tree,
    relationship_tree: Tree,
    snapshot: RwLock<Option<Arc<CatalogSnapshot>>>,
    generation: AtomicU64,
    invalidations: watch::Sender<u64>,
}

impl EntityCatalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self> {
        let (invalidations, _) = watch::channel(0);
        Ok(Self {
            entity_tree: db.open_tree(ENTITY_TREE)?,
            relationship_tree: db.open_tree(RELATIONSHIP_TREE)?,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
            invalidations,
        })
    }

    /// Load the snapshot unless one is already installed.
    ///
    /// Concurrent initializers may both load, but only the first to finish
    /// installs its snapshot. A load that raced with an invalidation is
    /// returned to its caller without being installed.
    #[instrument(skip(self))]
    pub fn init(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.snapshot.read().clone() {
            return Ok(snapshot);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let loaded = Arc::new(self.load(generation)?);

        let mut slot = self.snapshot.write();
        if let Some(existing) = slot.as_ref() {
            debug!("catalog already initialized, discarding concurrent load");
            return Ok(Arc::clone(existing));
        }
        if self.generation.load(Ordering::SeqCst) == generation {
            *slot = Some(Arc::clone(&loaded));
            info!(
                generation,
                entities = loaded.entities.len(),
                relationships = loaded.relationships.len(),
                "catalog initialized"
            );
        }
        Ok(loaded)
    }

    /// The installed snapshot.
    pub fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        self.snapshot
            .read()
            .clone()
            .ok_or_else(|| Error::not_found(ResourceKind::Catalog, "not initialized"))
    }

    /// Drop the cached snapshot and broadcast the new generation.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.snapshot.write() = None;
        self.invalidations.send_replace(generation);
        info!(generation, "catalog invalidated");
    }

    /// Receive a value each time the catalog is invalidated.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.invalidations.subscribe()
    }

    /// Entities visible to a tenant. Fails if the catalog is not initialized.
    pub fn get_all(&self, tenant: Option<TenantId>) -> Result<Vec<Arc<EntityDef>>> {
        Ok(self.snapshot()?.get_all(tenant))
    }

    pub fn get_by_id_name_or_slug(&self, tenant: Option<TenantId>, key: &str) -> Result<Arc<EntityDef>> {
        self.snapshot()?.get_by_id_name_or_slug(tenant, key)
    }

    /// Persist an entity definition. Callers invalidate afterwards.
    pub fn put_entity(&self, entity: &EntityDef) -> Result<()> {
        let bytes = serde_json::to_vec(entity).map_err(|e| Error::Serialization(e.to_string()))?;
        self.entity_tree.insert(&entity.id.0[..], bytes)?;
        Ok(())
    }

    pub fn remove_entity(&self, id: EntityId) -> Result<bool> {
        Ok(self.entity_tree.remove(&id.0[..])?.is_some())
    }

    pub fn put_relationship(&self, relationship: &RelationshipDef) -> Result<()> {
        let bytes = serde_json::to_vec(relationship).map_err(|e| Error::Serialization(e.to_string()))?;
        self.relationship_tree.insert(&relationship.id.0[..], bytes)?;
        Ok(())
    }

    pub fn remove_relationship(&self, id: RelationshipDefId) -> Result<bool> {
        Ok(self.relationship_tree.remove(&id.0[..])?.is_some())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.entity_tree.flush()?;
        self.relationship_tree.flush()?;
        Ok(())
    }

    fn load(&self, generation: u64) -> Result<CatalogSnapshot> {
        let mut entities = Vec::new();
        for item in self.entity_tree.iter() {
            let (_, bytes) = item?;
            let entity: EntityDef =
                serde_json::from_slice(&bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
            entities.push(entity);
        }
        let mut relationships = Vec::new();
        for item in self.relationship_tree.iter() {
            let (_, bytes) = item?;
            let relationship: RelationshipDef =
                serde_json::from_slice(&bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
            relationships.push(relationship);
        }
        Ok(CatalogSnapshot::new(generation, entities, relationships))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PropertyDef;
    use crate::types::PropertyKind;

    fn open_catalog() -> (EntityCatalog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (EntityCatalog::open(&db).unwrap(), dir)
    }

    #[test]
    fn test_snapshot_before_init_is_not_found() {
        let (catalog, _dir) = open_catalog();
        assert!(matches!(
            catalog.get_all(None),
            Err(Error::NotFound { kind: ResourceKind::Catalog, .. })
        ));
    }

    #[test]
    fn test_tenant_visibility() {
        let (catalog, _dir) = open_catalog();
        let (a, b) = (TenantId::new(), TenantId::new());
        catalog.put_entity(&EntityDef::new("User").system()).unwrap();
        catalog.put_entity(&EntityDef::new("Invoice").for_tenant(a)).unwrap();
        catalog.put_entity(&EntityDef::new("Ticket").for_tenant(b)).unwrap();
        catalog.init().unwrap();

        let names: Vec<String> = catalog.get_all(Some(a)).unwrap().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["User", "Invoice"]);
        assert!(catalog.get_by_id_name_or_slug(Some(a), "ticket").is_err());
        assert!(catalog.get_by_id_name_or_slug(Some(b), "ticket").is_ok());
        assert_eq!(catalog.get_all(None).unwrap().len(), 1);
    }

    #[test]
    fn test_lookup_by_id_name_and_slug() {
        let (catalog, _dir) = open_catalog();
        let entity = EntityDef::new("Sales Order")
            .with_property(PropertyDef::new("total", PropertyKind::number()));
        catalog.put_entity(&entity).unwrap();
        catalog.init().unwrap();

        for key in [entity.id.to_string(), "Sales Order".to_string(), "sales-order".to_string()] {
            assert_eq!(catalog.get_by_id_name_or_slug(None, &key).unwrap().id, entity.id);
        }
    }

    #[test]
    fn test_stale_until_invalidated() {
        let (catalog, _dir) = open_catalog();
        catalog.init().unwrap();
        catalog.put_entity(&EntityDef::new("Late")).unwrap();
        assert!(catalog.get_all(None).unwrap().is_empty());

        let mut rx = catalog.subscribe();
        catalog.invalidate();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        catalog.init().unwrap();
        assert_eq!(catalog.get_all(None).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_init_installs_one_snapshot() {
        let (catalog, _dir) = open_catalog();
        catalog.put_entity(&EntityDef::new("User")).unwrap();
        let catalog = Arc::new(catalog);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || catalog.init().unwrap())
            })
            .collect();
        let _results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let installed = catalog.snapshot().unwrap();
        let again = catalog.init().unwrap();
        assert!(Arc::ptr_eq(&installed, &again));
    }
}
