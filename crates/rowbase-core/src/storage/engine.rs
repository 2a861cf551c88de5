//! Storage engine implementation.
//!
//! Row headers, one tree per value category, the entity and unique indexes
//! and the link trees all live in one sled database. Every row write, row
//! delete and link change is a single multi-tree sled transaction, so readers
//! never observe a header without its values or a link on only one side.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use tracing::{debug, instrument};

use super::key::{self, CHILDREN_OF, PARENTS_OF};
use super::record::{LinkList, LinkRecord, LinkRef, RowRecord};
use super::retry::with_retry;
use super::{RetryPolicy, StorageConfig};
use crate::catalog::Cardinality;
use crate::error::{ConflictError, Error, ResourceKind, Result};
use crate::ids::{EntityId, PropertyId, RelationshipDefId, RelationshipId, RowId, TenantId};
use crate::types::{StoredValue, ValueStore};

/// Tree name for row headers.
const ROW_TREE: &str = "rows";

/// Tree names for the value sub-stores.
const SCALAR_TREE: &str = "values:scalar";
const MULTIPLE_TREE: &str = "values:multiple";
const RANGE_TREE: &str = "values:range";
const MEDIA_TREE: &str = "values:media";

/// Tree name for the entity index (entity + tenant + row -> empty).
const ENTITY_INDEX_TREE: &str = "index:entity";

/// Tree name for unique claims (entity + property + tenant + value -> row).
const UNIQUE_INDEX_TREE: &str = "index:unique";

/// Tree name for folio counters (entity + tenant -> u64).
const FOLIO_TREE: &str = "meta:folios";

/// Tree name for link records.
const LINK_TREE: &str = "links";

/// Tree name for link adjacency lists.
const ADJACENCY_TREE: &str = "index:links";

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<Error>>;

fn abort<T>(result: Result<T>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

/// A value to claim in the unique index.
#[derive(Debug, Clone)]
pub struct UniqueClaim {
    pub key: Vec<u8>,
    pub entity: String,
    pub property: String,
    pub value: String,
}

/// Everything one create or update persists.
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub record: RowRecord,
    pub is_new: bool,
    pub puts: Vec<(PropertyId, StoredValue)>,
    pub removes: Vec<(PropertyId, ValueStore)>,
    pub claims: Vec<UniqueClaim>,
    /// Unique keys this row no longer holds.
    pub releases: Vec<Vec<u8>>,
}

/// Everything one row delete removes.
#[derive(Debug, Clone)]
pub struct RowDelete {
    pub row: RowId,
    /// Keep the header and values as a tombstone.
    pub soft: bool,
    pub deleted_at: i64,
    pub values: Vec<(PropertyId, ValueStore)>,
    pub releases: Vec<Vec<u8>>,
    /// Relationships whose children forbid deleting the parent.
    pub restricted: Vec<(RelationshipDefId, String)>,
}

/// Row header plus the stored values of the requested properties.
pub type StoredRow = (RowRecord, Vec<(PropertyId, StoredValue)>);

/// Which side of a row's links to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// Links where the row is the child.
    Parents,
    /// Links where the row is the parent.
    Children,
}

impl LinkDirection {
    fn tag(self) -> u8 {
        match self {
            LinkDirection::Parents => PARENTS_OF,
            LinkDirection::Children => CHILDREN_OF,
        }
    }
}

struct ValueTrees<'a> {
    scalar: &'a TransactionalTree,
    multiple: &'a TransactionalTree,
    range: &'a TransactionalTree,
    media: &'a TransactionalTree,
}

impl ValueTrees<'_> {
    fn tree(&self, store: ValueStore) -> Option<&TransactionalTree> {
        match store {
            ValueStore::Scalar => Some(self.scalar),
            ValueStore::Multiple => Some(self.multiple),
            ValueStore::Range => Some(self.range),
            ValueStore::Media => Some(self.media),
            ValueStore::Computed => None,
        }
    }
}

fn store_of(value: &StoredValue) -> ValueStore {
    match value {
        StoredValue::Scalar(_) => ValueStore::Scalar,
        StoredValue::Multiple(_) => ValueStore::Multiple,
        StoredValue::Range(_) => ValueStore::Range,
        StoredValue::Media(_) => ValueStore::Media,
    }
}

fn read_links(adjacency: &TransactionalTree, direction: u8, row: RowId) -> TxResult<LinkList> {
    match adjacency.get(&key::adjacency_key(direction, row)[..])? {
        Some(bytes) => abort(LinkList::from_bytes(&bytes)),
        None => Ok(LinkList::default()),
    }
}

fn write_links(adjacency: &TransactionalTree, direction: u8, row: RowId, list: &LinkList) -> TxResult<()> {
    let key = key::adjacency_key(direction, row);
    if list.links.is_empty() {
        adjacency.remove(&key[..])?;
    } else {
        adjacency.insert(&key[..], abort(list.to_bytes())?)?;
    }
    Ok(())
}

fn release_unique(unique: &TransactionalTree, key: &[u8], row: RowId) -> TxResult<()> {
    if let Some(owner) = unique.get(key)? {
        if owner.as_ref() == &row.0[..] {
            unique.remove(key)?;
        }
    }
    Ok(())
}

/// The sled-backed row storage engine.
pub struct StorageEngine {
    db: Db,
    rows: Tree,
    scalar: Tree,
    multiple: Tree,
    range: Tree,
    media: Tree,
    entity_index: Tree,
    unique_index: Tree,
    folios: Tree,
    links: Tree,
    adjacency: Tree,
    retry: RetryPolicy,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let db = config.to_sled_config().open()?;
        Ok(Self {
            rows: db.open_tree(ROW_TREE)?,
            scalar: db.open_tree(SCALAR_TREE)?,
            multiple: db.open_tree(MULTIPLE_TREE)?,
            range: db.open_tree(RANGE_TREE)?,
            media: db.open_tree(MEDIA_TREE)?,
            entity_index: db.open_tree(ENTITY_INDEX_TREE)?,
            unique_index: db.open_tree(UNIQUE_INDEX_TREE)?,
            folios: db.open_tree(FOLIO_TREE)?,
            links: db.open_tree(LINK_TREE)?,
            adjacency: db.open_tree(ADJACENCY_TREE)?,
            retry: config.retry,
            db,
        })
    }

    /// The underlying database, for components keeping their own trees.
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a blocking engine call on the blocking pool with bounded retry.
    pub async fn run<T, F>(self: &Arc<Self>, operation: &'static str, f: F) -> Result<T>
    where
        F: Fn(&StorageEngine) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(self);
        with_retry(&self.retry, operation, move || f(&engine)).await
    }

    fn value_tree(&self, store: ValueStore) -> Option<&Tree> {
        match store {
            ValueStore::Scalar => Some(&self.scalar),
            ValueStore::Multiple => Some(&self.multiple),
            ValueStore::Range => Some(&self.range),
            ValueStore::Media => Some(&self.media),
            ValueStore::Computed => None,
        }
    }

    /// Next folio for an entity within a tenant.
    ///
    /// Assigned outside the row transaction, so a failed create leaves a gap.
    pub fn next_folio(&self, entity: EntityId, tenant: Option<TenantId>) -> Result<u64> {
        let key = key::partition_key(entity, tenant);
        let updated = self.folios.update_and_fetch(&key[..], |old| {
            let current = old.and_then(decode_u64).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        updated
            .as_deref()
            .and_then(decode_u64)
            .ok_or_else(|| Error::Consistency("folio counter missing after increment".into()))
    }

    /// Persist a row header and its value changes atomically.
    #[instrument(skip(self, write), fields(row = %write.record.id, new = write.is_new))]
    pub fn write_row(&self, write: &RowWrite) -> Result<()> {
        let record = &write.record;
        let row_id = record.id;
        let header = record.to_bytes()?;
        let index_key = key::index_key(record.entity_id, record.tenant_id, row_id);
        let puts = write
            .puts
            .iter()
            .map(|(property, value)| Ok((key::value_key(row_id, *property), store_of(value), value.to_bytes()?)))
            .collect::<Result<Vec<_>>>()?;

        let result: std::result::Result<(), TransactionError<Error>> = (
            &self.rows,
            &self.scalar,
            &self.multiple,
            &self.range,
            &self.media,
            &self.entity_index,
            &self.unique_index,
        )
            .transaction(|(rows, scalar, multiple, range, media, index, unique)| {
                let values = ValueTrees {
                    scalar,
                    multiple,
                    range,
                    media,
                };

                if !write.is_new {
                    let existing = match rows.get(&row_id.0[..])? {
                        Some(bytes) => abort(RowRecord::from_bytes(&bytes))?,
                        None => return abort(Err(Error::not_found(ResourceKind::Row, row_id))),
                    };
                    if existing.is_deleted() {
                        return abort(Err(Error::not_found(ResourceKind::Row, row_id)));
                    }
                }

                for released in &write.releases {
                    release_unique(unique, released, row_id)?;
                }
                for claim in &write.claims {
                    if let Some(owner) = unique.get(&claim.key[..])? {
                        if owner.as_ref() != &row_id.0[..] {
                            return abort(Err(ConflictError::UniqueViolation {
                                entity: claim.entity.clone(),
                                property: claim.property.clone(),
                                value: claim.value.clone(),
                            }
                            .into()));
                        }
                    }
                    unique.insert(&claim.key[..], &row_id.0[..])?;
                }

                for (value_key, store, bytes) in &puts {
                    if let Some(tree) = values.tree(*store) {
                        tree.insert(&value_key[..], bytes.clone())?;
                    }
                }
                for (property, store) in &write.removes {
                    if let Some(tree) = values.tree(*store) {
                        tree.remove(&key::value_key(row_id, *property)[..])?;
                    }
                }

                rows.insert(&row_id.0[..], header.clone())?;
                if write.is_new {
                    index.insert(&index_key[..], Vec::<u8>::new())?;
                }
                Ok(())
            });
        result?;

        debug!(values = write.puts.len(), cleared = write.removes.len(), "row written");
        Ok(())
    }

    /// Read a live row header and its values in one consistent read.
    ///
    /// `layout` maps the row's entity to the properties to load; it runs
    /// inside the read so header and values come from the same state.
    pub fn read_row<F>(&self, row: RowId, layout: F) -> Result<Option<StoredRow>>
    where
        F: Fn(EntityId) -> Result<Vec<(PropertyId, ValueStore)>>,
    {
        let result: std::result::Result<Option<StoredRow>, TransactionError<Error>> =
            (&self.rows, &self.scalar, &self.multiple, &self.range, &self.media).transaction(
                |(rows, scalar, multiple, range, media)| {
                    let values = ValueTrees {
                        scalar,
                        multiple,
                        range,
                        media,
                    };
                    let record = match rows.get(&row.0[..])? {
                        Some(bytes) => abort(RowRecord::from_bytes(&bytes))?,
                        None => return Ok(None),
                    };
                    if record.is_deleted() {
                        return Ok(None);
                    }

                    let mut loaded = Vec::new();
                    for (property, store) in abort(layout(record.entity_id))? {
                        let Some(tree) = values.tree(store) else {
                            continue;
                        };
                        if let Some(bytes) = tree.get(&key::value_key(row, property)[..])? {
                            loaded.push((property, abort(StoredValue::from_bytes(&bytes))?));
                        }
                    }
                    Ok(Some((record, loaded)))
                },
            );
        Ok(result?)
    }

    /// Delete a row with its values, index entries and every link touching it.
    ///
    /// Returns the removed header, or `None` if the row was already gone.
    #[instrument(skip(self, delete), fields(row = %delete.row, soft = delete.soft))]
    pub fn delete_row(&self, delete: &RowDelete) -> Result<Option<RowRecord>> {
        let row_id = delete.row;
        let result: std::result::Result<Option<RowRecord>, TransactionError<Error>> = (
            &self.rows,
            &self.scalar,
            &self.multiple,
            &self.range,
            &self.media,
            &self.entity_index,
            &self.unique_index,
            &self.links,
            &self.adjacency,
        )
            .transaction(
                |(rows, scalar, multiple, range, media, index, unique, links, adjacency)| {
                    let values = ValueTrees {
                        scalar,
                        multiple,
                        range,
                        media,
                    };
                    let mut record = match rows.get(&row_id.0[..])? {
                        Some(bytes) => abort(RowRecord::from_bytes(&bytes))?,
                        None => return Ok(None),
                    };
                    if record.is_deleted() {
                        return Ok(None);
                    }

                    let children = read_links(adjacency, CHILDREN_OF, row_id)?;
                    for (relationship, name) in &delete.restricted {
                        let count = children.count(*relationship);
                        if count > 0 {
                            return abort(Err(ConflictError::DeleteRestricted {
                                row: row_id,
                                relationship: name.clone(),
                                count,
                            }
                            .into()));
                        }
                    }

                    if delete.soft {
                        record.deleted_at = Some(delete.deleted_at);
                        record.version += 1;
                        rows.insert(&row_id.0[..], abort(record.to_bytes())?)?;
                    } else {
                        rows.remove(&row_id.0[..])?;
                        for (property, store) in &delete.values {
                            if let Some(tree) = values.tree(*store) {
                                tree.remove(&key::value_key(row_id, *property)[..])?;
                            }
                        }
                    }
                    index.remove(&key::index_key(record.entity_id, record.tenant_id, row_id)[..])?;
                    for released in &delete.releases {
                        release_unique(unique, released, row_id)?;
                    }

                    for (own, other) in [(PARENTS_OF, CHILDREN_OF), (CHILDREN_OF, PARENTS_OF)] {
                        let list = read_links(adjacency, own, row_id)?;
                        for entry in &list.links {
                            links.remove(&entry.link.0[..])?;
                            let mut far = read_links(adjacency, other, entry.row)?;
                            far.remove(entry.link);
                            write_links(adjacency, other, entry.row, &far)?;
                        }
                        adjacency.remove(&key::adjacency_key(own, row_id)[..])?;
                    }
                    Ok(Some(record))
                },
            );
        let removed = result?;
        if removed.is_some() {
            debug!("row deleted");
        }
        Ok(removed)
    }

    /// Live row ids of an entity within one tenant partition, in id order.
    pub fn list_row_ids(&self, entity: EntityId, tenant: Option<TenantId>) -> Result<Vec<RowId>> {
        let prefix = key::partition_key(entity, tenant);
        self.entity_index
            .scan_prefix(&prefix[..])
            .keys()
            .map(|k| {
                let k = k?;
                key::row_from_index_key(&k)
                    .ok_or_else(|| Error::Consistency("malformed entity index key".into()))
            })
            .collect()
    }

    /// Whether any tenant holds a live row of the entity.
    pub fn entity_has_rows(&self, entity: EntityId) -> Result<bool> {
        Ok(self.entity_index.scan_prefix(&entity.0[..]).next().transpose()?.is_some())
    }

    fn entity_row_ids(&self, entity: EntityId) -> impl Iterator<Item = Result<RowId>> + '_ {
        self.entity_index.scan_prefix(&entity.0[..]).keys().map(|k| {
            let k = k?;
            key::row_from_index_key(&k).ok_or_else(|| Error::Consistency("malformed entity index key".into()))
        })
    }

    /// Whether any live row has a stored value for the property.
    pub fn property_has_values(&self, entity: EntityId, property: PropertyId, store: ValueStore) -> Result<bool> {
        let Some(tree) = self.value_tree(store) else {
            return Ok(false);
        };
        for row in self.entity_row_ids(entity) {
            if tree.contains_key(&key::value_key(row?, property)[..])? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop every stored value and unique claim of a removed property.
    pub fn purge_property_values(&self, entity: EntityId, property: PropertyId, store: ValueStore) -> Result<usize> {
        let mut removed = 0;
        if let Some(tree) = self.value_tree(store) {
            for row in self.entity_row_ids(entity) {
                if tree.remove(&key::value_key(row?, property)[..])?.is_some() {
                    removed += 1;
                }
            }
        }
        let prefix = key::unique_prefix(entity, property);
        for k in self.unique_index.scan_prefix(&prefix[..]).keys() {
            self.unique_index.remove(k?)?;
        }
        debug!(entity = %entity, property = %property, removed, "purged property values");
        Ok(removed)
    }

    /// Persist a link after checking existence, cardinality and acyclicity.
    ///
    /// The checks read the link trees inside the same transaction as the
    /// insert, so concurrent links cannot jointly violate them.
    #[instrument(skip(self, link), fields(parent = %link.parent, child = %link.child))]
    pub fn link_rows(&self, link: &LinkRecord, cardinality: Cardinality, name: &str) -> Result<()> {
        if link.parent == link.child {
            return Err(ConflictError::Cycle {
                parent: link.parent,
                child: link.child,
            }
            .into());
        }
        let encoded = link.to_bytes()?;
        let cardinality_error = |detail: &str| -> TxResult<()> {
            abort(Err(ConflictError::Cardinality {
                relationship: name.to_string(),
                detail: detail.to_string(),
            }
            .into()))
        };

        let result: std::result::Result<(), TransactionError<Error>> = (&self.rows, &self.links, &self.adjacency)
            .transaction(|(rows, links, adjacency)| {
                for row in [link.parent, link.child] {
                    let live = match rows.get(&row.0[..])? {
                        Some(bytes) => !abort(RowRecord::from_bytes(&bytes))?.is_deleted(),
                        None => false,
                    };
                    if !live {
                        return abort(Err(Error::not_found(ResourceKind::Row, row)));
                    }
                }

                let mut parents_of_child = read_links(adjacency, PARENTS_OF, link.child)?;
                let mut children_of_parent = read_links(adjacency, CHILDREN_OF, link.parent)?;
                if children_of_parent.contains(link.relationship, link.child) {
                    return cardinality_error("rows are already linked");
                }
                match cardinality {
                    Cardinality::OneToOne => {
                        if parents_of_child.count(link.relationship) > 0 {
                            return cardinality_error("child already has a parent");
                        }
                        if children_of_parent.count(link.relationship) > 0 {
                            return cardinality_error("parent already has a child");
                        }
                    }
                    Cardinality::OneToMany => {
                        if parents_of_child.count(link.relationship) > 0 {
                            return cardinality_error("child already has a parent");
                        }
                    }
                    Cardinality::ManyToMany => {}
                }

                // The child must not already be an ancestor of the parent.
                let mut queue = VecDeque::from([link.parent]);
                let mut seen = HashSet::from([link.parent]);
                while let Some(current) = queue.pop_front() {
                    for ancestor in read_links(adjacency, PARENTS_OF, current)?.links {
                        if ancestor.row == link.child {
                            return abort(Err(ConflictError::Cycle {
                                parent: link.parent,
                                child: link.child,
                            }
                            .into()));
                        }
                        if seen.insert(ancestor.row) {
                            queue.push_back(ancestor.row);
                        }
                    }
                }

                links.insert(&link.id.0[..], encoded.clone())?;
                parents_of_child.links.push(LinkRef {
                    link: link.id,
                    relationship: link.relationship,
                    row: link.parent,
                });
                children_of_parent.links.push(LinkRef {
                    link: link.id,
                    relationship: link.relationship,
                    row: link.child,
                });
                write_links(adjacency, PARENTS_OF, link.child, &parents_of_child)?;
                write_links(adjacency, CHILDREN_OF, link.parent, &children_of_parent)?;
                Ok(())
            });
        result?;
        debug!(relationship = name, "rows linked");
        Ok(())
    }

    /// Remove a link. Returns the number of links removed (0 or 1).
    pub fn unlink(&self, id: RelationshipId) -> Result<u64> {
        let result: std::result::Result<u64, TransactionError<Error>> =
            (&self.links, &self.adjacency).transaction(|(links, adjacency)| {
                let link = match links.get(&id.0[..])? {
                    Some(bytes) => abort(LinkRecord::from_bytes(&bytes))?,
                    None => return Ok(0),
                };
                let mut parents = read_links(adjacency, PARENTS_OF, link.child)?;
                parents.remove(id);
                write_links(adjacency, PARENTS_OF, link.child, &parents)?;
                let mut children = read_links(adjacency, CHILDREN_OF, link.parent)?;
                children.remove(id);
                write_links(adjacency, CHILDREN_OF, link.parent, &children)?;
                links.remove(&id.0[..])?;
                Ok(1)
            });
        let removed = result?;
        debug!(link = %id, removed, "unlink");
        Ok(removed)
    }

    /// Adjacency entries of a row in one direction, in link order.
    pub fn links_of(&self, row: RowId, direction: LinkDirection) -> Result<Vec<LinkRef>> {
        match self.adjacency.get(&key::adjacency_key(direction.tag(), row)[..])? {
            Some(bytes) => Ok(LinkList::from_bytes(&bytes)?.links),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_link(&self, id: RelationshipId) -> Result<Option<LinkRecord>> {
        match self.links.get(&id.0[..])? {
            Some(bytes) => Ok(Some(LinkRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether any link of the relationship definition exists.
    pub fn relationship_in_use(&self, relationship: RelationshipDefId) -> Result<bool> {
        for item in self.links.iter().values() {
            if LinkRecord::from_bytes(&item?)?.relationship == relationship {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::security::Identity;
    use crate::types::ScalarCell;

    fn engine() -> StorageEngine {
        StorageEngine::open(StorageConfig::temporary()).unwrap()
    }

    fn header(entity: EntityId, tenant: Option<TenantId>) -> RowRecord {
        RowRecord {
            id: RowId::new(),
            entity_id: entity,
            tenant_id: tenant,
            folio: 1,
            created_by: Identity::User(UserId::new()),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            version: 1,
        }
    }

    fn text(value: &str) -> StoredValue {
        StoredValue::Scalar(ScalarCell {
            text: Some(value.into()),
            ..Default::default()
        })
    }

    fn insert(engine: &StorageEngine, record: &RowRecord, puts: Vec<(PropertyId, StoredValue)>) {
        engine
            .write_row(&RowWrite {
                record: record.clone(),
                is_new: true,
                puts,
                removes: Vec::new(),
                claims: Vec::new(),
                releases: Vec::new(),
            })
            .unwrap();
    }

    fn link(
        engine: &StorageEngine,
        relationship: RelationshipDefId,
        parent: RowId,
        child: RowId,
        cardinality: Cardinality,
    ) -> Result<RelationshipId> {
        let record = LinkRecord {
            id: RelationshipId::new(),
            relationship,
            parent,
            child,
            created_at: 0,
        };
        engine.link_rows(&record, cardinality, "rel").map(|_| record.id)
    }

    #[test]
    fn test_folios_are_per_partition() {
        let engine = engine();
        let (entity, tenant) = (EntityId::new(), TenantId::new());
        assert_eq!(engine.next_folio(entity, Some(tenant)).unwrap(), 1);
        assert_eq!(engine.next_folio(entity, Some(tenant)).unwrap(), 2);
        assert_eq!(engine.next_folio(entity, None).unwrap(), 1);
    }

    #[test]
    fn test_write_then_read_values() {
        let engine = engine();
        let entity = EntityId::new();
        let (name, other) = (PropertyId::new(), PropertyId::new());
        let record = header(entity, None);
        insert(&engine, &record, vec![(name, text("alpha"))]);

        let layout = |_: EntityId| -> Result<Vec<(PropertyId, ValueStore)>> {
            Ok(vec![(name, ValueStore::Scalar), (other, ValueStore::Multiple)])
        };
        let (read, values) = engine.read_row(record.id, layout).unwrap().unwrap();
        assert_eq!(read, record);
        assert_eq!(values, vec![(name, text("alpha"))]);
        assert_eq!(engine.list_row_ids(entity, None).unwrap(), vec![record.id]);
        assert!(engine.property_has_values(entity, name, ValueStore::Scalar).unwrap());
        assert!(!engine.property_has_values(entity, other, ValueStore::Multiple).unwrap());
    }

    #[test]
    fn test_unique_claim_conflicts_across_rows() {
        let engine = engine();
        let entity = EntityId::new();
        let property = PropertyId::new();
        let claim = |row: &RowRecord| RowWrite {
            record: row.clone(),
            is_new: true,
            puts: Vec::new(),
            removes: Vec::new(),
            claims: vec![UniqueClaim {
                key: key::unique_key(entity, property, None, "x"),
                entity: "E".into(),
                property: "code".into(),
                value: "x".into(),
            }],
            releases: Vec::new(),
        };
        let first = header(entity, None);
        engine.write_row(&claim(&first)).unwrap();
        let second = header(entity, None);
        let err = engine.write_row(&claim(&second)).unwrap_err();
        assert!(matches!(err, Error::Conflict(ConflictError::UniqueViolation { .. })));
        // Nothing of the failed write is visible.
        assert!(engine.read_row(second.id, |_| Ok(Vec::new())).unwrap().is_none());
        assert_eq!(engine.list_row_ids(entity, None).unwrap().len(), 1);
    }

    #[test]
    fn test_link_rules() {
        let engine = engine();
        let entity = EntityId::new();
        let rel = RelationshipDefId::new();
        let rows: Vec<RowRecord> = (0..3).map(|_| header(entity, None)).collect();
        for row in &rows {
            insert(&engine, row, Vec::new());
        }
        let (a, b, c) = (rows[0].id, rows[1].id, rows[2].id);

        link(&engine, rel, a, b, Cardinality::OneToMany).unwrap();
        assert!(matches!(
            link(&engine, rel, c, b, Cardinality::OneToMany),
            Err(Error::Conflict(ConflictError::Cardinality { .. }))
        ));
        link(&engine, rel, b, c, Cardinality::OneToMany).unwrap();
        assert!(matches!(
            link(&engine, rel, c, a, Cardinality::ManyToMany),
            Err(Error::Conflict(ConflictError::Cycle { .. }))
        ));
        assert!(matches!(
            link(&engine, rel, a, a, Cardinality::ManyToMany),
            Err(Error::Conflict(ConflictError::Cycle { .. }))
        ));
        assert_eq!(engine.links_of(b, LinkDirection::Parents).unwrap()[0].row, a);
    }

    #[test]
    fn test_unlink_is_idempotent() {
        let engine = engine();
        let entity = EntityId::new();
        let (p, c) = (header(entity, None), header(entity, None));
        insert(&engine, &p, Vec::new());
        insert(&engine, &c, Vec::new());
        let id = link(&engine, RelationshipDefId::new(), p.id, c.id, Cardinality::OneToMany).unwrap();
        assert_eq!(engine.unlink(id).unwrap(), 1);
        assert_eq!(engine.unlink(id).unwrap(), 0);
        assert!(engine.links_of(p.id, LinkDirection::Children).unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_links_on_both_sides() {
        let engine = engine();
        let entity = EntityId::new();
        let rel = RelationshipDefId::new();
        let (p, c) = (header(entity, None), header(entity, None));
        let property = PropertyId::new();
        insert(&engine, &p, vec![(property, text("p"))]);
        insert(&engine, &c, Vec::new());
        let id = link(&engine, rel, p.id, c.id, Cardinality::OneToMany).unwrap();

        let delete = |row: RowId, restricted: Vec<(RelationshipDefId, String)>| RowDelete {
            row,
            soft: false,
            deleted_at: 1,
            values: vec![(property, ValueStore::Scalar)],
            releases: Vec::new(),
            restricted,
        };
        let err = engine.delete_row(&delete(p.id, vec![(rel, "rel".into())])).unwrap_err();
        assert!(matches!(err, Error::Conflict(ConflictError::DeleteRestricted { count: 1, .. })));

        assert!(engine.delete_row(&delete(p.id, Vec::new())).unwrap().is_some());
        assert!(engine.get_link(id).unwrap().is_none());
        assert!(engine.links_of(c.id, LinkDirection::Parents).unwrap().is_empty());
        assert!(!engine.property_has_values(entity, property, ValueStore::Scalar).unwrap());
        assert!(engine.delete_row(&delete(p.id, Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_soft_delete_keeps_tombstone() {
        let engine = engine();
        let entity = EntityId::new();
        let row = header(entity, None);
        insert(&engine, &row, Vec::new());
        let removed = engine
            .delete_row(&RowDelete {
                row: row.id,
                soft: true,
                deleted_at: 99,
                values: Vec::new(),
                releases: Vec::new(),
                restricted: Vec::new(),
            })
            .unwrap()
            .unwrap();
        assert_eq!(removed.id, row.id);
        assert!(engine.read_row(row.id, |_| Ok(Vec::new())).unwrap().is_none());
        assert!(!engine.entity_has_rows(entity).unwrap());
    }
}
