//! Persisted permission entries.

use sled::{Db, Tree};
use tracing::debug;

use super::actor::Identity;
use super::permission::{Action, EntityGrant, PermissionData, RowGrant};
use crate::error::{Error, Result};
use crate::ids::{EntityId, RowId};

const PERMISSION_TREE: &str = "security:permissions";

const ENTITY_PREFIX: u8 = b'e';
const ROW_PREFIX: u8 = b'r';

/// Entity-level grants keyed `e | entity | role`, row-level entries keyed
/// `r | row | identity | action`. Values are JSON.
pub struct PermissionStore {
    tree: Tree,
}

impl PermissionStore {
    pub fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(PERMISSION_TREE)?,
        })
    }

    /// Set the actions a role may perform on an entity, replacing any
    /// earlier grant for the same role.
    pub fn grant_entity(&self, grant: &EntityGrant) -> Result<()> {
        let key = entity_key(grant.entity_id, &grant.role);
        self.tree.insert(key, encode(grant)?)?;
        Ok(())
    }

    pub fn revoke_entity(&self, entity_id: EntityId, role: &str) -> Result<bool> {
        Ok(self.tree.remove(entity_key(entity_id, role))?.is_some())
    }

    pub fn entity_grants(&self, entity_id: EntityId) -> Result<Vec<EntityGrant>> {
        let mut prefix = vec![ENTITY_PREFIX];
        prefix.extend_from_slice(&entity_id.0);
        self.scan(&prefix)
    }

    /// Record an explicit row-level allow or deny, replacing an entry for
    /// the same identity and action.
    pub fn set_row_grant(&self, grant: &RowGrant) -> Result<()> {
        let key = row_key(grant.row_id, &grant.subject, grant.action);
        self.tree.insert(key, encode(grant)?)?;
        Ok(())
    }

    pub fn remove_row_grant(&self, row_id: RowId, subject: &Identity, action: Action) -> Result<bool> {
        Ok(self.tree.remove(row_key(row_id, subject, action))?.is_some())
    }

    pub fn row_grants(&self, row_id: RowId) -> Result<Vec<RowGrant>> {
        self.scan(&row_prefix(row_id))
    }

    /// Entity defaults plus explicit entries for `rows`.
    pub fn load(&self, entity_id: EntityId, rows: &[RowId]) -> Result<PermissionData> {
        let mut data = PermissionData {
            entity_grants: self.entity_grants(entity_id)?,
            row_grants: Vec::new(),
        };
        for row in rows {
            data.extend_rows(self.row_grants(*row)?);
        }
        Ok(data)
    }

    /// Drop every entry attached to a deleted row.
    pub fn purge_row(&self, row_id: RowId) -> Result<usize> {
        let mut removed = 0;
        for item in self.tree.scan_prefix(row_prefix(row_id)) {
            let (key, _) = item?;
            self.tree.remove(key)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(row = %row_id, removed, "purged row permissions");
        }
        Ok(removed)
    }

    /// Drop every entity-level grant for a deleted entity.
    pub fn purge_entity(&self, entity_id: EntityId) -> Result<usize> {
        let mut prefix = vec![ENTITY_PREFIX];
        prefix.extend_from_slice(&entity_id.0);
        let mut removed = 0;
        for item in self.tree.scan_prefix(&prefix) {
            let (key, _) = item?;
            self.tree.remove(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.tree
            .scan_prefix(prefix)
            .map(|item| {
                let (_, bytes) = item?;
                serde_json::from_slice(&bytes).map_err(|e| Error::Deserialization(e.to_string()))
            })
            .collect()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn entity_key(entity_id: EntityId, role: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(17 + role.len());
    key.push(ENTITY_PREFIX);
    key.extend_from_slice(&entity_id.0);
    key.extend_from_slice(role.as_bytes());
    key
}

fn row_prefix(row_id: RowId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(ROW_PREFIX);
    key.extend_from_slice(&row_id.0);
    key
}

fn row_key(row_id: RowId, subject: &Identity, action: Action) -> Vec<u8> {
    let mut key = row_prefix(row_id);
    match subject {
        Identity::User(id) => {
            key.push(b'u');
            key.extend_from_slice(&id.0);
        }
        Identity::ApiKey(id) => {
            key.push(b'k');
            key.extend_from_slice(&id.0);
        }
    }
    key.push(action as u8);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;

    fn open_store() -> (PermissionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (PermissionStore::open(&db).unwrap(), dir)
    }

    #[test]
    fn test_entity_grant_replaced_per_role() {
        let (store, _dir) = open_store();
        let entity = EntityId::new();
        let mut grant = EntityGrant {
            entity_id: entity,
            role: "viewer".into(),
            actions: vec![Action::Read],
        };
        store.grant_entity(&grant).unwrap();
        grant.actions.push(Action::Update);
        store.grant_entity(&grant).unwrap();

        let grants = store.entity_grants(entity).unwrap();
        assert_eq!(grants, vec![grant]);
        assert!(store.entity_grants(EntityId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_load_and_purge_rows() {
        let (store, _dir) = open_store();
        let entity = EntityId::new();
        let (a, b) = (RowId::new(), RowId::new());
        let subject = Identity::User(UserId::new());
        store.set_row_grant(&RowGrant::deny(a, subject, Action::Read)).unwrap();
        store.set_row_grant(&RowGrant::allow(a, subject, Action::Update)).unwrap();
        store.set_row_grant(&RowGrant::allow(b, subject, Action::Read)).unwrap();

        assert_eq!(store.load(entity, &[a]).unwrap().row_grants.len(), 2);
        assert_eq!(store.load(entity, &[a, b]).unwrap().row_grants.len(), 3);

        assert_eq!(store.purge_row(a).unwrap(), 2);
        assert_eq!(store.load(entity, &[a, b]).unwrap().row_grants.len(), 1);
        assert!(store.remove_row_grant(b, &subject, Action::Read).unwrap());
    }
}
