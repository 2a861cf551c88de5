//! Key encodings for the row trees.
//!
//! All identifiers are 16-byte UUIDs written raw, so prefix scans over an
//! entity or a row are plain byte-prefix scans.

use crate::ids::{EntityId, PropertyId, RowId, TenantId};

/// Size of an identifier in bytes (UUID).
pub const ID_SIZE: usize = 16;

/// Tenant tag for rows without a tenant.
const NO_TENANT: u8 = 0x00;

/// Tenant tag followed by the tenant id.
const TENANT: u8 = 0x01;

/// Adjacency list of links where the row is the child (lists its parents).
pub(crate) const PARENTS_OF: u8 = b'p';

/// Adjacency list of links where the row is the parent (lists its children).
pub(crate) const CHILDREN_OF: u8 = b'c';

fn push_tenant(key: &mut Vec<u8>, tenant: Option<TenantId>) {
    match tenant {
        None => key.push(NO_TENANT),
        Some(t) => {
            key.push(TENANT);
            key.extend_from_slice(&t.0);
        }
    }
}

/// `[row_id][property_id]` in the value sub-stores.
pub fn value_key(row: RowId, property: PropertyId) -> [u8; 2 * ID_SIZE] {
    let mut buf = [0u8; 2 * ID_SIZE];
    buf[..ID_SIZE].copy_from_slice(&row.0);
    buf[ID_SIZE..].copy_from_slice(&property.0);
    buf
}

/// `[entity_id][tenant tag]`, the partition of one entity's rows in one tenant.
pub fn partition_key(entity: EntityId, tenant: Option<TenantId>) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_SIZE + 1 + ID_SIZE);
    key.extend_from_slice(&entity.0);
    push_tenant(&mut key, tenant);
    key
}

/// `[entity_id][tenant tag][row_id]` in the entity index.
pub fn index_key(entity: EntityId, tenant: Option<TenantId>, row: RowId) -> Vec<u8> {
    let mut key = partition_key(entity, tenant);
    key.extend_from_slice(&row.0);
    key
}

/// Extract the row id from the tail of an entity index key.
pub fn row_from_index_key(key: &[u8]) -> Option<RowId> {
    let tail = key.len().checked_sub(ID_SIZE)?;
    RowId::from_slice(&key[tail..])
}

/// `[entity_id][property_id]`, prefix of one property's unique claims.
pub fn unique_prefix(entity: EntityId, property: PropertyId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_SIZE);
    key.extend_from_slice(&entity.0);
    key.extend_from_slice(&property.0);
    key
}

/// `[entity_id][property_id][tenant tag][canonical value]`.
pub fn unique_key(entity: EntityId, property: PropertyId, tenant: Option<TenantId>, canonical: &str) -> Vec<u8> {
    let mut key = unique_prefix(entity, property);
    push_tenant(&mut key, tenant);
    key.extend_from_slice(canonical.as_bytes());
    key
}

/// `[direction][row_id]` in the adjacency tree.
pub fn adjacency_key(direction: u8, row: RowId) -> [u8; ID_SIZE + 1] {
    let mut buf = [0u8; ID_SIZE + 1];
    buf[0] = direction;
    buf[1..].copy_from_slice(&row.0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keys_share_partition_prefix() {
        let entity = EntityId::new();
        let tenant = TenantId::new();
        let row = RowId::new();
        let key = index_key(entity, Some(tenant), row);
        assert!(key.starts_with(&partition_key(entity, Some(tenant))));
        assert!(!key.starts_with(&partition_key(entity, None)));
        assert_eq!(row_from_index_key(&key), Some(row));
    }

    #[test]
    fn test_unique_keys_are_tenant_scoped() {
        let (entity, property) = (EntityId::new(), PropertyId::new());
        let a = unique_key(entity, property, Some(TenantId::new()), "x");
        let b = unique_key(entity, property, Some(TenantId::new()), "x");
        assert_ne!(a, b);
        assert!(a.starts_with(&unique_prefix(entity, property)));
    }
}
