//! Persisted row headers and link records.

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;
use crate::ids::{EntityId, RelationshipDefId, RelationshipId, RowId, TenantId};
use crate::security::Identity;

macro_rules! rkyv_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize using rkyv.
            pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
                rkyv::to_bytes::<rkyv::rancor::Error>(self)
                    .map(|v| v.to_vec())
                    .map_err(|e| Error::Serialization(e.to_string()))
            }

            /// Deserialize using rkyv.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
                let mut aligned = rkyv::util::AlignedVec::<16>::new();
                aligned.extend_from_slice(bytes);
                rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
                    .map_err(|e| Error::Deserialization(e.to_string()))
            }
        }
    };
}

/// Row header. Values live in the sub-stores.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RowRecord {
    pub id: RowId,
    pub entity_id: EntityId,
    pub tenant_id: Option<TenantId>,
    pub folio: u64,
    pub created_by: Identity,
    /// Microseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
    /// Tombstone time for soft-deleted rows.
    pub deleted_at: Option<i64>,
    /// Bumped by every write.
    pub version: u64,
}

impl RowRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

rkyv_codec!(RowRecord);

/// A parent/child link between two rows.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: RelationshipId,
    pub relationship: RelationshipDefId,
    pub parent: RowId,
    pub child: RowId,
    pub created_at: i64,
}

rkyv_codec!(LinkRecord);

/// One adjacency entry: the link and the row on its other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct LinkRef {
    pub link: RelationshipId,
    pub relationship: RelationshipDefId,
    pub row: RowId,
}

/// Adjacency list for one row and direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct LinkList {
    pub links: Vec<LinkRef>,
}

impl LinkList {
    pub fn count(&self, relationship: RelationshipDefId) -> usize {
        self.links.iter().filter(|l| l.relationship == relationship).count()
    }

    pub fn contains(&self, relationship: RelationshipDefId, row: RowId) -> bool {
        self.links
            .iter()
            .any(|l| l.relationship == relationship && l.row == row)
    }

    /// Remove the entry for a link, reporting whether it was present.
    pub fn remove(&mut self, link: RelationshipId) -> bool {
        let before = self.links.len();
        self.links.retain(|l| l.link != link);
        self.links.len() != before
    }
}

rkyv_codec!(LinkList);
