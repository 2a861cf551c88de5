//! Relationship definitions between entities.

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, RelationshipDefId, TenantId};

/// How many links a relationship allows per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cardinality {
    /// A parent has at most one child and a child at most one parent.
    OneToOne,
    /// A child has at most one parent.
    OneToMany,
    /// No limit; each parent/child pair links at most once.
    ManyToMany,
}

/// What happens to children when their parent row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteBehavior {
    /// Children must keep their parent; deleting it is a conflict.
    Required,
    /// Children are deleted first.
    Cascade,
    /// Links are dropped, children survive.
    #[default]
    Detach,
}

/// A directed parent/child relationship type between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDef {
    #[serde(default)]
    pub id: RelationshipDefId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    pub parent_entity: EntityId,
    pub child_entity: EntityId,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub on_parent_delete: DeleteBehavior,
}

impl RelationshipDef {
    fn build(name: impl Into<String>, parent: EntityId, child: EntityId, cardinality: Cardinality) -> Self {
        Self {
            id: RelationshipDefId::new(),
            name: name.into(),
            tenant_id: None,
            parent_entity: parent,
            child_entity: child,
            cardinality,
            on_parent_delete: DeleteBehavior::Detach,
        }
    }

    pub fn one_to_one(name: impl Into<String>, parent: EntityId, child: EntityId) -> Self {
        Self::build(name, parent, child, Cardinality::OneToOne)
    }

    pub fn one_to_many(name: impl Into<String>, parent: EntityId, child: EntityId) -> Self {
        Self::build(name, parent, child, Cardinality::OneToMany)
    }

    pub fn many_to_many(name: impl Into<String>, parent: EntityId, child: EntityId) -> Self {
        Self::build(name, parent, child, Cardinality::ManyToMany)
    }

    pub fn for_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    pub fn with_on_parent_delete(mut self, behavior: DeleteBehavior) -> Self {
        self.on_parent_delete = behavior;
        self
    }

    /// Children cannot be orphaned.
    pub fn required(self) -> Self {
        self.with_on_parent_delete(DeleteBehavior::Required)
    }

    pub fn cascade(self) -> Self {
        self.with_on_parent_delete(DeleteBehavior::Cascade)
    }

    /// Whether the relationship involves the entity on either side.
    pub fn involves(&self, entity: EntityId) -> bool {
        self.parent_entity == entity || self.child_entity == entity
    }

    pub fn visible_to(&self, tenant: Option<TenantId>) -> bool {
        self.tenant_id.is_none() || self.tenant_id == tenant
    }
}
