//! Linking rows and walking their links.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::catalog::RelationshipDef;
use crate::error::{Error, ResourceKind, Result, ValidationErrors};
use crate::ids::{RelationshipDefId, RelationshipId, RowId};
use crate::security::Actor;
use crate::storage::{LinkDirection, LinkRecord, LinkRef, Row, RowStore, StorageEngine};
use crate::types::{from_micros, to_micros};

/// A link between two rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: RelationshipId,
    pub relationship: RelationshipDefId,
    pub parent: RowId,
    pub child: RowId,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    fn from_record(record: &LinkRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            relationship: record.relationship,
            parent: record.parent,
            child: record.child,
            created_at: from_micros(record.created_at)
                .ok_or_else(|| Error::Consistency(format!("link {} has an invalid timestamp", record.id)))?,
        })
    }
}

/// Maintains links and enforces cardinality and acyclicity.
///
/// The checks run inside the storage transaction that inserts the link.
pub struct RelationshipGraph {
    storage: Arc<StorageEngine>,
    rows: Arc<RowStore>,
}

impl RelationshipGraph {
    pub fn new(storage: Arc<StorageEngine>, rows: Arc<RowStore>) -> Self {
        Self { storage, rows }
    }

    /// Link `parent` to `child` through a relationship definition.
    #[instrument(skip_all, fields(relationship = %relationship.name, parent = %parent.id, child = %child.id))]
    pub async fn link(&self, relationship: &RelationshipDef, parent: &Row, child: &Row) -> Result<Relationship> {
        let mut errors = ValidationErrors::new();
        if parent.entity_id != relationship.parent_entity {
            errors.add("parent", format!("row is not of the parent entity of {}", relationship.name));
        }
        if child.entity_id != relationship.child_entity {
            errors.add("child", format!("row is not of the child entity of {}", relationship.name));
        }
        if parent.tenant_id != child.tenant_id {
            errors.add("child", "rows belong to different tenants");
        }
        errors.into_result()?;

        let _schema = self.rows.schema_shared().await;
        let relationship = self
            .rows
            .snapshot()
            .await?
            .relationship(relationship.id)
            .filter(|current| current.visible_to(parent.tenant_id))
            .ok_or_else(|| Error::not_found(ResourceKind::Relationship, &relationship.name))?;

        let record = Arc::new(LinkRecord {
            id: RelationshipId::new(),
            relationship: relationship.id,
            parent: parent.id,
            child: child.id,
            created_at: to_micros(&Utc::now()),
        });
        let pending = Arc::clone(&record);
        let cardinality = relationship.cardinality;
        let name = relationship.name.clone();
        self.storage
            .run("link rows", move |engine| engine.link_rows(&pending, cardinality, &name))
            .await?;
        Relationship::from_record(&record)
    }

    /// Remove a link. Unlinking an absent link reports zero rather than failing.
    pub async fn unlink(&self, id: RelationshipId) -> Result<u64> {
        self.storage.run("unlink rows", move |engine| engine.unlink(id)).await
    }

    pub async fn get(&self, id: RelationshipId) -> Result<Option<Relationship>> {
        let record = self.storage.run("read link", move |engine| engine.get_link(id)).await?;
        record.as_ref().map(Relationship::from_record).transpose()
    }

    /// Rows related to `row` in one direction, resolved through the row store
    /// with the actor's read permission.
    pub fn get_related_rows(&self, row: &Row, direction: LinkDirection, actor: &Actor) -> RelatedRows<'_> {
        RelatedRows {
            graph: self,
            row: row.id,
            direction,
            relationship: None,
            actor: actor.clone(),
            links: None,
            position: 0,
        }
    }
}

/// A lazy, restartable sequence of related rows.
///
/// Links are read on the first call to [`next`](Self::next); each row is
/// then fetched one at a time. Rows that are gone or unreadable for the
/// actor are skipped.
pub struct RelatedRows<'a> {
    graph: &'a RelationshipGraph,
    row: RowId,
    direction: LinkDirection,
    relationship: Option<RelationshipDefId>,
    actor: Actor,
    links: Option<Vec<LinkRef>>,
    position: usize,
}

impl RelatedRows<'_> {
    /// Only follow links of one relationship definition.
    pub fn of_relationship(mut self, relationship: RelationshipDefId) -> Self {
        self.relationship = Some(relationship);
        self.rewind();
        self
    }

    pub async fn next(&mut self) -> Option<Result<Arc<Row>>> {
        if self.links.is_none() {
            let (row, direction) = (self.row, self.direction);
            let loaded = self
                .graph
                .storage
                .run("read links", move |engine| engine.links_of(row, direction))
                .await;
            match loaded {
                Ok(mut links) => {
                    if let Some(only) = self.relationship {
                        links.retain(|l| l.relationship == only);
                    }
                    debug!(row = %self.row, direction = ?self.direction, links = links.len(), "related rows loaded");
                    self.links = Some(links);
                }
                Err(e) => return Some(Err(e)),
            }
        }

        loop {
            let link = *self.links.as_ref()?.get(self.position)?;
            self.position += 1;
            match self.graph.rows.read(&self.actor, link.row).await {
                Ok(row) => return Some(Ok(row)),
                Err(Error::NotFound { .. }) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Start over; links are re-read on the next call.
    pub fn rewind(&mut self) {
        self.links = None;
        self.position = 0;
    }

    /// Drain the remaining rows.
    pub async fn collect(mut self) -> Result<Vec<Arc<Row>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}
