//! Schema files.
//!
//! A schema file is JSON with three optional sections:
//!
//! ```json
//! {
//!   "entities": [{ "name": "invoice", "properties": [{ "name": "amount", "type": "NUMBER" }] }],
//!   "relationships": [{ "name": "customer_invoices", "parent": "customer", "child": "invoice",
//!                       "cardinality": "oneToMany", "onParentDelete": "required" }],
//!   "grants": [{ "entity": "invoice", "role": "editor", "actions": ["create", "read"] }]
//! }
//! ```
//!
//! Entities and relationships that already exist by name are left alone,
//! so applying the same file twice is harmless. Grants always replace.

use std::collections::HashSet;

use rowbase_core::catalog::RelationshipDef;
use rowbase_core::security::Action;
use rowbase_core::{Cardinality, Database, DeleteBehavior, EntityDef, Error, TenantId};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SchemaFile {
    pub entities: Vec<EntityDef>,
    pub relationships: Vec<RelationshipSpec>,
    pub grants: Vec<GrantSpec>,
}

/// A relationship naming its entities instead of their ids.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSpec {
    pub name: String,
    pub parent: String,
    pub child: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub on_parent_delete: DeleteBehavior,
}

#[derive(Debug, Deserialize)]
pub struct GrantSpec {
    pub entity: String,
    pub role: String,
    pub actions: Vec<Action>,
}

/// What an apply did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub defined: Vec<String>,
    pub skipped: Vec<String>,
    pub relationships: Vec<String>,
    pub grants: usize,
}

impl ApplyReport {
    pub fn summary(&self) -> String {
        format!(
            "{} entities defined, {} already present, {} relationships defined, {} grants applied",
            self.defined.len(),
            self.skipped.len(),
            self.relationships.len(),
            self.grants
        )
    }
}

impl SchemaFile {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Define everything in the file under the given tenant.
    pub async fn apply(self, db: &Database, tenant: Option<TenantId>) -> Result<ApplyReport, Error> {
        let mut report = ApplyReport::default();

        for mut entity in self.entities {
            if !entity.is_system {
                entity.tenant_id = tenant;
            }
            match db.entity(tenant, &entity.name) {
                Ok(_) => report.skipped.push(entity.name),
                Err(Error::NotFound { .. }) => {
                    let defined = db.define_entity(entity).await?;
                    report.defined.push(defined.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let existing: HashSet<String> = db
            .snapshot()?
            .relationships(tenant)
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for spec in self.relationships {
            if existing.contains(&spec.name) {
                continue;
            }
            let parent = db.entity(tenant, &spec.parent)?;
            let child = db.entity(tenant, &spec.child)?;
            let mut relationship = match spec.cardinality {
                Cardinality::OneToOne => RelationshipDef::one_to_one(&spec.name, parent.id, child.id),
                Cardinality::OneToMany => RelationshipDef::one_to_many(&spec.name, parent.id, child.id),
                Cardinality::ManyToMany => RelationshipDef::many_to_many(&spec.name, parent.id, child.id),
            }
            .with_on_parent_delete(spec.on_parent_delete);
            if let Some(tenant) = tenant {
                relationship = relationship.for_tenant(tenant);
            }
            db.define_relationship(relationship).await?;
            report.relationships.push(spec.name);
        }

        for grant in self.grants {
            let entity = db.entity(tenant, &grant.entity)?;
            db.grant(entity.id, &grant.role, grant.actions).await?;
            report.grants += 1;
        }

        info!(
            defined = report.defined.len(),
            skipped = report.skipped.len(),
            relationships = report.relationships.len(),
            grants = report.grants,
            "schema applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbase_core::EngineConfig;

    const SCHEMA: &str = r#"{
        "entities": [
            {"name": "customer", "properties": [{"name": "name", "type": "TEXT", "required": true}]},
            {"name": "invoice", "properties": [
                {"name": "amount", "type": "NUMBER", "required": true},
                {"name": "status", "type": "SELECT", "options": [
                    {"value": "draft", "name": "Draft"}, {"value": "sent", "name": "Sent"}
                ], "defaultValue": "draft"}
            ]}
        ],
        "relationships": [
            {"name": "customer_invoices", "parent": "customer", "child": "invoice",
             "cardinality": "oneToMany", "onParentDelete": "required"}
        ],
        "grants": [{"entity": "invoice", "role": "editor", "actions": ["create", "read"]}]
    }"#;

    #[tokio::test]
    async fn test_apply_is_repeatable() {
        let db = Database::open(EngineConfig::temporary()).unwrap();

        let report = SchemaFile::parse(SCHEMA).unwrap().apply(&db, None).await.unwrap();
        assert_eq!(report.defined, vec!["customer", "invoice"]);
        assert_eq!(report.relationships, vec!["customer_invoices"]);
        assert_eq!(report.grants, 1);

        let again = SchemaFile::parse(SCHEMA).unwrap().apply(&db, None).await.unwrap();
        assert!(again.defined.is_empty());
        assert_eq!(again.skipped.len(), 2);
        assert!(again.relationships.is_empty());

        let relationship = db.snapshot().unwrap().relationship_by_name(None, "customer_invoices").unwrap();
        assert_eq!(relationship.on_parent_delete, DeleteBehavior::Required);
    }

    #[tokio::test]
    async fn test_entities_land_in_the_tenant() {
        let db = Database::open(EngineConfig::temporary()).unwrap();
        let tenant = TenantId::new();
        SchemaFile::parse(SCHEMA).unwrap().apply(&db, Some(tenant)).await.unwrap();

        assert!(db.entity(Some(tenant), "invoice").is_ok());
        assert!(db.entity(None, "invoice").is_err());
        assert!(db.entity(Some(TenantId::new()), "invoice").is_err());
    }

    #[tokio::test]
    async fn test_unknown_relationship_entity_fails() {
        let db = Database::open(EngineConfig::temporary()).unwrap();
        let schema = SchemaFile::parse(
            r#"{"relationships": [{"name": "x", "parent": "a", "child": "b", "cardinality": "manyToMany"}]}"#,
        )
        .unwrap();
        assert!(matches!(schema.apply(&db, None).await, Err(Error::NotFound { .. })));
    }
}
