//! Command execution against an open database.

use std::sync::Arc;

use crate::commands::{Command, SchemaCommand};
use crate::formatter::Formatter;
use crate::schema::SchemaFile;
use rowbase_core::{Actor, Database, EntityDef, JsonMap, QueryRequest, TenantId};
use serde_json::Value;
use thiserror::Error;

/// Execution errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine error.
    #[error("{0}")]
    Engine(#[from] rowbase_core::Error),

    /// Reading an input file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Input JSON could not be parsed.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Who runs commands, and where.
pub struct Session<'a> {
    pub db: &'a Database,
    pub tenant: Option<TenantId>,
    pub actor: Actor,
}

impl Session<'_> {
    fn entity(&self, key: &str) -> Result<Arc<EntityDef>, CliError> {
        Ok(self.db.entity(self.tenant, key)?)
    }
}

fn into_map(values: Value) -> JsonMap {
    match values {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

/// Execute a command and return formatted output.
pub async fn execute(session: &Session<'_>, command: Command, formatter: &dyn Formatter) -> Result<String, CliError> {
    let db = session.db;
    match command {
        Command::Schema(SchemaCommand::Apply { file }) => {
            let content = tokio::fs::read_to_string(&file).await?;
            let report = SchemaFile::parse(&content)?.apply(db, session.tenant).await?;
            Ok(formatter.format_message(&report.summary()))
        }

        Command::Entities => {
            let entities = db.catalog().get_all(session.tenant)?;
            let refs: Vec<&EntityDef> = entities.iter().map(|e| e.as_ref()).collect();
            Ok(formatter.format_entities(&refs))
        }

        Command::Describe { entity } => {
            let entity = session.entity(&entity)?;
            Ok(formatter.format_entity(&entity))
        }

        Command::Grant { entity, role, actions } => {
            let entity = session.entity(&entity)?;
            let listed = actions.0.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(",");
            db.grant(entity.id, &role, actions.0).await?;
            Ok(formatter.format_message(&format!("granted {} on {} to {}", listed, entity.name, role)))
        }

        Command::Create { entity, values, template } => {
            let entity = session.entity(&entity)?;
            let values = into_map(values);
            let row = match template {
                Some(template) => {
                    db.rows()
                        .create_from_template(&entity, &template, session.tenant, &session.actor, &values)
                        .await?
                }
                None => db.rows().create(&entity, session.tenant, &session.actor, &values).await?,
            };
            Ok(formatter.format_row(&entity, &row))
        }

        Command::Get { row } => {
            let row = db.rows().read(&session.actor, row).await?;
            let entity = db.entity_of(&row)?;
            Ok(formatter.format_row(&entity, &row))
        }

        Command::Update { row, values } => {
            let current = db.rows().read(&session.actor, row).await?;
            let entity = db.entity_of(&current)?;
            let updated = db
                .rows()
                .update(row, &entity, &session.actor, &into_map(values))
                .await?;
            Ok(formatter.format_row(&entity, &updated))
        }

        Command::Delete { row } => {
            let deleted = db.rows().delete(row, &session.actor).await?;
            Ok(formatter.format_message(&format!("{} row(s) deleted", deleted)))
        }

        Command::Query {
            entity,
            filters,
            sort,
            page,
            page_size,
            view,
        } => {
            let entity = session.entity(&entity)?;
            let result = match view {
                Some(view) => {
                    db.query()
                        .query_view(&entity, &view, session.tenant, &session.actor, page)
                        .await?
                }
                None => {
                    let request = QueryRequest {
                        filters,
                        sort,
                        page,
                        page_size,
                    };
                    db.query().query(&entity, session.tenant, &session.actor, &request).await?
                }
            };
            Ok(formatter.format_page(&entity, &result))
        }
    }
}
