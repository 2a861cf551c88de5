//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rowbase_core::security::Action;
use rowbase_core::{Actor, Database, EngineConfig, EntityDef, JsonMap, StorageConfig, UserId};
use serde_json::Value;

pub const EDITOR: &str = "editor";
pub const VIEWER: &str = "viewer";

pub struct TestContext {
    pub db: Database,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default().with_storage(StorageConfig::new(dir.path()));
        Self {
            db: Database::open(config).unwrap(),
            _dir: dir,
        }
    }

    /// Define an entity and give editors every action and viewers read.
    pub async fn define(&self, entity: EntityDef) -> Arc<EntityDef> {
        let entity = self.db.define_entity(entity).await.unwrap();
        self.db.grant(entity.id, EDITOR, Action::ALL.to_vec()).await.unwrap();
        self.db.grant(entity.id, VIEWER, vec![Action::Read]).await.unwrap();
        entity
    }
}

pub fn editor() -> Actor {
    Actor::user(UserId::new()).with_role(EDITOR)
}

pub fn viewer() -> Actor {
    Actor::user(UserId::new()).with_role(VIEWER)
}

/// A JSON object literal as submitted values.
pub fn values(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
