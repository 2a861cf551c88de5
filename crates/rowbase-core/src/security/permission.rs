//! Permission data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::actor::Identity;
use crate::ids::{EntityId, RowId};

/// CRUD action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

/// Parse a comma-separated list such as `create,read` or `*`.
pub fn parse_actions(list: &str) -> Result<Vec<Action>, String> {
    if list.trim() == "*" {
        return Ok(Action::ALL.to_vec());
    }
    list.split(',').map(str::parse).collect()
}

/// Entity-level default: members of `role` may perform `actions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGrant {
    pub entity_id: EntityId,
    pub role: String,
    pub actions: Vec<Action>,
}

/// Whether a row-level entry allows or forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Row-level explicit grant or restriction for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowGrant {
    pub row_id: RowId,
    pub subject: Identity,
    pub action: Action,
    pub effect: Effect,
}

impl RowGrant {
    pub fn allow(row_id: RowId, subject: Identity, action: Action) -> Self {
        Self {
            row_id,
            subject,
            action,
            effect: Effect::Allow,
        }
    }

    pub fn deny(row_id: RowId, subject: Identity, action: Action) -> Self {
        Self {
            row_id,
            subject,
            action,
            effect: Effect::Deny,
        }
    }
}

/// Loaded permission facts for one entity and a set of its rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionData {
    pub entity_grants: Vec<EntityGrant>,
    pub row_grants: Vec<RowGrant>,
}

impl PermissionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_grant(mut self, grant: EntityGrant) -> Self {
        self.entity_grants.push(grant);
        self
    }

    pub fn with_row_grant(mut self, grant: RowGrant) -> Self {
        self.row_grants.push(grant);
        self
    }

    /// Merge row-level entries loaded separately.
    pub fn extend_rows(&mut self, grants: impl IntoIterator<Item = RowGrant>) {
        self.row_grants.extend(grants);
    }
}
