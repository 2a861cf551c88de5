//! Permission resolution.

use super::actor::Actor;
use super::permission::{Action, Effect, PermissionData};
use crate::catalog::EntityDef;
use crate::ids::RowId;

/// Decides whether an actor may act on an entity or one of its rows.
///
/// Pure function over loaded [`PermissionData`]; performs no I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionResolver;

impl PermissionResolver {
    /// Resolution order:
    /// 1. an explicit row-level entry for this actor wins outright
    ///    (a deny entry beats an allow entry for the same action);
    /// 2. otherwise an entity-level grant to one of the actor's roles;
    /// 3. otherwise deny.
    ///
    /// An absent actor is denied.
    pub fn check(
        actor: Option<&Actor>,
        entity: &EntityDef,
        row: Option<RowId>,
        action: Action,
        data: &PermissionData,
    ) -> bool {
        let Some(actor) = actor else {
            return false;
        };

        if let Some(row_id) = row {
            let mut explicit = None;
            for grant in data
                .row_grants
                .iter()
                .filter(|g| g.row_id == row_id && g.subject == actor.identity && g.action == action)
            {
                match grant.effect {
                    Effect::Deny => return false,
                    Effect::Allow => explicit = Some(true),
                }
            }
            if let Some(allowed) = explicit {
                return allowed;
            }
        }

        data.entity_grants
            .iter()
            .filter(|g| g.entity_id == entity.id)
            .any(|g| g.actions.contains(&action) && actor.has_role(&g.role))
    }
}
