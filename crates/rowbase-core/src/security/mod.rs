//! Permission model.
//!
//! Actors are authenticated elsewhere and arrive as an [`Actor`]. Access is
//! granted to roles at the entity level and can be overridden for a single
//! identity on a single row. [`PermissionResolver`] decides over loaded
//! [`PermissionData`]; [`PermissionStore`] persists the entries.

mod actor;
mod permission;
mod resolver;
mod store;

pub use actor::{Actor, Identity};
pub use permission::{parse_actions, Action, Effect, EntityGrant, PermissionData, RowGrant};
pub use resolver::PermissionResolver;
pub use store::PermissionStore;
