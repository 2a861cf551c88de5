//! Actors performing operations.

use std::fmt;

use crate::ids::{ApiKeyId, TenantId, UserId};

/// Who an actor is: a user or an API key, never both.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum Identity {
    #[serde(rename = "userId")]
    User(UserId),
    #[serde(rename = "apiKeyId")]
    ApiKey(ApiKeyId),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{id}"),
            Identity::ApiKey(id) => write!(f, "api-key:{id}"),
        }
    }
}

/// An already-authenticated identity with its roles and tenant context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub identity: Identity,
    pub roles: Vec<String>,
    /// `None` for platform actors that may act in any tenant.
    pub tenant_id: Option<TenantId>,
}

impl Actor {
    pub fn user(id: UserId) -> Self {
        Self {
            identity: Identity::User(id),
            roles: Vec::new(),
            tenant_id: None,
        }
    }

    pub fn api_key(id: ApiKeyId) -> Self {
        Self {
            identity: Identity::ApiKey(id),
            roles: Vec::new(),
            tenant_id: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn in_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Tenant-scoped actors only reach their own tenant's rows and
    /// tenant-less system rows.
    pub fn reaches_tenant(&self, tenant: Option<TenantId>) -> bool {
        match (self.tenant_id, tenant) {
            (None, _) | (_, None) => true,
            (Some(own), Some(target)) => own == target,
        }
    }

    /// Tenant-scoped actors only write inside their own tenant. Tenant-less
    /// rows are shared by every tenant, so only platform actors write them.
    pub fn writes_tenant(&self, tenant: Option<TenantId>) -> bool {
        self.tenant_id.is_none() || self.tenant_id == tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_json() {
        let id = UserId::new();
        let json = serde_json::to_value(Identity::User(id)).unwrap();
        assert_eq!(json, serde_json::json!({"userId": id.to_string()}));
    }

    #[test]
    fn test_tenant_reach() {
        let (a, b) = (TenantId::new(), TenantId::new());
        let actor = Actor::user(UserId::new()).in_tenant(a);
        assert!(actor.reaches_tenant(Some(a)));
        assert!(actor.reaches_tenant(None));
        assert!(!actor.reaches_tenant(Some(b)));
        assert!(Actor::api_key(ApiKeyId::new()).reaches_tenant(Some(b)));
    }

    #[test]
    fn test_tenant_writes() {
        let (a, b) = (TenantId::new(), TenantId::new());
        let actor = Actor::user(UserId::new()).in_tenant(a);
        assert!(actor.writes_tenant(Some(a)));
        assert!(!actor.writes_tenant(None));
        assert!(!actor.writes_tenant(Some(b)));

        let platform = Actor::api_key(ApiKeyId::new());
        assert!(platform.writes_tenant(None));
        assert!(platform.writes_tenant(Some(b)));
    }
}
