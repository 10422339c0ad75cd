//! Identity Abstractions
//!
//! The engine never talks to an identity service directly. It asks an
//! [`IdentityProvider`] for the tenant that is signed in right now and treats
//! `None` as "unauthenticated".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of the user whose data is being synchronized.
///
/// Remote collections are partitioned by this value; two tenants never see
/// each other's documents.
///
/// # Examples
///
/// ```
/// use bridge_traits::TenantId;
///
/// let tenant = TenantId::new("coach-42");
/// assert_eq!(tenant.as_str(), "coach-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Source of the current tenant identity.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::identity::IdentityProvider;
///
/// async fn require_tenant(identity: &dyn IdentityProvider) -> Option<String> {
///     identity.current_tenant_id().await.map(|t| t.to_string())
/// }
/// ```
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in tenant, or `None` when signed out.
    async fn current_tenant_id(&self) -> Option<TenantId>;
}

/// Identity provider pinned to a single tenant.
///
/// Useful for tools and tests that operate on behalf of one known user.
#[derive(Debug, Clone)]
pub struct FixedIdentity(Option<TenantId>);

impl FixedIdentity {
    pub fn signed_in(tenant: impl Into<TenantId>) -> Self {
        Self(Some(tenant.into()))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn current_tenant_id(&self) -> Option<TenantId> {
        self.0.clone()
    }
}
