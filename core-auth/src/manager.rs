//! # Session Manager
//!
//! Tracks which tenant the local actor is signed in as.
//!
//! ## Overview
//!
//! The `SessionManager` owns the signed-in / signed-out state and serves it
//! to the sync engine through the [`IdentityProvider`] trait. Credential
//! exchange happens in the host; the manager only learns the resulting tenant
//! identifier. State changes are broadcast as [`AuthEvent`]s.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::SessionManager;
//! use core_runtime::events::EventBus;
//! use bridge_traits::{SystemClock, IdentityProvider};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sessions = SessionManager::new(EventBus::default(), Arc::new(SystemClock));
//! sessions.sign_in("coach-42").await?;
//!
//! assert!(sessions.current_tenant_id().await.is_some());
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{AuthState, Session};
use async_trait::async_trait;
use bridge_traits::{Clock, IdentityProvider, TenantId};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_tenant;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Signed-in tenant tracker and [`IdentityProvider`] implementation.
pub struct SessionManager {
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    current_session: RwLock<Option<Session>>,
}

impl SessionManager {
    pub fn new(event_bus: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            event_bus,
            clock,
            current_session: RwLock::new(None),
        }
    }

    /// Mark `tenant` as signed in.
    ///
    /// Signing in again as the same tenant is a no-op. Switching tenants
    /// requires an explicit [`sign_out`](Self::sign_out) first so that no sync
    /// session can straddle two users.
    #[instrument(skip(self, tenant))]
    pub async fn sign_in(&self, tenant: impl Into<TenantId>) -> Result<Session> {
        let tenant = tenant.into();
        if tenant.as_str().trim().is_empty() {
            return Err(AuthError::InvalidTenant(
                "tenant identifier cannot be empty".to_string(),
            ));
        }

        let mut current = self.current_session.write().await;
        if let Some(existing) = current.as_ref() {
            if existing.tenant_id == tenant {
                return Ok(existing.clone());
            }
            warn!(
                current = %redact_tenant(existing.tenant_id.as_str()),
                "Sign-in refused while another tenant is active"
            );
            return Err(AuthError::AlreadySignedIn {
                current: existing.tenant_id.to_string(),
            });
        }

        let session = Session {
            tenant_id: tenant.clone(),
            state: AuthState::SignedIn,
            signed_in_at: self.clock.now_millis(),
        };
        *current = Some(session.clone());
        drop(current);

        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedIn {
                tenant_id: tenant.to_string(),
            }))
            .ok();

        info!(tenant_id = %redact_tenant(tenant.as_str()), "Tenant signed in");
        Ok(session)
    }

    /// Clear the current session.
    ///
    /// Returns [`AuthError::NotAuthenticated`] when nobody is signed in.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let previous = self
            .current_session
            .write()
            .await
            .take()
            .ok_or(AuthError::NotAuthenticated)?;

        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedOut {
                tenant_id: previous.tenant_id.to_string(),
            }))
            .ok();

        info!(tenant_id = %redact_tenant(previous.tenant_id.as_str()), "Tenant signed out");
        Ok(())
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.current_session.read().await.clone()
    }

    pub async fn auth_state(&self) -> AuthState {
        self.current_session
            .read()
            .await
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityProvider for SessionManager {
    async fn current_tenant_id(&self) -> Option<TenantId> {
        self.current_session
            .read()
            .await
            .as_ref()
            .filter(|s| s.state.is_authenticated())
            .map(|s| s.tenant_id.clone())
    }
}
