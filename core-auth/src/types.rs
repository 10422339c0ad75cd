use bridge_traits::{TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authentication state of the local actor.
///
/// # Examples
///
/// ```
/// use core_auth::AuthState;
///
/// assert!(AuthState::SignedIn.is_authenticated());
/// assert!(!AuthState::default().is_authenticated());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthState {
    /// No tenant is signed in; sync is refused
    #[default]
    SignedOut,
    /// A tenant is signed in
    SignedIn,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::SignedIn)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::SignedOut => write!(f, "Signed Out"),
            AuthState::SignedIn => write!(f, "Signed In"),
        }
    }
}

/// Current authentication session information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub tenant_id: TenantId,
    pub state: AuthState,
    /// When the tenant signed in (Unix ms)
    pub signed_in_at: Timestamp,
}
