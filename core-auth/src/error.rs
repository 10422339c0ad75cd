use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid tenant identifier: {0}")]
    InvalidTenant(String),

    #[error("Tenant {current} is already signed in; sign out first")]
    AlreadySignedIn { current: String },

    #[error("Not authenticated")]
    NotAuthenticated,
}

pub type Result<T> = std::result::Result<T, AuthError>;
