use bridge_traits::BridgeError;
use core_records::RecordError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No signed-in tenant")]
    Unauthenticated,

    #[error("Remote store error: {0}")]
    TransientRemote(String),

    #[error("{operation} of {entity_kind} record {local_id} failed permanently after {attempts} attempts: {message}")]
    PermanentOperationFailure {
        entity_kind: String,
        operation: String,
        local_id: i64,
        attempts: u32,
        message: String,
    },

    #[error("Local store error: {0}")]
    LocalStore(String),

    #[error("Sync already in progress (session {session_id})")]
    SyncInProgress { session_id: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid queue entry ID: {0}")]
    InvalidEntryId(String),

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Errors that end the session instead of being routed to the retry queue.
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthenticated | SyncError::LocalStore(_) | SyncError::Database(_)
        )
    }
}

impl From<RecordError> for SyncError {
    fn from(err: RecordError) -> Self {
        SyncError::LocalStore(err.to_string())
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        SyncError::TransientRemote(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
