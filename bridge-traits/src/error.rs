use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Remote document not found: {0}")]
    NotFound(String),

    #[error("Remote call timed out: {0}")]
    Timeout(String),

    #[error("Remote rejected the request: {0}")]
    PermissionDenied(String),

    #[error("Batch of {requested} operations exceeds provider maximum of {max}")]
    BatchLimitExceeded { requested: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the error means the target document does not exist remotely.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
