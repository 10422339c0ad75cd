//! Error types for the in-memory provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// In-memory provider errors
#[derive(Error, Debug)]
pub enum MemoryStoreError {
    /// The store was switched offline
    #[error("Remote store is offline")]
    Offline,

    /// A failure injected by the test harness
    #[error("Injected failure: {0}")]
    Injected(String),

    /// Document not found
    #[error("Document not found: {path}/{id}")]
    DocumentNotFound { path: String, id: String },

    /// Too many writes in one batch
    #[error("Batch of {requested} writes exceeds maximum of {max}")]
    BatchTooLarge { requested: usize, max: usize },
}

/// Result type for in-memory provider operations
pub type Result<T> = std::result::Result<T, MemoryStoreError>;

impl From<MemoryStoreError> for BridgeError {
    fn from(error: MemoryStoreError) -> Self {
        match error {
            MemoryStoreError::Offline => BridgeError::NotAvailable(error.to_string()),
            MemoryStoreError::Injected(msg) => BridgeError::OperationFailed(msg),
            MemoryStoreError::DocumentNotFound { path, id } => {
                BridgeError::NotFound(format!("{}/{}", path, id))
            }
            MemoryStoreError::BatchTooLarge { requested, max } => {
                BridgeError::BatchLimitExceeded { requested, max }
            }
        }
    }
}
