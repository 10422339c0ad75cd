//! Remote Document Store Abstraction
//!
//! Describes the cloud document database the engine synchronizes with. The
//! store is organized as one collection hierarchy per tenant:
//!
//! ```text
//! tenants/{tenant_id}/{collection}/{document_id}
//! ```
//!
//! Each document carries a JSON field map and a server-assigned modification
//! timestamp. Writes can be issued one at a time (`upsert`, `delete`) or as an
//! atomic batch bounded by [`RemoteStore::max_batch_operations`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identity::TenantId;
use crate::time::Timestamp;

/// Handle to a tenant-scoped collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub tenant_id: TenantId,
    pub name: String,
}

impl CollectionRef {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            name: name.into(),
        }
    }

    /// Hierarchical path of the collection, e.g. `tenants/abc/teams`.
    pub fn path(&self) -> String {
        format!("tenants/{}/{}", self.tenant_id, self.name)
    }
}

/// Filter applied by [`RemoteStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePredicate {
    /// Every document in the collection
    All,
    /// Documents whose server timestamp is strictly greater than the value
    UpdatedAfter(Timestamp),
}

impl RemotePredicate {
    pub fn matches(&self, updated_at: Timestamp) -> bool {
        match self {
            RemotePredicate::All => true,
            RemotePredicate::UpdatedAfter(since) => updated_at > *since,
        }
    }
}

/// A document as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Value,
    /// Server timestamp of the last write to this document
    pub updated_at: Timestamp,
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchWrite {
    pub collection: CollectionRef,
    /// Target document. `None` lets the store allocate an id.
    pub id: Option<String>,
    pub fields: Value,
}

/// Per-item outcome of a batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemResult {
    /// Document id the write landed on
    pub id: Option<String>,
    /// Set when this individual write was rejected
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of [`RemoteStore::commit_batch`].
///
/// `results` is positionally aligned with the submitted writes.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommit {
    pub committed_at: Timestamp,
    pub results: Vec<BatchItemResult>,
}

/// Acknowledgement of a single write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub id: String,
    pub committed_at: Timestamp,
}

/// Remote document store trait
///
/// Implementations own transport concerns: authentication headers, request
/// timeouts and connection reuse. A timeout must surface as
/// [`BridgeError::Timeout`](crate::BridgeError::Timeout) rather than hang.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::remote::{RemoteStore, RemotePredicate};
///
/// async fn changed_teams(store: &dyn RemoteStore, tenant: TenantId, since: i64) -> Result<usize> {
///     let teams = store.collection(&tenant, "teams");
///     let docs = store.query(&teams, &RemotePredicate::UpdatedAfter(since)).await?;
///     Ok(docs.len())
/// }
/// ```
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Largest number of writes accepted by a single `commit_batch` call.
    fn max_batch_operations(&self) -> usize;

    /// Resolve the handle of a tenant's collection.
    fn collection(&self, tenant_id: &TenantId, name: &str) -> CollectionRef {
        CollectionRef::new(tenant_id.clone(), name)
    }

    /// Fetch documents matching the predicate.
    async fn query(
        &self,
        collection: &CollectionRef,
        predicate: &RemotePredicate,
    ) -> Result<Vec<RemoteDocument>>;

    /// Create or replace a document.
    ///
    /// When `id` is `None` the store allocates a new document id.
    async fn upsert(
        &self,
        collection: &CollectionRef,
        id: Option<&str>,
        fields: Value,
    ) -> Result<WriteAck>;

    /// Delete a document.
    ///
    /// Returns [`BridgeError::NotFound`](crate::BridgeError::NotFound) when
    /// the document does not exist.
    async fn delete(&self, collection: &CollectionRef, id: &str) -> Result<()>;

    /// Commit a group of writes atomically.
    ///
    /// An `Err` means nothing was written. An `Ok` may still carry per-item
    /// errors in `results` for writes the store rejected individually.
    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<BatchCommit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_path() {
        let collection = CollectionRef::new(TenantId::new("t1"), "games");
        assert_eq!(collection.path(), "tenants/t1/games");
    }

    #[test]
    fn test_predicate_is_strict() {
        let predicate = RemotePredicate::UpdatedAfter(100);
        assert!(!predicate.matches(100));
        assert!(predicate.matches(101));
        assert!(RemotePredicate::All.matches(0));
    }

    #[test]
    fn test_batch_item_result() {
        assert!(BatchItemResult::ok("doc").is_ok());
        let failed = BatchItemResult::failed(Some("doc".into()), "quota");
        assert!(!failed.is_ok());
        assert_eq!(failed.error.as_deref(), Some("quota"));
    }
}
