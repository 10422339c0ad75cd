//! In-process `RemoteStore` implementation
//!
//! Documents live in a map keyed by collection path, so tenants never see
//! each other's data. Every write is stamped by a server clock that never goes
//! backwards, which keeps `UpdatedAfter` queries exact.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::remote::{
    BatchCommit, BatchItemResult, BatchWrite, CollectionRef, RemoteDocument, RemotePredicate,
    RemoteStore, WriteAck,
};
use bridge_traits::{Clock, SystemClock, TenantId, Timestamp};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::MemoryStoreError;

/// Batch limit advertised when none is configured
pub const DEFAULT_MAX_BATCH_OPERATIONS: usize = 500;

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, BTreeMap<String, RemoteDocument>>,
    last_write_at: Timestamp,
    offline: bool,
    failing_commits: u32,
    rejected_ids: HashSet<String>,
    commit_sizes: Vec<usize>,
    upserts: u64,
    deletes: u64,
    queries: u64,
}

impl StoreState {
    /// Next server timestamp, strictly after the previous write.
    fn stamp(&mut self, now: Timestamp) -> Timestamp {
        self.last_write_at = now.max(self.last_write_at + 1);
        self.last_write_at
    }

    fn write(&mut self, path: &str, id: String, fields: Value, at: Timestamp) {
        self.collections.entry(path.to_string()).or_default().insert(
            id.clone(),
            RemoteDocument {
                id,
                fields,
                updated_at: at,
            },
        );
    }
}

/// Remote document store held in memory
///
/// # Example
///
/// ```ignore
/// use provider_memory::InMemoryRemoteStore;
///
/// let store = Arc::new(InMemoryRemoteStore::new());
/// store.fail_next_commits(2).await;
/// // the next two `commit_batch` calls fail, the third succeeds
/// ```
pub struct InMemoryRemoteStore {
    state: Mutex<StoreState>,
    max_batch_operations: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_max_batch(DEFAULT_MAX_BATCH_OPERATIONS)
    }

    pub fn with_max_batch(max_batch_operations: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            max_batch_operations,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` as the server clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    /// While offline every call fails with `NotAvailable`
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Make the next `count` batch commits fail as a whole
    pub async fn fail_next_commits(&self, count: u32) {
        self.state.lock().await.failing_commits = count;
    }

    /// Reject every write targeting document `id`, individually in batches
    pub async fn reject_document(&self, id: impl Into<String>) {
        self.state.lock().await.rejected_ids.insert(id.into());
    }

    pub async fn accept_document(&self, id: &str) {
        self.state.lock().await.rejected_ids.remove(id);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Write a document directly, as another device would
    pub async fn seed(&self, tenant_id: &TenantId, collection: &str, id: &str, fields: Value) -> Timestamp {
        let path = self.collection(tenant_id, collection).path();
        let mut state = self.state.lock().await;
        let at = state.stamp(self.clock.now_millis());
        state.write(&path, id.to_string(), fields, at);
        at
    }

    pub async fn documents(&self, tenant_id: &TenantId, collection: &str) -> Vec<RemoteDocument> {
        let path = self.collection(tenant_id, collection).path();
        let state = self.state.lock().await;
        state
            .collections
            .get(&path)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn document(&self, tenant_id: &TenantId, collection: &str, id: &str) -> Option<RemoteDocument> {
        let path = self.collection(tenant_id, collection).path();
        let state = self.state.lock().await;
        state.collections.get(&path).and_then(|docs| docs.get(id).cloned())
    }

    /// Number of writes in each successful or rejected-by-size `commit_batch` call
    pub async fn commit_sizes(&self) -> Vec<usize> {
        self.state.lock().await.commit_sizes.clone()
    }

    pub async fn commit_count(&self) -> usize {
        self.state.lock().await.commit_sizes.len()
    }

    pub async fn upsert_count(&self) -> u64 {
        self.state.lock().await.upserts
    }

    pub async fn delete_count(&self) -> u64 {
        self.state.lock().await.deletes
    }

    pub async fn query_count(&self) -> u64 {
        self.state.lock().await.queries
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn max_batch_operations(&self) -> usize {
        self.max_batch_operations
    }

    #[instrument(skip(self), fields(path = %collection.path()))]
    async fn query(
        &self,
        collection: &CollectionRef,
        predicate: &RemotePredicate,
    ) -> Result<Vec<RemoteDocument>> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(MemoryStoreError::Offline.into());
        }
        state.queries += 1;

        let mut documents: Vec<RemoteDocument> = state
            .collections
            .get(&collection.path())
            .map(|docs| {
                docs.values()
                    .filter(|doc| predicate.matches(doc.updated_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        documents.sort_by_key(|doc| doc.updated_at);

        debug!(count = documents.len(), "Query served");
        Ok(documents)
    }

    async fn upsert(
        &self,
        collection: &CollectionRef,
        id: Option<&str>,
        fields: Value,
    ) -> Result<WriteAck> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(MemoryStoreError::Offline.into());
        }

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if state.rejected_ids.contains(&id) {
            return Err(MemoryStoreError::Injected(format!("write to {} rejected", id)).into());
        }

        let committed_at = state.stamp(self.clock.now_millis());
        state.write(&collection.path(), id.clone(), fields, committed_at);
        state.upserts += 1;

        Ok(WriteAck { id, committed_at })
    }

    async fn delete(&self, collection: &CollectionRef, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(MemoryStoreError::Offline.into());
        }

        let path = collection.path();
        let removed = state
            .collections
            .get_mut(&path)
            .and_then(|docs| docs.remove(id));
        if removed.is_none() {
            return Err(MemoryStoreError::DocumentNotFound {
                path,
                id: id.to_string(),
            }
            .into());
        }

        state.stamp(self.clock.now_millis());
        state.deletes += 1;
        Ok(())
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<BatchCommit> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(MemoryStoreError::Offline.into());
        }
        if writes.len() > self.max_batch_operations {
            warn!(max = self.max_batch_operations, "Batch over provider limit");
            return Err(MemoryStoreError::BatchTooLarge {
                requested: writes.len(),
                max: self.max_batch_operations,
            }
            .into());
        }
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(MemoryStoreError::Injected("batch commit failed".to_string()).into());
        }

        state.commit_sizes.push(writes.len());
        let committed_at = state.stamp(self.clock.now_millis());

        let results = writes
            .into_iter()
            .map(|write| {
                let id = write.id.unwrap_or_else(|| Uuid::new_v4().to_string());
                if state.rejected_ids.contains(&id) {
                    return BatchItemResult::failed(Some(id), "document rejected by store");
                }
                state.write(&write.collection.path(), id.clone(), write.fields, committed_at);
                BatchItemResult::ok(id)
            })
            .collect();

        Ok(BatchCommit {
            committed_at,
            results,
        })
    }
}
