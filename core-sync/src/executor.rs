//! Replays retry queue entries against the remote store.

use async_trait::async_trait;
use bridge_traits::{RemoteStore, WriteAck};
use core_records::{RecordRepository, SyncStatus, SyncableRecord};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{Result, SyncError};
use crate::retry_queue::{QueueEntry, QueueExecutor, QueueOperation};

/// [`QueueExecutor`] that writes to the remote collections of each entry's
/// tenant
///
/// Creates and updates upsert the queued snapshot at the entry's remote id.
/// A delete of a document that is already gone counts as success.
///
/// A create or update is dropped without a remote write when the local record
/// has been confirmed `synced` since the entry was queued: a later upload
/// already carried a payload at least as new as the snapshot.
///
/// After a successful write the local record is marked `synced` only if its
/// payload still equals the snapshot; a record edited since keeps its status
/// and is uploaded by the next sync.
pub struct RemoteQueueExecutor {
    remote: Arc<dyn RemoteStore>,
    records: Arc<dyn RecordRepository>,
}

impl RemoteQueueExecutor {
    pub fn new(remote: Arc<dyn RemoteStore>, records: Arc<dyn RecordRepository>) -> Self {
        Self { remote, records }
    }

    /// The local record an entry was queued for, if it still exists and
    /// belongs to the entry's tenant.
    async fn local_record(&self, entry: &QueueEntry) -> Result<Option<SyncableRecord>> {
        let record = self.records.find_by_id(entry.local_id).await?;
        Ok(record.filter(|r| r.kind() == entry.entity_kind && r.is_visible_to(&entry.tenant_id)))
    }

    async fn reconcile(&self, entry: &QueueEntry, ack: &WriteAck) -> Result<()> {
        let Some(mut record) = self.local_record(entry).await? else {
            debug!(local_id = entry.local_id, "Replayed record no longer exists locally");
            return Ok(());
        };

        if entry.payload.as_ref() == Some(&record.payload) {
            record.mark_synced(&entry.tenant_id, ack.id.clone(), ack.committed_at);
        } else {
            record.remote_id = Some(ack.id.clone());
            record.claim(&entry.tenant_id);
        }
        self.records.save(record).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueExecutor for RemoteQueueExecutor {
    #[instrument(skip(self, entry), fields(entry_id = %entry.id, operation = %entry.operation))]
    async fn execute(&self, entry: &QueueEntry) -> Result<()> {
        let collection = self
            .remote
            .collection(&entry.tenant_id, entry.entity_kind.collection_name());

        match entry.operation {
            QueueOperation::Delete => {
                let Some(remote_id) = entry.remote_id.as_deref() else {
                    return Ok(());
                };
                match self.remote.delete(&collection, remote_id).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_found() => {
                        debug!(remote_id, "Document already deleted remotely");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            QueueOperation::Create | QueueOperation::Update => {
                let payload = entry.payload.as_ref().ok_or_else(|| {
                    SyncError::Serialization(format!(
                        "queued {} of {} {} carries no payload",
                        entry.operation, entry.entity_kind, entry.local_id
                    ))
                })?;

                if let Some(record) = self.local_record(entry).await? {
                    if record.sync_status == SyncStatus::Synced {
                        debug!(
                            local_id = entry.local_id,
                            "Record already committed by a later upload, dropping snapshot"
                        );
                        return Ok(());
                    }
                }

                let fields = payload.to_remote_fields()?;
                let ack = self
                    .remote
                    .upsert(&collection, entry.remote_id.as_deref(), fields)
                    .await?;
                self.reconcile(entry, &ack).await
            }
        }
    }
}
