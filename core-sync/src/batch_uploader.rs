//! # Batch Uploader
//!
//! Turns pending local records into bounded atomic batch commits.
//!
//! ## Overview
//!
//! - Records are split into groups no larger than the operative ceiling
//!   (450 by default, below the provider's advertised maximum of 500)
//! - Critical kinds are uploaded first so parents reach the store before the
//!   records that reference them
//! - A record without a remote id receives a client-generated one, persisted
//!   locally before the commit is sent
//! - An unowned record is claimed by the uploading tenant at the same time;
//!   records owned by another tenant are never sent
//! - Groups are committed one at a time. A committed group marks its records
//!   `synced`; a failed group (or a rejected item) is routed to the
//!   [`RetryQueue`] record by record and the next group still runs
//! - Cancellation is observed between groups, never during a commit
//!
//! ## Usage
//!
//! ```ignore
//! let uploader = BatchUploader::new(remote, records, queue, 450)?;
//! let pending = records.find_pending_sync(&tenant_id, None).await?;
//! let result = uploader.upload(&tenant_id, pending, &cancel).await?;
//! println!("{} synced, {} queued", result.succeeded, result.queued);
//! ```

use bridge_traits::{BatchWrite, RemoteStore, TenantId, Timestamp};
use core_records::{RecordRepository, SyncStatus, SyncableRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::retry_queue::{PriorityClass, QueueOperation, RetryQueue};

/// Operative ceiling used unless configured otherwise
pub const DEFAULT_BATCH_CEILING: usize = 450;

/// Outcome of one upload call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Records committed and marked synced
    pub succeeded: u64,
    /// Records handed to the retry queue
    pub queued: u64,
    /// Records left untouched because the upload was cancelled
    pub skipped: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub cancelled: bool,
    /// Remote id of every committed record, by local id
    pub assigned_ids: BTreeMap<i64, String>,
}

impl BatchResult {
    pub fn is_empty(&self) -> bool {
        self.succeeded == 0 && self.queued == 0 && self.skipped == 0
    }
}

/// Uploads pending records in bounded batches
pub struct BatchUploader {
    remote: Arc<dyn RemoteStore>,
    records: Arc<dyn RecordRepository>,
    queue: Arc<RetryQueue>,
    ceiling: usize,
}

impl BatchUploader {
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `ceiling` is zero or above the provider's
    /// maximum batch size.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        records: Arc<dyn RecordRepository>,
        queue: Arc<RetryQueue>,
        ceiling: usize,
    ) -> Result<Self> {
        let max = remote.max_batch_operations();
        if ceiling == 0 || ceiling > max {
            return Err(SyncError::InvalidConfig(format!(
                "batch ceiling {} must be between 1 and the provider maximum of {}",
                ceiling, max
            )));
        }

        Ok(Self {
            remote,
            records,
            queue,
            ceiling,
        })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Upload `pending` to the tenant's collections.
    ///
    /// Remote failures never surface as errors; only local store failures do.
    #[instrument(skip(self, pending, cancel), fields(tenant_id = %tenant_id, records = pending.len()))]
    pub async fn upload(
        &self,
        tenant_id: &TenantId,
        mut pending: Vec<SyncableRecord>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        pending.retain(|record| {
            let visible = record.is_visible_to(tenant_id);
            if !visible {
                warn!(local_id = record.local_id, "Skipping record owned by another tenant");
            }
            visible
        });
        if pending.is_empty() {
            debug!("Nothing to upload");
            return Ok(result);
        }

        pending.sort_by_key(|r| (Reverse(PriorityClass::for_kind(r.kind())), r.local_id));
        let total = pending.len();
        let groups = total.div_ceil(self.ceiling);

        for (index, group) in pending.chunks(self.ceiling).enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                result.skipped = (total - index * self.ceiling) as u64;
                info!(
                    committed_groups = index,
                    skipped = result.skipped,
                    "Upload cancelled between batches"
                );
                break;
            }

            debug!(group = index + 1, groups, size = group.len(), "Committing batch");
            self.upload_group(tenant_id, group.to_vec(), &mut result).await?;
        }

        info!(
            succeeded = result.succeeded,
            queued = result.queued,
            batches_committed = result.batches_committed,
            batches_failed = result.batches_failed,
            "Upload finished"
        );
        Ok(result)
    }

    async fn upload_group(
        &self,
        tenant_id: &TenantId,
        group: Vec<SyncableRecord>,
        result: &mut BatchResult,
    ) -> Result<()> {
        let mut prepared = Vec::with_capacity(group.len());
        let mut writes = Vec::with_capacity(group.len());

        for mut record in group {
            let operation = if record.last_sync_timestamp == 0 {
                QueueOperation::Create
            } else {
                QueueOperation::Update
            };

            if record.remote_id.is_none() {
                record.remote_id = Some(Uuid::new_v4().to_string());
            }
            let claimed = record.claim(tenant_id);
            if claimed || record.sync_status != SyncStatus::PendingUpload || !record.is_persisted() {
                record.mark_pending_upload();
                record = self.records.save(record).await?;
            }

            writes.push(BatchWrite {
                collection: self
                    .remote
                    .collection(tenant_id, record.kind().collection_name()),
                id: record.remote_id.clone(),
                fields: record.payload.to_remote_fields()?,
            });
            prepared.push((record, operation));
        }

        match self.remote.commit_batch(writes).await {
            Ok(commit) => {
                result.batches_committed += 1;
                let mut items = commit.results.into_iter();

                for (record, operation) in prepared {
                    match items.next() {
                        Some(item) if item.is_ok() => {
                            match item.id.or_else(|| record.remote_id.clone()) {
                                Some(remote_id) => {
                                    self.confirm(tenant_id, record, remote_id, commit.committed_at, result)
                                        .await?
                                }
                                None => {
                                    self.defer(
                                        tenant_id,
                                        record,
                                        operation,
                                        "commit returned no document id",
                                        result,
                                    )
                                    .await?
                                }
                            }
                        }
                        Some(item) => {
                            let error = item.error.unwrap_or_else(|| "write rejected".to_string());
                            self.defer(tenant_id, record, operation, &error, result).await?;
                        }
                        None => {
                            self.defer(
                                tenant_id,
                                record,
                                operation,
                                "commit returned no result for write",
                                result,
                            )
                            .await?
                        }
                    }
                }
            }
            Err(e) => {
                result.batches_failed += 1;
                warn!(error = %e, records = prepared.len(), "Batch commit failed, queueing records");

                let error = e.to_string();
                for (record, operation) in prepared {
                    self.defer(tenant_id, record, operation, &error, result).await?;
                }
            }
        }

        Ok(())
    }

    async fn confirm(
        &self,
        tenant_id: &TenantId,
        mut record: SyncableRecord,
        remote_id: String,
        committed_at: Timestamp,
        result: &mut BatchResult,
    ) -> Result<()> {
        record.mark_synced(tenant_id, remote_id.clone(), committed_at);
        let record = self.records.save(record).await?;
        self.queue
            .resolve_superseded(record.kind(), record.local_id)
            .await?;

        result.succeeded += 1;
        result.assigned_ids.insert(record.local_id, remote_id);
        Ok(())
    }

    async fn defer(
        &self,
        tenant_id: &TenantId,
        record: SyncableRecord,
        operation: QueueOperation,
        error: &str,
        result: &mut BatchResult,
    ) -> Result<()> {
        self.queue
            .enqueue(
                tenant_id,
                record.kind(),
                record.local_id,
                operation,
                record.remote_id.clone(),
                Some(record.payload.clone()),
                error,
            )
            .await?;

        result.queued += 1;
        Ok(())
    }
}
