//! Conflict Resolution for Sync Operations
//!
//! Decides, for one record, whether the local or the remote version survives.
//!
//! ## Overview
//!
//! The policy is whole-record last-write-wins relative to the last successful
//! sync (local wins if modified since last sync):
//!
//! - **Remote only**: the document is adopted as a new local record
//! - **Local only**: nothing to compare; the record keeps its status and is
//!   uploaded later if it needs to be
//! - **Both**: the local version wins when it was edited after the last sync,
//!   is still `local`/`pending_upload`, or has never been uploaded. Otherwise
//!   the remote version overwrites it. An exact tie goes to the remote.
//!
//! No field-level merge is attempted.
//!
//! `last_sync` is a device-clock instant, so an adopted record is stamped with
//! the device-clock instant its pull started rather than the server's commit
//! time. Server clock skew can then never make an untouched record look
//! locally edited.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::conflict_resolver::{ConflictResolver, RemoteRecord};
//!
//! let resolver = ConflictResolver::new(records.clone());
//! let remote = RemoteRecord::from_document(EntityKind::Team, &document)?;
//! let scope = ResolutionScope::new(tenant_id.clone(), last_sync, pull_started_at);
//! let local = records.find_by_remote_id(&tenant_id, &remote.remote_id).await?;
//! let outcome = resolver.resolve(local, Some(&remote), &scope).await?;
//! ```

use crate::error::Result;
use bridge_traits::{RemoteDocument, TenantId, Timestamp};
use core_records::{EntityKind, RecordPayload, RecordRepository, SyncStatus, SyncableRecord};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A pulled remote document decoded into a typed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub remote_id: String,
    pub payload: RecordPayload,
    /// Server timestamp of the last write
    pub updated_at: Timestamp,
}

impl RemoteRecord {
    pub fn new(remote_id: impl Into<String>, payload: RecordPayload, updated_at: Timestamp) -> Self {
        Self {
            remote_id: remote_id.into(),
            payload,
            updated_at,
        }
    }

    pub fn from_document(kind: EntityKind, document: &RemoteDocument) -> Result<Self> {
        let payload = RecordPayload::from_remote_fields(kind, &document.fields)?;
        Ok(Self::new(document.id.clone(), payload, document.updated_at))
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }
}

/// Decision for one local/remote pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Remote version overwrites (or creates) the local record
    AdoptRemote,
    /// Local version wins and is queued for upload
    MarkForUpload,
    /// No remote counterpart; local state left as-is
    LocalOnly,
    /// Remote wins but the local record already matches it
    InSync,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::AdoptRemote => "adopt_remote",
            Resolution::MarkForUpload => "mark_for_upload",
            Resolution::LocalOnly => "local_only",
            Resolution::InSync => "in_sync",
        }
    }
}

/// Values shared by every resolution of one sync session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionScope {
    /// Tenant the pulled documents belong to
    pub tenant_id: TenantId,
    /// Tenant's last successful sync (device clock)
    pub last_sync: Timestamp,
    /// Device-clock instant the pull started; stamped on adopted records
    pub pulled_at: Timestamp,
}

impl ResolutionScope {
    pub fn new(tenant_id: TenantId, last_sync: Timestamp, pulled_at: Timestamp) -> Self {
        Self {
            tenant_id,
            last_sync,
            pulled_at,
        }
    }
}

/// Result of resolving and applying one pair
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub resolution: Resolution,
    /// The local record after the resolution was applied, if one exists
    pub record: Option<SyncableRecord>,
}

/// Pure decision function; touches no storage.
pub fn decide(
    local: Option<&SyncableRecord>,
    remote: Option<&RemoteRecord>,
    last_sync: Timestamp,
) -> Resolution {
    let (local, remote) = match (local, remote) {
        (None, Some(_)) => return Resolution::AdoptRemote,
        (_, None) => return Resolution::LocalOnly,
        (Some(local), Some(remote)) => (local, remote),
    };

    let local_wins = local.updated_at > last_sync
        || local.sync_status != SyncStatus::Synced
        || local.remote_id.is_none();

    if local_wins {
        return Resolution::MarkForUpload;
    }

    if local.payload == remote.payload && local.remote_id.as_deref() == Some(&remote.remote_id) {
        Resolution::InSync
    } else {
        Resolution::AdoptRemote
    }
}

/// Applies conflict decisions to the local record store
pub struct ConflictResolver {
    records: Arc<dyn RecordRepository>,
}

impl ConflictResolver {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }

    /// Decide and persist the outcome for one pair.
    ///
    /// Performs no network I/O.
    #[instrument(skip_all, fields(
        local_id = local.as_ref().map(|r| r.local_id),
        remote_id = remote.map(|r| r.remote_id.as_str())
    ))]
    pub async fn resolve(
        &self,
        local: Option<SyncableRecord>,
        remote: Option<&RemoteRecord>,
        scope: &ResolutionScope,
    ) -> Result<ResolutionOutcome> {
        let resolution = decide(local.as_ref(), remote, scope.last_sync);
        debug!(resolution = resolution.as_str(), "Resolved record");

        let record = match (resolution, local, remote) {
            (Resolution::AdoptRemote, Some(mut record), Some(remote)) => {
                record.adopt_remote(
                    scope.tenant_id.clone(),
                    remote.payload.clone(),
                    remote.remote_id.clone(),
                    remote.updated_at,
                    scope.pulled_at,
                );
                Some(self.records.save(record).await?)
            }
            (Resolution::AdoptRemote, None, Some(remote)) => {
                let record = SyncableRecord::from_remote(
                    scope.tenant_id.clone(),
                    remote.payload.clone(),
                    remote.remote_id.clone(),
                    remote.updated_at,
                    scope.pulled_at,
                );
                Some(self.records.save(record).await?)
            }
            (Resolution::MarkForUpload, Some(mut record), _) => {
                if record.sync_status != SyncStatus::PendingUpload {
                    record.mark_pending_upload();
                    record = self.records.save(record).await?;
                }
                Some(record)
            }
            (_, local, _) => local,
        };

        Ok(ResolutionOutcome { resolution, record })
    }
}
