//! # Sync Orchestrator
//!
//! Runs one sync session at a time through the pull, resolve, push and drain
//! phases.
//!
//! ## Overview
//!
//! The `SyncOrchestrator` owns every engine component and wires them to the
//! host's collaborators:
//! - Asks the `IdentityProvider` for the signed-in tenant
//! - Pulls documents changed since the tenant's last successful sync
//! - Feeds local and pulled records through the `ConflictResolver`
//! - Hands pending records to the `BatchUploader`
//! - Drains the `RetryQueue` once with a `RemoteQueueExecutor`
//! - Persists the last-sync timestamp and session history
//! - Reports every phase transition to the progress callback and the `EventBus`
//!
//! ## Workflow
//!
//! 1. `Idle → Pulling`: refuse when signed out (`Idle → Aborted`)
//! 2. Query each entity kind with `UpdatedAfter(last_sync)`, skipping
//!    documents whose deletion is still queued
//! 3. `Pulling → Resolving`: resolve every pulled document and every local
//!    record; a pull error aborts here after the partial results are applied
//! 4. `Resolving → Pushing`: upload every `local` / `pending_upload` record
//! 5. `Pushing → Draining`: replay the tenant's retry queue entries once
//! 6. `Draining → Idle`: advance the last-sync timestamp and emit the summary
//!
//! Cancellation is checked before entering `Resolving`, `Pushing` and
//! `Draining`, and between upload groups.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncOrchestrator};
//!
//! let orchestrator = SyncOrchestrator::new(
//!     SyncConfig::default(),
//!     records,
//!     remote,
//!     identity,
//!     clock,
//!     event_bus,
//!     pool,
//! )
//! .await?;
//!
//! let summary = orchestrator
//!     .start_manual_sync(|progress| println!("{} -> {}", progress.from, progress.phase))
//!     .await?;
//! println!("synced {}, queued {}", summary.synced(), summary.queued);
//! ```

use crate::{
    batch_uploader::{BatchUploader, DEFAULT_BATCH_CEILING},
    conflict_resolver::{ConflictResolver, RemoteRecord, Resolution, ResolutionScope},
    executor::RemoteQueueExecutor,
    job::{SyncOutcome, SyncPhase, SyncProgress, SyncSession, SyncSessionId, SyncSummary},
    repository::{SqliteSyncStateRepository, SyncStateRepository},
    retry_queue::{BackoffPolicy, DrainResult, QueueOperation, QueueStats, RetryQueue},
    Result, SyncError,
};
use bridge_traits::{Clock, IdentityProvider, RemotePredicate, RemoteStore, TenantId, Timestamp};
use core_records::{EntityKind, RecordRepository};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::logging::redact_tenant;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Sync orchestrator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum records per batch commit. Must not exceed the remote
    /// provider's advertised maximum.
    pub batch_ceiling: usize,

    /// Delay schedule applied before each retry queue replay
    pub backoff: BackoffPolicy,

    /// Whether phase transitions are also published on the event bus
    pub emit_progress_events: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_ceiling: DEFAULT_BATCH_CEILING,
            backoff: BackoffPolicy::default(),
            emit_progress_events: true,
        }
    }
}

impl SyncConfig {
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero ceiling, a backoff multiplier below
    /// 1.0, or an initial delay above the maximum delay.
    pub fn validate(&self) -> Result<()> {
        if self.batch_ceiling == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_ceiling must be greater than zero".to_string(),
            ));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if self.backoff.initial_delay > self.backoff.max_delay {
            return Err(SyncError::InvalidConfig(format!(
                "initial backoff delay {:?} exceeds maximum {:?}",
                self.backoff.initial_delay, self.backoff.max_delay
            )));
        }
        Ok(())
    }
}

/// Active session tracking
struct ActiveSync {
    session_id: SyncSessionId,
    cancellation_token: CancellationToken,
}

/// Result of the pull phase
struct PullOutcome {
    records: Vec<RemoteRecord>,
    error: Option<SyncError>,
}

/// Orchestrates sync sessions for the signed-in tenant
pub struct SyncOrchestrator {
    config: SyncConfig,
    records: Arc<dyn RecordRepository>,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    queue: Arc<RetryQueue>,
    uploader: BatchUploader,
    resolver: ConflictResolver,
    state: Arc<dyn SyncStateRepository>,

    /// The running session, if any
    active: Mutex<Option<ActiveSync>>,

    /// Held by a session or an out-of-session drain while it writes sync
    /// metadata; at most one of them runs at a time
    writer: Mutex<()>,
}

impl SyncOrchestrator {
    /// Create a new sync orchestrator
    ///
    /// The retry queue and sync state tables are created in `pool` if they do
    /// not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `config` is invalid
    /// - The batch ceiling exceeds the remote provider's maximum
    /// - The queue or state tables cannot be created
    pub async fn new(
        config: SyncConfig,
        records: Arc<dyn RecordRepository>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        pool: SqlitePool,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(
            RetryQueue::new(pool.clone(), clock.clone(), config.backoff)
                .await?
                .with_event_bus(event_bus.clone()),
        );

        let state = SqliteSyncStateRepository::new(pool);
        state.initialize().await?;

        let uploader = BatchUploader::new(
            remote.clone(),
            records.clone(),
            queue.clone(),
            config.batch_ceiling,
        )?;
        let resolver = ConflictResolver::new(records.clone());

        info!(
            batch_ceiling = config.batch_ceiling,
            provider_max = remote.max_batch_operations(),
            "Sync orchestrator ready"
        );

        Ok(Self {
            config,
            records,
            remote,
            identity,
            clock,
            event_bus,
            queue,
            uploader,
            resolver,
            state: Arc::new(state),
            active: Mutex::new(None),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Run one full sync session for the signed-in tenant.
    ///
    /// `progress` is called once per phase transition. The returned summary
    /// reports how the session ended; a pull failure or a cancellation still
    /// returns `Ok` with an `Aborted` / `Cancelled` outcome.
    ///
    /// A background drain that is replaying the queue is allowed to finish
    /// before the session starts pulling.
    ///
    /// # Errors
    ///
    /// - `SyncInProgress` if another session is running
    /// - `Unauthenticated` if no tenant is signed in
    /// - `LocalStore` / `Database` if the local store fails mid-session
    #[instrument(skip(self, progress))]
    pub async fn start_manual_sync<F>(&self, progress: F) -> Result<SyncSummary>
    where
        F: Fn(SyncProgress) + Send + Sync,
    {
        let mut session = SyncSession::new(self.clock.now_millis());
        let cancel = CancellationToken::new();

        {
            let mut active = self.active.lock().await;
            if let Some(running) = active.as_ref() {
                warn!(session_id = %running.session_id, "Sync trigger refused");
                return Err(SyncError::SyncInProgress {
                    session_id: running.session_id.to_string(),
                });
            }
            *active = Some(ActiveSync {
                session_id: session.id,
                cancellation_token: cancel.clone(),
            });
        }

        let result = {
            let _writer = self.writer.lock().await;
            self.run_session(&mut session, &cancel, &progress).await
        };

        self.active.lock().await.take();

        match result {
            Ok(outcome) => Ok(self.finish(session, outcome).await),
            Err(e) => {
                let phase = session.phase;
                error!(session_id = %session.id, phase = %phase, error = %e, "Sync session aborted");

                if !phase.is_terminal() {
                    self.advance(&mut session, SyncPhase::Aborted, &progress).ok();
                }
                self.finish(
                    session,
                    SyncOutcome::Aborted {
                        phase,
                        reason: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Request cancellation of the running session.
    ///
    /// Returns `false` if no session is running. The session stops at the next
    /// phase boundary or between upload groups.
    pub async fn cancel_sync(&self) -> bool {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(running) => {
                info!(session_id = %running.session_id, "Cancelling sync session");
                running.cancellation_token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_sync_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn active_session(&self) -> Option<SyncSessionId> {
        self.active.lock().await.as_ref().map(|a| a.session_id)
    }

    /// Snapshot of the retry queue counters
    pub async fn queue_statistics(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// Last successful sync of the signed-in tenant, `0` if it never synced
    /// or nobody is signed in.
    pub async fn last_sync_timestamp(&self) -> Result<Timestamp> {
        match self.identity.current_tenant_id().await {
            Some(tenant_id) => self.state.last_sync_at(&tenant_id).await,
            None => Ok(0),
        }
    }

    /// Most recent sessions of the signed-in tenant, newest first
    pub async fn history(&self, limit: u32) -> Result<Vec<SyncSummary>> {
        let tenant_id = self
            .identity
            .current_tenant_id()
            .await
            .ok_or(SyncError::Unauthenticated)?;
        self.state.history(&tenant_id, limit).await
    }

    /// Delete a local record and queue the remote delete.
    ///
    /// Deletes win over concurrent remote edits: while the delete is queued,
    /// pulled documents with the same remote id are ignored. Returns `false`
    /// if no record of `kind` with `local_id` exists.
    #[instrument(skip(self), fields(entity_kind = %kind))]
    pub async fn record_local_deletion(&self, kind: EntityKind, local_id: i64) -> Result<bool> {
        let Some(record) = self.records.find_by_id(local_id).await? else {
            return Ok(false);
        };
        if record.kind() != kind {
            debug!(actual = %record.kind(), "Deletion target has a different kind");
            return Ok(false);
        }

        // The remote copy lives in the owner's collections
        let owner = match (&record.remote_id, record.tenant_id.clone()) {
            (None, _) => None,
            (Some(_), Some(owner)) => Some(owner),
            (Some(_), None) => Some(
                self.identity
                    .current_tenant_id()
                    .await
                    .ok_or(SyncError::Unauthenticated)?,
            ),
        };

        self.records.delete(local_id).await?;

        match (record.remote_id, owner) {
            (Some(remote_id), Some(owner)) => {
                self.queue
                    .enqueue(
                        &owner,
                        kind,
                        local_id,
                        QueueOperation::Delete,
                        Some(remote_id),
                        None,
                        "deleted locally",
                    )
                    .await?;
            }
            _ => {
                self.queue.discard_pending_writes(kind, local_id).await?;
            }
        }

        info!(local_id, "Recorded local deletion");
        Ok(true)
    }

    /// Replay the signed-in tenant's retry queue entries outside a session.
    ///
    /// Returns `None` without touching the queue when a session is running,
    /// nobody is signed in, or another drain holds the queue. A session
    /// triggered while this drain runs waits for it to finish.
    pub async fn drain_queue(&self) -> Result<Option<DrainResult>> {
        self.drain_queue_until(&CancellationToken::new()).await
    }

    /// [`drain_queue`](Self::drain_queue) that stops early once `cancel`
    /// fires. A remote write already in flight finishes first.
    pub async fn drain_queue_until(&self, cancel: &CancellationToken) -> Result<Option<DrainResult>> {
        if self.is_sync_active().await {
            debug!("Skipping drain while a sync session is active");
            return Ok(None);
        }
        let Ok(_writer) = self.writer.try_lock() else {
            debug!("Skipping drain while another writer holds the sync state");
            return Ok(None);
        };
        let Some(tenant_id) = self.identity.current_tenant_id().await else {
            return Ok(None);
        };

        self.queue.try_drain(&tenant_id, &self.executor(), cancel).await
    }

    fn executor(&self) -> RemoteQueueExecutor {
        RemoteQueueExecutor::new(self.remote.clone(), self.records.clone())
    }

    // ------------------------------------------------------------------------
    // Session phases
    // ------------------------------------------------------------------------

    async fn run_session<F>(
        &self,
        session: &mut SyncSession,
        cancel: &CancellationToken,
        progress: &F,
    ) -> Result<SyncOutcome>
    where
        F: Fn(SyncProgress) + Send + Sync,
    {
        let tenant_id = self
            .identity
            .current_tenant_id()
            .await
            .ok_or(SyncError::Unauthenticated)?;
        session.tenant_id = Some(tenant_id.to_string());

        let last_sync = self.state.last_sync_at(&tenant_id).await?;
        let pull_started_at = self.clock.now_millis();

        info!(
            session_id = %session.id,
            tenant_id = %redact_tenant(tenant_id.as_str()),
            last_sync,
            "Sync session started"
        );
        self.advance(session, SyncPhase::Pulling, progress)?;
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                session_id: session.id.to_string(),
                tenant_id: tenant_id.to_string(),
            }))
            .ok();

        let pull = self.pull(&tenant_id, last_sync, session).await?;

        if let Some(outcome) = self.check_cancelled(session, cancel, progress)? {
            return Ok(outcome);
        }
        self.advance(session, SyncPhase::Resolving, progress)?;
        let scope = ResolutionScope::new(tenant_id.clone(), last_sync, pull_started_at);
        self.resolve(&pull.records, &scope, session).await?;

        if let Some(e) = pull.error {
            warn!(session_id = %session.id, error = %e, "Pull failed, aborting after applying partial results");
            self.advance(session, SyncPhase::Aborted, progress)?;
            return Ok(SyncOutcome::Aborted {
                phase: SyncPhase::Pulling,
                reason: e.to_string(),
            });
        }

        if let Some(outcome) = self.check_cancelled(session, cancel, progress)? {
            return Ok(outcome);
        }
        self.advance(session, SyncPhase::Pushing, progress)?;
        let pending = self.records.find_pending_sync(&tenant_id, None).await?;
        let upload = self.uploader.upload(&tenant_id, pending, cancel).await?;
        session.uploaded += upload.succeeded;
        session.queued += upload.queued;

        if let Some(outcome) = self.check_cancelled(session, cancel, progress)? {
            return Ok(outcome);
        }
        self.advance(session, SyncPhase::Draining, progress)?;
        let drain = self.queue.drain(&tenant_id, &self.executor()).await?;
        session.drained += drain.succeeded;
        session.permanently_failed.extend(drain.permanently_failed);

        self.state.set_last_sync_at(&tenant_id, pull_started_at).await?;
        self.advance(session, SyncPhase::Idle, progress)?;

        Ok(SyncOutcome::Completed)
    }

    async fn pull(
        &self,
        tenant_id: &TenantId,
        last_sync: Timestamp,
        session: &mut SyncSession,
    ) -> Result<PullOutcome> {
        let predicate = if last_sync == 0 {
            RemotePredicate::All
        } else {
            RemotePredicate::UpdatedAfter(last_sync)
        };

        let mut outcome = PullOutcome {
            records: Vec::new(),
            error: None,
        };

        for kind in EntityKind::ALL {
            let collection = self.remote.collection(tenant_id, kind.collection_name());
            let deleted = self.queue.pending_delete_remote_ids(tenant_id, kind).await?;

            let documents = match self.remote.query(&collection, &predicate).await {
                Ok(documents) => documents,
                Err(e) => {
                    warn!(entity_kind = %kind, error = %e, "Pull query failed");
                    outcome.error = Some(e.into());
                    break;
                }
            };

            debug!(entity_kind = %kind, count = documents.len(), "Pulled documents");
            for document in &documents {
                if deleted.contains(&document.id) {
                    debug!(remote_id = %document.id, "Ignoring document with a queued delete");
                    continue;
                }
                match RemoteRecord::from_document(kind, document) {
                    Ok(record) => {
                        session.pulled += 1;
                        outcome.records.push(record);
                    }
                    Err(e) => {
                        warn!(entity_kind = %kind, remote_id = %document.id, error = %e, "Skipping malformed document");
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn resolve(
        &self,
        pulled: &[RemoteRecord],
        scope: &ResolutionScope,
        session: &mut SyncSession,
    ) -> Result<()> {
        let mut matched = HashSet::new();

        for remote in pulled {
            let local = self
                .records
                .find_by_remote_id(&scope.tenant_id, &remote.remote_id)
                .await?
                .filter(|record| record.kind() == remote.kind());
            if let Some(record) = &local {
                matched.insert(record.local_id);
            }

            let outcome = self.resolver.resolve(local, Some(remote), scope).await?;
            if outcome.resolution == Resolution::AdoptRemote {
                session.adopted += 1;
            }
        }

        for kind in EntityKind::ALL {
            for record in self.records.find_visible(&scope.tenant_id, kind).await? {
                if matched.contains(&record.local_id) {
                    continue;
                }
                self.resolver.resolve(Some(record), None, scope).await?;
            }
        }

        debug!(pulled = pulled.len(), adopted = session.adopted, "Resolution finished");
        Ok(())
    }

    fn check_cancelled<F>(
        &self,
        session: &mut SyncSession,
        cancel: &CancellationToken,
        progress: &F,
    ) -> Result<Option<SyncOutcome>>
    where
        F: Fn(SyncProgress) + Send + Sync,
    {
        if !cancel.is_cancelled() {
            return Ok(None);
        }

        let phase = session.phase;
        info!(session_id = %session.id, phase = %phase, "Sync cancelled between phases");
        self.advance(session, SyncPhase::Cancelled, progress)?;
        Ok(Some(SyncOutcome::Cancelled { phase }))
    }

    fn advance<F>(&self, session: &mut SyncSession, to: SyncPhase, progress: &F) -> Result<()>
    where
        F: Fn(SyncProgress) + Send + Sync,
    {
        let from = session.transition(to)?;
        debug!(session_id = %session.id, from = %from, to = %to, "Phase transition");

        if self.config.emit_progress_events {
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::PhaseChanged {
                    session_id: session.id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                }))
                .ok();
        }
        progress(session.progress(from));
        Ok(())
    }

    /// Close the session: record it and publish the terminal event.
    async fn finish(&self, session: SyncSession, outcome: SyncOutcome) -> SyncSummary {
        let summary = session.finish(outcome, self.clock.now_millis());

        if summary.tenant_id.is_some() {
            if let Err(e) = self.state.record_session(&summary).await {
                warn!(session_id = %summary.session_id, error = %e, "Failed to record sync session");
            }
        }

        let event = match &summary.outcome {
            SyncOutcome::Completed => {
                let queued = match self.queue.stats().await {
                    Ok(stats) => stats.pending,
                    Err(e) => {
                        warn!(error = %e, "Failed to read queue statistics");
                        summary.queued
                    }
                };
                info!(
                    session_id = %summary.session_id,
                    pulled = summary.pulled,
                    synced = summary.synced(),
                    queued,
                    permanently_failed = summary.permanently_failed.len(),
                    duration_ms = summary.duration_ms(),
                    "Sync session completed"
                );
                SyncEvent::Completed {
                    session_id: summary.session_id.to_string(),
                    pulled: summary.pulled,
                    synced: summary.synced(),
                    queued,
                    permanently_failed: summary.permanently_failed.len() as u64,
                    duration_ms: summary.duration_ms(),
                }
            }
            SyncOutcome::Aborted { phase, reason } => SyncEvent::Aborted {
                session_id: summary.session_id.to_string(),
                phase: phase.to_string(),
                message: reason.clone(),
                recoverable: summary.tenant_id.is_some(),
            },
            SyncOutcome::Cancelled { phase } => SyncEvent::Cancelled {
                session_id: summary.session_id.to_string(),
                phase: phase.to_string(),
            },
        };
        self.event_bus.emit(CoreEvent::Sync(event)).ok();

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{FixedIdentity, ManualClock};
    use core_records::db::create_test_pool;
    use core_records::{RecordPayload, SqliteRecordRepository, SyncStatus, SyncableRecord, Team};
    use provider_memory::InMemoryRemoteStore;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Harness {
        orchestrator: SyncOrchestrator,
        records: Arc<SqliteRecordRepository>,
        remote: Arc<InMemoryRemoteStore>,
        clock: Arc<ManualClock>,
        event_bus: EventBus,
    }

    async fn harness(identity: FixedIdentity) -> Harness {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let records = Arc::new(SqliteRecordRepository::new(pool.clone(), clock.clone()));
        let remote = Arc::new(InMemoryRemoteStore::new().with_clock(clock.clone()));
        let event_bus = EventBus::new(256);

        let config = SyncConfig {
            backoff: BackoffPolicy::immediate(),
            ..SyncConfig::default()
        };
        let orchestrator = SyncOrchestrator::new(
            config,
            records.clone(),
            remote.clone(),
            Arc::new(identity),
            clock.clone(),
            event_bus.clone(),
            pool,
        )
        .await
        .unwrap();

        Harness {
            orchestrator,
            records,
            remote,
            clock,
            event_bus,
        }
    }

    fn team(name: &str) -> RecordPayload {
        RecordPayload::Team(Team {
            name: name.to_string(),
            season: None,
            coach: None,
        })
    }

    #[test]
    fn test_config_validation() {
        assert!(SyncConfig::default().validate().is_ok());

        let zero = SyncConfig {
            batch_ceiling: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(zero.validate(), Err(SyncError::InvalidConfig(_))));

        let shrinking = SyncConfig {
            backoff: BackoffPolicy::new(Duration::from_secs(1), 0.5, Duration::from_secs(300)),
            ..SyncConfig::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = SyncConfig {
            backoff: BackoffPolicy::new(Duration::from_secs(600), 2.0, Duration::from_secs(300)),
            ..SyncConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[tokio::test]
    async fn test_ceiling_above_provider_maximum_rejected() {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let records = Arc::new(SqliteRecordRepository::new(pool.clone(), clock.clone()));

        let result = SyncOrchestrator::new(
            SyncConfig {
                batch_ceiling: 501,
                ..SyncConfig::default()
            },
            records,
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(FixedIdentity::signed_in("t1")),
            clock,
            EventBus::new(16),
            pool,
        )
        .await;

        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unauthenticated_aborts_from_idle() {
        let h = harness(FixedIdentity::signed_out()).await;
        let phases = StdMutex::new(Vec::new());

        let err = h
            .orchestrator
            .start_manual_sync(|p| phases.lock().unwrap().push((p.from, p.phase)))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Unauthenticated));
        assert_eq!(
            *phases.lock().unwrap(),
            vec![(SyncPhase::Idle, SyncPhase::Aborted)]
        );
        assert_eq!(h.remote.query_count().await, 0);
        assert!(h.orchestrator.queue_statistics().await.unwrap().is_empty());
        assert!(!h.orchestrator.is_sync_active().await);
    }

    #[tokio::test]
    async fn test_completed_session_walks_every_phase() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        h.records
            .save(SyncableRecord::new_local(team("Falcons"), 500))
            .await
            .unwrap();
        let phases = StdMutex::new(Vec::new());

        let summary = h
            .orchestrator
            .start_manual_sync(|p| phases.lock().unwrap().push(p.phase))
            .await
            .unwrap();

        assert!(summary.outcome.is_completed());
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.tenant_id.as_deref(), Some("t1"));
        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                SyncPhase::Pulling,
                SyncPhase::Resolving,
                SyncPhase::Pushing,
                SyncPhase::Draining,
                SyncPhase::Idle,
            ]
        );
        assert_eq!(h.orchestrator.last_sync_timestamp().await.unwrap(), 1_000);
        assert_eq!(h.orchestrator.history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_failure_keeps_last_sync() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        h.orchestrator.start_manual_sync(|_| {}).await.unwrap();
        assert_eq!(h.orchestrator.last_sync_timestamp().await.unwrap(), 1_000);

        h.clock.advance(5_000);
        h.remote.set_offline(true).await;
        let summary = h.orchestrator.start_manual_sync(|_| {}).await.unwrap();

        assert!(matches!(
            summary.outcome,
            SyncOutcome::Aborted {
                phase: SyncPhase::Pulling,
                ..
            }
        ));
        assert_eq!(h.orchestrator.last_sync_timestamp().await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_local_deletion_queues_remote_delete() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        let record = h
            .records
            .save(SyncableRecord::new_local(team("Falcons"), 500))
            .await
            .unwrap();
        h.orchestrator.start_manual_sync(|_| {}).await.unwrap();
        let synced = h.records.find_by_id(record.local_id).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);

        h.remote.set_offline(true).await;
        assert!(h
            .orchestrator
            .record_local_deletion(EntityKind::Team, record.local_id)
            .await
            .unwrap());
        assert!(h.records.find_by_id(record.local_id).await.unwrap().is_none());
        assert_eq!(h.orchestrator.queue_statistics().await.unwrap().pending, 1);
        let entries = h.orchestrator.queue().entries().await.unwrap();
        assert_eq!(entries[0].tenant_id, TenantId::new("t1"));

        h.remote.set_offline(false).await;
        let drained = h.orchestrator.drain_queue().await.unwrap().unwrap();
        assert_eq!(drained.succeeded, 1);
        assert!(h
            .remote
            .documents(&TenantId::new("t1"), "teams")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_drain_yields_to_holder_of_writer_lock() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        h.orchestrator
            .queue()
            .enqueue(&TenantId::new("t1"), EntityKind::Team, 1, QueueOperation::Delete, Some("doc-1".into()), None, "offline")
            .await
            .unwrap();

        {
            let _held = h.orchestrator.writer.lock().await;
            assert!(h.orchestrator.drain_queue().await.unwrap().is_none());
        }
        assert_eq!(h.orchestrator.queue_statistics().await.unwrap().pending, 1);

        let drained = h.orchestrator.drain_queue().await.unwrap().unwrap();
        assert_eq!(drained.succeeded, 1);
    }

    #[tokio::test]
    async fn test_cancelled_drain_leaves_queue_untouched() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        h.orchestrator
            .queue()
            .enqueue(&TenantId::new("t1"), EntityKind::Team, 1, QueueOperation::Delete, Some("doc-1".into()), None, "offline")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let drained = h.orchestrator.drain_queue_until(&cancel).await.unwrap().unwrap();
        assert_eq!(drained.attempted, 0);

        let entries = h.orchestrator.queue().entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_deleting_unknown_record_is_noop() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        assert!(!h
            .orchestrator
            .record_local_deletion(EntityKind::Game, 42)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_events_published_for_session() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        let mut rx = h.event_bus.subscribe();

        h.orchestrator.start_manual_sync(|_| {}).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Sync(sync) = event {
                events.push(sync);
            }
        }

        assert!(matches!(events.first(), Some(SyncEvent::PhaseChanged { .. })));
        assert!(events.iter().any(|e| matches!(e, SyncEvent::Started { .. })));
        assert!(matches!(events.last(), Some(SyncEvent::Completed { .. })));
        let transitions = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::PhaseChanged { .. }))
            .count();
        assert_eq!(transitions, 5);
    }

    #[tokio::test]
    async fn test_cancel_without_session() {
        let h = harness(FixedIdentity::signed_in("t1")).await;
        assert!(!h.orchestrator.cancel_sync().await);
        assert!(h.orchestrator.active_session().await.is_none());
    }
}
