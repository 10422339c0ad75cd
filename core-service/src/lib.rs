//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges from a [`CoreConfig`] (remote
//! store, identity provider, clock) into the local record store and the sync
//! engine, and exposes the surface a host application drives:
//!
//! - `start_manual_sync` with a progress callback
//! - `queue_statistics` and `last_sync_timestamp`
//! - an event stream of auth, sync and queue events
//! - an optional background task that drains the retry queue between sessions
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//! use core_sync::SyncConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/roster.db")
//!     .remote_store(remote)
//!     .identity_provider(sessions)
//!     .background_drain_interval(Duration::from_secs(60))
//!     .build()?;
//!
//! let core = CoreService::bootstrap(config, SyncConfig::default()).await?;
//! let summary = core.start_manual_sync(|p| println!("{}", p.phase)).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::Timestamp;
use core_records::db::{create_pool, DatabaseConfig};
use core_records::{EntityKind, RecordRepository, SqliteRecordRepository};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{QueueStats, SyncConfig, SyncOrchestrator, SyncProgress, SyncSummary};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to the running background drain task.
struct BackgroundDrain {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    event_bus: EventBus,
    records: Arc<dyn RecordRepository>,
    orchestrator: Arc<SyncOrchestrator>,
    background_drain: Mutex<Option<BackgroundDrain>>,
}

impl CoreService {
    /// Open the local store and assemble the sync engine.
    ///
    /// Starts the background drain when `config` sets an interval.
    pub async fn bootstrap(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::from_url(config.database.url())).await?;
        let records: Arc<dyn RecordRepository> =
            Arc::new(SqliteRecordRepository::new(pool.clone(), config.clock.clone()));
        let event_bus = EventBus::new(config.event_buffer_size);

        let orchestrator = SyncOrchestrator::new(
            sync_config,
            records.clone(),
            config.remote_store.clone(),
            config.identity_provider.clone(),
            config.clock.clone(),
            event_bus.clone(),
            pool,
        )
        .await?;

        let service = Self {
            event_bus,
            records,
            orchestrator: Arc::new(orchestrator),
            background_drain: Mutex::new(None),
        };

        if let Some(interval) = config.background_drain_interval {
            service.start_background_drain(interval).await;
        }

        info!(database = ?config.database, "Core service ready");
        Ok(service)
    }

    /// Local record store, for creating and editing records offline.
    pub fn records(&self) -> Arc<dyn RecordRepository> {
        Arc::clone(&self.records)
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Stream of every event published from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub async fn start_manual_sync<F>(&self, progress: F) -> Result<SyncSummary>
    where
        F: Fn(SyncProgress) + Send + Sync,
    {
        Ok(self.orchestrator.start_manual_sync(progress).await?)
    }

    pub async fn cancel_sync(&self) -> bool {
        self.orchestrator.cancel_sync().await
    }

    pub async fn queue_statistics(&self) -> Result<QueueStats> {
        Ok(self.orchestrator.queue_statistics().await?)
    }

    pub async fn last_sync_timestamp(&self) -> Result<Timestamp> {
        Ok(self.orchestrator.last_sync_timestamp().await?)
    }

    pub async fn sync_history(&self, limit: u32) -> Result<Vec<SyncSummary>> {
        Ok(self.orchestrator.history(limit).await?)
    }

    /// Delete a record locally and queue its remote deletion.
    pub async fn delete_record(&self, kind: EntityKind, local_id: i64) -> Result<bool> {
        Ok(self.orchestrator.record_local_deletion(kind, local_id).await?)
    }

    /// Spawn a task that drains the retry queue every `interval`.
    ///
    /// Ticks are skipped while a sync session runs. Returns `false` if the
    /// task is already running.
    pub async fn start_background_drain(&self, interval: Duration) -> bool {
        let mut slot = self.background_drain.lock().await;
        if slot.is_some() {
            return false;
        }

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let orchestrator = Arc::clone(&self.orchestrator);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match orchestrator.drain_queue_until(&token).await {
                    Ok(Some(drained)) if !drained.is_empty() => {
                        info!(
                            attempted = drained.attempted,
                            succeeded = drained.succeeded,
                            permanently_failed = drained.permanently_failed.len(),
                            "Background drain finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Background drain failed"),
                }
            }

            debug!("Background drain stopped");
        });

        info!(interval_ms = interval.as_millis() as u64, "Background drain started");
        *slot = Some(BackgroundDrain {
            cancellation_token,
            handle,
        });
        true
    }

    /// Stop the background drain task and wait for it to exit.
    pub async fn stop_background_drain(&self) {
        let Some(drain) = self.background_drain.lock().await.take() else {
            return;
        };
        drain.cancellation_token.cancel();
        if let Err(e) = drain.handle.await {
            warn!(error = %e, "Background drain task ended abnormally");
        }
    }

    pub async fn is_background_drain_running(&self) -> bool {
        self.background_drain.lock().await.is_some()
    }

    /// Stop background work and cancel any running session.
    pub async fn shutdown(&self) {
        self.stop_background_drain().await;
        self.orchestrator.cancel_sync().await;
        info!("Core service shut down");
    }
}
