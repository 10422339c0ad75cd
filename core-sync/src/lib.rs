//! # Sync Engine
//!
//! Offline-first synchronization of local records with a tenant-scoped remote
//! document store.
//!
//! ## Overview
//!
//! Records are created and edited locally without connectivity. A sync
//! session reconciles them with the remote store:
//! - Pulls remote documents changed since the last successful sync
//! - Decides per record whether the local or remote version wins
//! - Uploads pending records in bounded atomic batches
//! - Defers failed writes to a durable, priority-ordered retry queue
//!
//! ## Components
//!
//! - **Conflict Resolver** (`conflict_resolver`): local-wins / remote-wins decision per record
//! - **Batch Uploader** (`batch_uploader`): splits uploads into commits under the provider ceiling
//! - **Retry Queue** (`retry_queue`): SQLite-backed queue with priorities and exponential backoff
//! - **Queue Executor** (`executor`): replays queue entries against the remote store
//! - **Session State Machine** (`job`): phases and summaries of a sync session
//! - **Repository** (`repository`): last-sync timestamps and session history
//! - **Sync Orchestrator** (`coordinator`): runs sessions end to end

pub mod batch_uploader;
pub mod conflict_resolver;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod job;
pub mod repository;
pub mod retry_queue;

pub use batch_uploader::{BatchResult, BatchUploader, DEFAULT_BATCH_CEILING};
pub use conflict_resolver::{
    decide, ConflictResolver, RemoteRecord, Resolution, ResolutionOutcome, ResolutionScope,
};
pub use coordinator::{SyncConfig, SyncOrchestrator};
pub use error::{Result, SyncError};
pub use executor::RemoteQueueExecutor;
pub use job::{SyncOutcome, SyncPhase, SyncProgress, SyncSession, SyncSessionId, SyncSummary};
pub use repository::{SqliteSyncStateRepository, SyncStateRepository};
pub use retry_queue::{
    BackoffPolicy, DrainResult, PermanentFailure, PriorityClass, QueueEntry, QueueEntryId,
    QueueExecutor, QueueOperation, QueueStats, RetryQueue, RetryQueueRepository,
    SqliteRetryQueueRepository,
};
