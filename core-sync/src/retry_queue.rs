//! # Retry Queue
//!
//! Durable store of uploads that failed and must be replayed later.
//!
//! ## Overview
//!
//! Every failed create, update or delete becomes a [`QueueEntry`] holding a
//! snapshot of the payload taken at enqueue time. Draining replays entries
//! one at a time through a [`QueueExecutor`]:
//!
//! - **Ordering**: higher [`PriorityClass`] first, then oldest first
//! - **Retry budget**: `max_retries` comes from the entity's priority class
//!   (critical 5, normal 3, low 2)
//! - **Backoff**: each attempt waits `min(initial * multiplier^(n-1), max)`
//!   where `n` is the attempt number
//! - **One attempt per entry per drain**: a failing entry stays queued for the
//!   next drain until its budget is exhausted, then it is reported and removed
//! - **Tenant scope**: every entry remembers the tenant it was queued for and
//!   a drain only replays the entries of the tenant it was asked to drain
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{BackoffPolicy, QueueOperation, RetryQueue};
//!
//! let queue = RetryQueue::new(pool, clock, BackoffPolicy::default()).await?;
//! queue
//!     .enqueue(&tenant_id, EntityKind::Team, 7, QueueOperation::Update, Some(remote_id), Some(payload), "timeout")
//!     .await?;
//!
//! let result = queue.drain(&tenant_id, &executor).await?;
//! for failure in &result.permanently_failed {
//!     eprintln!("gave up on {}", failure.local_id);
//! }
//! ```

use async_trait::async_trait;
use bridge_traits::{Clock, TenantId, Timestamp};
use core_records::{EntityKind, RecordPayload};
use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

// ============================================================================
// Identifiers and Classification
// ============================================================================

/// Type-safe queue entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidEntryId(s.to_string()))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote write a queue entry replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOperation {
    Create,
    Update,
    Delete,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Create => "create",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(QueueOperation::Create),
            "update" => Ok(QueueOperation::Update),
            "delete" => Ok(QueueOperation::Delete),
            _ => Err(SyncError::InvalidStatus(format!("unknown queue operation: {}", s))),
        }
    }
}

/// Static importance of an entity kind.
///
/// Drives both the retry budget and the drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    Low = 0,
    Normal = 1,
    Critical = 2,
}

impl PriorityClass {
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Team => PriorityClass::Critical,
            EntityKind::Game => PriorityClass::Normal,
            EntityKind::Event => PriorityClass::Low,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            PriorityClass::Critical => 5,
            PriorityClass::Normal => 3,
            PriorityClass::Low => 2,
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(i: i32) -> Result<Self> {
        match i {
            0 => Ok(PriorityClass::Low),
            1 => Ok(PriorityClass::Normal),
            2 => Ok(PriorityClass::Critical),
            _ => Err(SyncError::InvalidStatus(format!("invalid priority: {}", i))),
        }
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff applied before each replay attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// A policy that never waits. Used by tests and by hosts that schedule
    /// drains themselves.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Delay before attempt number `attempt` (1-based).
    ///
    /// Attempt 1 waits `initial_delay`; each later attempt multiplies the
    /// previous delay, never exceeding `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (initial_ms * self.multiplier.powi(exponent)).min(max_ms);

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(300))
    }
}

// ============================================================================
// Queue Entry
// ============================================================================

/// One deferred remote write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    /// Tenant whose collections the write targets
    pub tenant_id: TenantId,
    pub entity_kind: EntityKind,
    pub local_id: i64,
    pub operation: QueueOperation,
    pub remote_id: Option<String>,
    /// Copy of the record payload when the entry was created or last refreshed.
    /// Deletes carry none.
    pub payload: Option<RecordPayload>,
    pub priority: PriorityClass,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: Timestamp,
    pub last_attempt_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl QueueEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        entity_kind: EntityKind,
        local_id: i64,
        operation: QueueOperation,
        remote_id: Option<String>,
        payload: Option<RecordPayload>,
        error: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        let priority = PriorityClass::for_kind(entity_kind);
        Self {
            id: QueueEntryId::new(),
            tenant_id,
            entity_kind,
            local_id,
            operation,
            remote_id,
            payload,
            priority,
            retry_count: 0,
            max_retries: priority.max_retries(),
            created_at: now,
            last_attempt_at: None,
            last_error: Some(error.into()),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Take a newer snapshot of the same record without resetting the budget.
    fn refresh(
        &mut self,
        operation: QueueOperation,
        remote_id: Option<String>,
        payload: Option<RecordPayload>,
        error: String,
    ) {
        if self.operation != QueueOperation::Create {
            self.operation = operation;
        }
        if remote_id.is_some() {
            self.remote_id = remote_id;
        }
        self.payload = payload;
        self.last_error = Some(error);
    }
}

/// An entry removed after exhausting its retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermanentFailure {
    pub entry_id: QueueEntryId,
    pub entity_kind: EntityKind,
    pub local_id: i64,
    pub operation: QueueOperation,
    pub attempts: u32,
    pub error: String,
}

impl PermanentFailure {
    fn from_entry(entry: &QueueEntry) -> Self {
        Self {
            entry_id: entry.id,
            entity_kind: entry.entity_kind,
            local_id: entry.local_id,
            operation: entry.operation,
            attempts: entry.retry_count,
            error: entry
                .last_error
                .clone()
                .unwrap_or_else(|| "retry budget exhausted".to_string()),
        }
    }

    pub fn to_error(&self) -> SyncError {
        SyncError::PermanentOperationFailure {
            entity_kind: self.entity_kind.to_string(),
            operation: self.operation.to_string(),
            local_id: self.local_id,
            attempts: self.attempts,
            message: self.error.clone(),
        }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainResult {
    /// Executor invocations made
    pub attempted: u64,
    pub succeeded: u64,
    /// Failed but still within budget; left for the next drain
    pub retried: u64,
    pub permanently_failed: Vec<PermanentFailure>,
}

impl DrainResult {
    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.permanently_failed.is_empty()
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries resolved plus entries still queued
    pub total: u64,
    /// Entries currently queued
    pub pending: u64,
    /// Entries replayed successfully since the queue was opened
    pub completed: u64,
    /// Entries discarded after exhausting their budget since the queue was opened
    pub failed: u64,
}

impl QueueStats {
    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Performs the remote write for one queue entry.
#[async_trait]
pub trait QueueExecutor: Send + Sync {
    /// Replay `entry`. Any error counts as a failed attempt.
    async fn execute(&self, entry: &QueueEntry) -> Result<()>;
}

// ============================================================================
// Repository
// ============================================================================

/// Repository trait for queue persistence
#[async_trait]
pub trait RetryQueueRepository: Send + Sync {
    async fn insert(&self, entry: &QueueEntry) -> Result<()>;

    async fn update(&self, entry: &QueueEntry) -> Result<()>;

    /// Returns `false` when the entry no longer exists
    async fn delete(&self, id: QueueEntryId) -> Result<bool>;

    async fn find_by_id(&self, id: QueueEntryId) -> Result<Option<QueueEntry>>;

    /// Entries targeting one local record
    async fn find_for_record(&self, kind: EntityKind, local_id: i64) -> Result<Vec<QueueEntry>>;

    /// Entries in drain order, restricted to one tenant when `tenant_id` is set
    async fn list_ordered(&self, tenant_id: Option<&TenantId>) -> Result<Vec<QueueEntry>>;

    /// Remote ids of `kind` with a queued delete for `tenant_id`
    async fn pending_delete_remote_ids(
        &self,
        tenant_id: &TenantId,
        kind: EntityKind,
    ) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;
}

const SELECT_COLUMNS: &str = "SELECT id, tenant_id, entity_kind, local_id, operation, remote_id, payload, \
     priority, retry_count, max_retries, created_at, last_attempt_at, last_error FROM retry_queue";

/// SQLite implementation of RetryQueueRepository
pub struct SqliteRetryQueueRepository {
    pool: SqlitePool,
}

impl SqliteRetryQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize database table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retry_queue (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                local_id INTEGER NOT NULL,
                operation TEXT NOT NULL,
                remote_id TEXT,
                payload TEXT,
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_attempt_at INTEGER,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_retry_queue_drain_order
            ON retry_queue(tenant_id, priority DESC, created_at ASC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_retry_queue_record
            ON retry_queue(entity_kind, local_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<QueueEntry> {
        let kind: String = row.get("entity_kind");
        let payload = row
            .get::<Option<String>, _>("payload")
            .map(|json| RecordPayload::from_json(&json))
            .transpose()?;

        Ok(QueueEntry {
            id: QueueEntryId::from_string(&row.get::<String, _>("id"))?,
            tenant_id: TenantId::new(row.get::<String, _>("tenant_id")),
            entity_kind: EntityKind::from_str(&kind)?,
            local_id: row.get("local_id"),
            operation: row.get::<String, _>("operation").parse()?,
            remote_id: row.get("remote_id"),
            payload,
            priority: PriorityClass::from_i32(row.get("priority"))?,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
            created_at: row.get("created_at"),
            last_attempt_at: row.get("last_attempt_at"),
            last_error: row.get("last_error"),
        })
    }

    fn encode_payload(entry: &QueueEntry) -> Result<Option<String>> {
        Ok(entry
            .payload
            .as_ref()
            .map(RecordPayload::to_json)
            .transpose()?)
    }
}

#[async_trait]
impl RetryQueueRepository for SqliteRetryQueueRepository {
    async fn insert(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retry_queue (
                id, tenant_id, entity_kind, local_id, operation, remote_id, payload, priority,
                retry_count, max_retries, created_at, last_attempt_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.as_str())
        .bind(entry.tenant_id.as_str())
        .bind(entry.entity_kind.as_str())
        .bind(entry.local_id)
        .bind(entry.operation.as_str())
        .bind(&entry.remote_id)
        .bind(Self::encode_payload(entry)?)
        .bind(entry.priority.as_i32())
        .bind(entry.retry_count as i64)
        .bind(entry.max_retries as i64)
        .bind(entry.created_at)
        .bind(entry.last_attempt_at)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE retry_queue SET
                operation = ?,
                remote_id = ?,
                payload = ?,
                retry_count = ?,
                last_attempt_at = ?,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(entry.operation.as_str())
        .bind(&entry.remote_id)
        .bind(Self::encode_payload(entry)?)
        .bind(entry.retry_count as i64)
        .bind(entry.last_attempt_at)
        .bind(&entry.last_error)
        .bind(entry.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: QueueEntryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM retry_queue WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: QueueEntryId) -> Result<Option<QueueEntry>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_for_record(&self, kind: EntityKind, local_id: i64) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "{} WHERE entity_kind = ? AND local_id = ? ORDER BY created_at ASC, rowid ASC",
            SELECT_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(local_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_ordered(&self, tenant_id: Option<&TenantId>) -> Result<Vec<QueueEntry>> {
        let rows = match tenant_id {
            Some(tenant_id) => sqlx::query(&format!(
                "{} WHERE tenant_id = ? ORDER BY priority DESC, created_at ASC, rowid ASC",
                SELECT_COLUMNS
            ))
            .bind(tenant_id.as_str())
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(&format!(
                "{} ORDER BY priority DESC, created_at ASC, rowid ASC",
                SELECT_COLUMNS
            ))
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn pending_delete_remote_ids(
        &self,
        tenant_id: &TenantId,
        kind: EntityKind,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT remote_id FROM retry_queue \
             WHERE tenant_id = ? AND entity_kind = ? AND operation = 'delete' \
             AND remote_id IS NOT NULL",
        )
        .bind(tenant_id.as_str())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(ids)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retry_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count as u64)
    }
}

// ============================================================================
// Retry Queue
// ============================================================================

/// Priority-ordered retry queue with exponential backoff
pub struct RetryQueue {
    repository: Arc<dyn RetryQueueRepository>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    event_bus: Option<EventBus>,
    drain_lock: Mutex<()>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl RetryQueue {
    /// Open the queue stored in `pool`, creating its table if needed.
    pub async fn new(pool: SqlitePool, clock: Arc<dyn Clock>, backoff: BackoffPolicy) -> Result<Self> {
        let repository = SqliteRetryQueueRepository::new(pool);
        repository.initialize().await?;

        Ok(Self::with_repository(Arc::new(repository), clock, backoff))
    }

    pub fn with_repository(
        repository: Arc<dyn RetryQueueRepository>,
        clock: Arc<dyn Clock>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            repository,
            clock,
            backoff,
            event_bus: None,
            drain_lock: Mutex::new(()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Queue(event)).ok();
        }
    }

    /// Record a failed write for later replay.
    ///
    /// A record keeps at most one pending create/update entry: enqueuing it
    /// again refreshes the snapshot and error but keeps the spent budget. A
    /// delete supersedes any pending create/update for the same record.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, tenant_id, payload, error), fields(entity_kind = %kind))]
    pub async fn enqueue(
        &self,
        tenant_id: &TenantId,
        kind: EntityKind,
        local_id: i64,
        operation: QueueOperation,
        remote_id: Option<String>,
        payload: Option<RecordPayload>,
        error: impl Into<String> + Send,
    ) -> Result<QueueEntryId> {
        let error = error.into();
        let existing = self.repository.find_for_record(kind, local_id).await?;

        if operation == QueueOperation::Delete {
            for stale in existing.iter().filter(|e| e.operation != QueueOperation::Delete) {
                self.repository.delete(stale.id).await?;
                debug!(entry_id = %stale.id, "Dropped pending write superseded by delete");
            }
        } else if let Some(mut entry) = existing
            .into_iter()
            .find(|e| e.operation != QueueOperation::Delete)
        {
            entry.refresh(operation, remote_id, payload, error.clone());
            self.repository.update(&entry).await?;

            info!(
                entry_id = %entry.id,
                local_id,
                retry_count = entry.retry_count,
                "Refreshed queued write"
            );
            self.emit(QueueEvent::EntryEnqueued {
                entry_id: entry.id.to_string(),
                entity_kind: kind.to_string(),
                operation: entry.operation.to_string(),
                error,
            });
            return Ok(entry.id);
        }

        let entry = QueueEntry::new(
            tenant_id.clone(),
            kind,
            local_id,
            operation,
            remote_id,
            payload,
            error.clone(),
            self.clock.now_millis(),
        );
        self.repository.insert(&entry).await?;

        info!(
            entry_id = %entry.id,
            local_id,
            operation = %operation,
            max_retries = entry.max_retries,
            "Queued operation for retry"
        );
        self.emit(QueueEvent::EntryEnqueued {
            entry_id: entry.id.to_string(),
            entity_kind: kind.to_string(),
            operation: operation.to_string(),
            error,
        });

        Ok(entry.id)
    }

    /// Replay every entry queued for `tenant_id` once, waiting for any drain
    /// already running. Other tenants' entries are left untouched.
    pub async fn drain(&self, tenant_id: &TenantId, executor: &dyn QueueExecutor) -> Result<DrainResult> {
        let _guard = self.drain_lock.lock().await;
        self.drain_entries(tenant_id, executor, None).await
    }

    /// Like [`drain`](Self::drain) but returns `None` immediately when
    /// another drain holds the queue.
    ///
    /// `cancel` is checked before each entry and during backoff waits. An
    /// executor call that has started always runs to completion and its
    /// result is recorded.
    pub async fn try_drain(
        &self,
        tenant_id: &TenantId,
        executor: &dyn QueueExecutor,
        cancel: &CancellationToken,
    ) -> Result<Option<DrainResult>> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already running, skipping");
            return Ok(None);
        };
        self.drain_entries(tenant_id, executor, Some(cancel)).await.map(Some)
    }

    async fn drain_entries(
        &self,
        tenant_id: &TenantId,
        executor: &dyn QueueExecutor,
        cancel: Option<&CancellationToken>,
    ) -> Result<DrainResult> {
        let entries = self.repository.list_ordered(Some(tenant_id)).await?;
        let mut result = DrainResult::default();

        if entries.is_empty() {
            return Ok(result);
        }
        debug!(entries = entries.len(), "Draining retry queue");

        for mut entry in entries {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!("Drain cancelled before next entry");
                break;
            }

            if entry.is_exhausted() {
                self.discard(&entry, &mut result).await?;
                continue;
            }

            entry.retry_count += 1;
            let delay = self.backoff.delay_for_attempt(entry.retry_count);
            if !delay.is_zero() {
                debug!(
                    entry_id = %entry.id,
                    retry_count = entry.retry_count,
                    backoff_ms = delay.as_millis() as u64,
                    "Waiting before retry"
                );
                match cancel {
                    Some(cancel) => {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!(entry_id = %entry.id, "Drain cancelled during backoff");
                                break;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => tokio::time::sleep(delay).await,
                }
            }

            entry.last_attempt_at = Some(self.clock.now_millis());
            result.attempted += 1;

            match executor.execute(&entry).await {
                Ok(()) => {
                    self.repository.delete(entry.id).await?;
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    result.succeeded += 1;

                    info!(
                        entry_id = %entry.id,
                        entity_kind = %entry.entity_kind,
                        retry_count = entry.retry_count,
                        "Queued operation replayed"
                    );
                    self.emit(QueueEvent::EntryCompleted {
                        entry_id: entry.id.to_string(),
                        entity_kind: entry.entity_kind.to_string(),
                        operation: entry.operation.to_string(),
                    });
                }
                Err(err) => {
                    entry.last_error = Some(err.to_string());

                    if entry.is_exhausted() {
                        self.discard(&entry, &mut result).await?;
                        continue;
                    }

                    self.repository.update(&entry).await?;
                    result.retried += 1;

                    warn!(
                        entry_id = %entry.id,
                        entity_kind = %entry.entity_kind,
                        retry_count = entry.retry_count,
                        max_retries = entry.max_retries,
                        error = %err,
                        "Replay failed, will retry"
                    );
                    self.emit(QueueEvent::EntryRetried {
                        entry_id: entry.id.to_string(),
                        entity_kind: entry.entity_kind.to_string(),
                        retry_count: entry.retry_count,
                        max_retries: entry.max_retries,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            attempted = result.attempted,
            succeeded = result.succeeded,
            retried = result.retried,
            permanently_failed = result.permanently_failed.len(),
            "Retry queue drained"
        );

        Ok(result)
    }

    async fn discard(&self, entry: &QueueEntry, result: &mut DrainResult) -> Result<()> {
        self.repository.delete(entry.id).await?;
        self.failed.fetch_add(1, Ordering::Relaxed);

        let failure = PermanentFailure::from_entry(entry);
        warn!(
            entry_id = %entry.id,
            entity_kind = %entry.entity_kind,
            local_id = entry.local_id,
            operation = %entry.operation,
            retry_count = entry.retry_count,
            error = %failure.error,
            "Operation failed permanently after max retries"
        );
        self.emit(QueueEvent::EntryPermanentlyFailed {
            entry_id: entry.id.to_string(),
            entity_kind: entry.entity_kind.to_string(),
            operation: entry.operation.to_string(),
            retry_count: entry.retry_count,
            error: failure.error.clone(),
        });

        result.permanently_failed.push(failure);
        Ok(())
    }

    /// Get queue statistics
    pub async fn stats(&self) -> Result<QueueStats> {
        let pending = self.repository.count().await?;
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        Ok(QueueStats {
            total: pending + completed + failed,
            pending,
            completed,
            failed,
        })
    }

    /// Every queued entry in drain order, across tenants
    pub async fn entries(&self) -> Result<Vec<QueueEntry>> {
        self.repository.list_ordered(None).await
    }

    /// Entries a drain for `tenant_id` would replay, in order
    pub async fn entries_for(&self, tenant_id: &TenantId) -> Result<Vec<QueueEntry>> {
        self.repository.list_ordered(Some(tenant_id)).await
    }

    pub async fn find_by_id(&self, id: QueueEntryId) -> Result<Option<QueueEntry>> {
        self.repository.find_by_id(id).await
    }

    /// Drop queued creates/updates of a record whose newer version was just
    /// committed. They count as completed.
    pub async fn resolve_superseded(&self, kind: EntityKind, local_id: i64) -> Result<u64> {
        let mut resolved = 0;
        for entry in self.repository.find_for_record(kind, local_id).await? {
            if entry.operation == QueueOperation::Delete {
                continue;
            }
            if self.repository.delete(entry.id).await? {
                resolved += 1;
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!(entry_id = %entry.id, local_id, "Queued write superseded by upload");
                self.emit(QueueEvent::EntryCompleted {
                    entry_id: entry.id.to_string(),
                    entity_kind: kind.to_string(),
                    operation: entry.operation.to_string(),
                });
            }
        }
        Ok(resolved)
    }

    /// Forget queued creates/updates of a record that was deleted before it
    /// ever reached the remote store.
    pub async fn discard_pending_writes(&self, kind: EntityKind, local_id: i64) -> Result<u64> {
        let mut discarded = 0;
        for entry in self.repository.find_for_record(kind, local_id).await? {
            if entry.operation != QueueOperation::Delete && self.repository.delete(entry.id).await? {
                discarded += 1;
            }
        }
        Ok(discarded)
    }

    /// Remote ids of `kind` awaiting a queued delete in `tenant_id`'s collections
    pub async fn pending_delete_remote_ids(
        &self,
        tenant_id: &TenantId,
        kind: EntityKind,
    ) -> Result<HashSet<String>> {
        Ok(self
            .repository
            .pending_delete_remote_ids(tenant_id, kind)
            .await?
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use core_records::db::create_test_pool;
    use core_records::Team;
    use mockall::{mock, Sequence};

    mock! {
        pub Executor {}

        #[async_trait]
        impl QueueExecutor for Executor {
            async fn execute(&self, entry: &QueueEntry) -> Result<()>;
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("coach-1")
    }

    async fn setup() -> (RetryQueue, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let queue = RetryQueue::new(pool, clock.clone(), BackoffPolicy::immediate())
            .await
            .unwrap();
        (queue, clock)
    }

    fn team(name: &str) -> Option<RecordPayload> {
        Some(RecordPayload::Team(Team {
            name: name.to_string(),
            season: None,
            coach: None,
        }))
    }

    #[test]
    fn test_priority_classes() {
        assert_eq!(PriorityClass::for_kind(EntityKind::Team), PriorityClass::Critical);
        assert_eq!(PriorityClass::for_kind(EntityKind::Game), PriorityClass::Normal);
        assert_eq!(PriorityClass::for_kind(EntityKind::Event), PriorityClass::Low);

        assert_eq!(PriorityClass::Critical.max_retries(), 5);
        assert_eq!(PriorityClass::Normal.max_retries(), 3);
        assert_eq!(PriorityClass::Low.max_retries(), 2);

        assert!(PriorityClass::Critical > PriorityClass::Low);
        assert_eq!(PriorityClass::from_i32(2).unwrap(), PriorityClass::Critical);
        assert!(PriorityClass::from_i32(7).is_err());
    }

    #[test]
    fn test_backoff_growth() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u128> = (1..=4)
            .map(|n| policy.delay_for_attempt(n).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);

        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(256_000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(300));
    }

    #[test]
    fn test_immediate_backoff_never_waits() {
        let policy = BackoffPolicy::immediate();
        assert!(policy.delay_for_attempt(1).is_zero());
        assert!(policy.delay_for_attempt(50).is_zero());
    }

    #[test]
    fn test_queue_operation_parse() {
        assert_eq!("delete".parse::<QueueOperation>().unwrap(), QueueOperation::Delete);
        assert!("upsert".parse::<QueueOperation>().is_err());
        assert_eq!(QueueOperation::Create.to_string(), "create");
    }

    #[test]
    fn test_entry_budget_from_kind() {
        let entry = QueueEntry::new(tenant(), EntityKind::Event, 3, QueueOperation::Create, None, None, "boom", 5);
        assert_eq!(entry.priority, PriorityClass::Low);
        assert_eq!(entry.max_retries, 2);
        assert_eq!(entry.remaining_attempts(), 2);
        assert!(!entry.is_exhausted());
    }

    #[tokio::test]
    async fn test_enqueue_persists_snapshot() {
        let (queue, _clock) = setup().await;

        let id = queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Create, Some("doc-1".into()), team("Falcons"), "offline")
            .await
            .unwrap();

        let entry = queue.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(entry.payload, team("Falcons"));
        assert_eq!(entry.remote_id.as_deref(), Some("doc-1"));
        assert_eq!(entry.max_retries, 5);
        assert_eq!(entry.created_at, 10_000);
        assert_eq!(entry.last_error.as_deref(), Some("offline"));
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_enqueue_same_record_refreshes_entry() {
        let (queue, _clock) = setup().await;

        let first = queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Create, Some("doc-1".into()), team("Falcons"), "offline")
            .await
            .unwrap();
        let second = queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Update, Some("doc-1".into()), team("Hawks"), "timeout")
            .await
            .unwrap();

        assert_eq!(first, second);
        let entries = queue.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, QueueOperation::Create);
        assert_eq!(entries[0].payload, team("Hawks"));
        assert_eq!(entries[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_delete_supersedes_pending_write() {
        let (queue, _clock) = setup().await;

        queue
            .enqueue(&tenant(), EntityKind::Game, 4, QueueOperation::Update, Some("doc-4".into()), None, "offline")
            .await
            .unwrap();
        queue
            .enqueue(&tenant(), EntityKind::Game, 4, QueueOperation::Delete, Some("doc-4".into()), None, "offline")
            .await
            .unwrap();

        let entries = queue.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, QueueOperation::Delete);

        let deletes = queue.pending_delete_remote_ids(&tenant(), EntityKind::Game).await.unwrap();
        assert!(deletes.contains("doc-4"));
        assert!(queue
            .pending_delete_remote_ids(&tenant(), EntityKind::Team)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_resolve_superseded_counts_completed() {
        let (queue, _clock) = setup().await;
        queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Update, Some("doc-1".into()), team("Old"), "offline")
            .await
            .unwrap();
        queue
            .enqueue(&tenant(), EntityKind::Team, 2, QueueOperation::Delete, Some("doc-2".into()), None, "offline")
            .await
            .unwrap();

        assert_eq!(queue.resolve_superseded(EntityKind::Team, 1).await.unwrap(), 1);
        assert_eq!(queue.resolve_superseded(EntityKind::Team, 2).await.unwrap(), 0);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn test_drain_success_removes_entry() {
        let (queue, _clock) = setup().await;
        queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Create, Some("doc-1".into()), team("Falcons"), "offline")
            .await
            .unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|entry| entry.retry_count == 1 && entry.last_attempt_at == Some(10_000))
            .times(1)
            .returning(|_| Ok(()));

        let result = queue.drain(&tenant(), &executor).await.unwrap();
        assert_eq!(result.attempted, 1);
        assert_eq!(result.succeeded, 1);
        assert!(result.permanently_failed.is_empty());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_after_max_attempts() {
        let (queue, _clock) = setup().await;
        let id = queue
            .enqueue(&tenant(), EntityKind::Game, 9, QueueOperation::Update, Some("doc-9".into()), None, "offline")
            .await
            .unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .times(3)
            .returning(|_| Err(SyncError::TransientRemote("unavailable".to_string())));

        for attempt in 1..=2u32 {
            let result = queue.drain(&tenant(), &executor).await.unwrap();
            assert_eq!(result.attempted, 1);
            assert_eq!(result.retried, 1);
            assert!(result.permanently_failed.is_empty());

            let entry = queue.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(entry.retry_count, attempt);
            assert!(entry.last_error.unwrap().contains("unavailable"));
        }

        let result = queue.drain(&tenant(), &executor).await.unwrap();
        assert_eq!(result.retried, 0);
        assert_eq!(result.permanently_failed.len(), 1);
        let failure = &result.permanently_failed[0];
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.local_id, 9);
        assert!(matches!(
            failure.to_error(),
            SyncError::PermanentOperationFailure { attempts: 3, .. }
        ));

        assert!(queue.find_by_id(id).await.unwrap().is_none());

        // A fourth drain must not reach the executor.
        let result = queue.drain(&tenant(), &executor).await.unwrap();
        assert!(result.is_empty());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_critical_drained_before_low() {
        let (queue, clock) = setup().await;

        queue
            .enqueue(&tenant(), EntityKind::Event, 2, QueueOperation::Create, Some("doc-e".into()), None, "offline")
            .await
            .unwrap();
        clock.advance(1_000);
        queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Create, Some("doc-t".into()), team("Falcons"), "offline")
            .await
            .unwrap();

        let mut seq = Sequence::new();
        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|entry| entry.entity_kind == EntityKind::Team)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        executor
            .expect_execute()
            .withf(|entry| entry.entity_kind == EntityKind::Event)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let result = queue.drain(&tenant(), &executor).await.unwrap();
        assert_eq!(result.succeeded, 2);
    }

    #[tokio::test]
    async fn test_same_priority_drains_oldest_first() {
        let (queue, clock) = setup().await;

        queue
            .enqueue(&tenant(), EntityKind::Game, 1, QueueOperation::Update, Some("older".into()), None, "x")
            .await
            .unwrap();
        clock.advance(5);
        queue
            .enqueue(&tenant(), EntityKind::Game, 2, QueueOperation::Update, Some("newer".into()), None, "x")
            .await
            .unwrap();

        let entries = queue.entries().await.unwrap();
        let order: Vec<_> = entries.iter().map(|e| e.local_id).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_exhausted_entry_discarded_without_attempt() {
        let pool = create_test_pool().await.unwrap();
        let repository = SqliteRetryQueueRepository::new(pool);
        repository.initialize().await.unwrap();

        let mut entry = QueueEntry::new(tenant(), EntityKind::Event, 5, QueueOperation::Update, None, None, "gone", 1);
        entry.retry_count = entry.max_retries;
        repository.insert(&entry).await.unwrap();

        let queue = RetryQueue::with_repository(
            Arc::new(repository),
            Arc::new(ManualClock::new(1)),
            BackoffPolicy::immediate(),
        );

        let mut executor = MockExecutor::new();
        executor.expect_execute().never();

        let result = queue.drain(&tenant(), &executor).await.unwrap();
        assert_eq!(result.attempted, 0);
        assert_eq!(result.permanently_failed.len(), 1);
        assert_eq!(queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_drain_emits_queue_events() {
        let (queue, _clock) = setup().await;
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let queue = queue.with_event_bus(bus);

        queue
            .enqueue(&tenant(), EntityKind::Event, 3, QueueOperation::Create, None, None, "offline")
            .await
            .unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .returning(|_| Err(SyncError::TransientRemote("offline".to_string())));
        queue.drain(&tenant(), &executor).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Queue(QueueEvent::EntryEnqueued { .. })
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Queue(QueueEvent::EntryRetried { retry_count: 1, max_retries: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_drain_replays_only_requested_tenant() {
        let (queue, _clock) = setup().await;
        let other = TenantId::new("coach-2");

        queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Create, Some("doc-1".into()), team("Falcons"), "offline")
            .await
            .unwrap();
        queue
            .enqueue(&other, EntityKind::Team, 2, QueueOperation::Delete, Some("doc-2".into()), None, "offline")
            .await
            .unwrap();

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|entry| entry.tenant_id == TenantId::new("coach-2"))
            .times(1)
            .returning(|_| Ok(()));

        let result = queue.drain(&other, &executor).await.unwrap();
        assert_eq!(result.succeeded, 1);

        let remaining = queue.entries().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tenant_id, tenant());
        assert_eq!(queue.entries_for(&other).await.unwrap().len(), 0);

        assert!(queue
            .pending_delete_remote_ids(&tenant(), EntityKind::Team)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_between_entries_not_during_replay() {
        let (queue, clock) = setup().await;
        queue
            .enqueue(&tenant(), EntityKind::Team, 1, QueueOperation::Create, Some("doc-1".into()), team("Falcons"), "offline")
            .await
            .unwrap();
        clock.advance(1);
        queue
            .enqueue(&tenant(), EntityKind::Team, 2, QueueOperation::Create, Some("doc-2".into()), team("Hawks"), "offline")
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|entry| entry.local_id == 1)
            .times(1)
            .returning(move |_| {
                stop.cancel();
                Ok(())
            });

        let result = queue
            .try_drain(&tenant(), &executor, &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.attempted, 1);
        assert_eq!(result.succeeded, 1);

        let remaining = queue.entries().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_id, 2);
        assert_eq!(remaining[0].retry_count, 0);
    }
}
