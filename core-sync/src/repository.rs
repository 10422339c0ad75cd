//! # Sync State Repository
//!
//! Persists what the engine must remember between sessions.
//!
//! ## Overview
//!
//! - The last successful sync timestamp of every tenant, which bounds the next
//!   incremental pull
//! - A history of finished sessions, newest first

use crate::job::{SyncOutcome, SyncSessionId, SyncSummary};
use crate::retry_queue::PermanentFailure;
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{TenantId, Timestamp};
use sqlx::{FromRow, SqlitePool};

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for per-tenant sync state
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Last successful sync of `tenant_id`, or `0` if it never synced
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn last_sync_at(&self, tenant_id: &TenantId) -> Result<Timestamp>;

    /// Store the last successful sync of `tenant_id`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn set_last_sync_at(&self, tenant_id: &TenantId, timestamp: Timestamp) -> Result<()>;

    /// Append a finished session to the history
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn record_session(&self, summary: &SyncSummary) -> Result<()>;

    /// Most recent sessions of a tenant, newest first
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - The tenant to get history for
    /// * `limit` - Maximum number of sessions to return
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn history(&self, tenant_id: &TenantId, limit: u32) -> Result<Vec<SyncSummary>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncStateRepository
pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize database tables if they don't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                tenant_id TEXT PRIMARY KEY,
                last_sync_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_sessions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT,
                outcome TEXT NOT NULL,
                outcome_detail TEXT NOT NULL,
                pulled INTEGER NOT NULL,
                adopted INTEGER NOT NULL,
                uploaded INTEGER NOT NULL,
                queued INTEGER NOT NULL,
                drained INTEGER NOT NULL,
                failures TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_sessions_tenant
            ON sync_sessions(tenant_id, started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

/// Database row representation of a finished session
#[derive(Debug, FromRow)]
struct SyncSessionRow {
    id: String,
    tenant_id: Option<String>,
    outcome_detail: String,
    pulled: i64,
    adopted: i64,
    uploaded: i64,
    queued: i64,
    drained: i64,
    failures: String,
    started_at: i64,
    finished_at: i64,
}

impl TryFrom<SyncSessionRow> for SyncSummary {
    type Error = SyncError;

    fn try_from(row: SyncSessionRow) -> Result<Self> {
        let outcome: SyncOutcome = serde_json::from_str(&row.outcome_detail)?;
        let permanently_failed: Vec<PermanentFailure> = serde_json::from_str(&row.failures)?;

        Ok(SyncSummary {
            session_id: SyncSessionId::from_string(&row.id)?,
            tenant_id: row.tenant_id,
            outcome,
            pulled: row.pulled as u64,
            adopted: row.adopted as u64,
            uploaded: row.uploaded as u64,
            queued: row.queued as u64,
            drained: row.drained as u64,
            permanently_failed,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn last_sync_at(&self, tenant_id: &TenantId) -> Result<Timestamp> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_sync_at FROM sync_state WHERE tenant_id = ?")
                .bind(tenant_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(value.unwrap_or(0))
    }

    async fn set_last_sync_at(&self, tenant_id: &TenantId, timestamp: Timestamp) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (tenant_id, last_sync_at) VALUES (?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET last_sync_at = excluded.last_sync_at
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn record_session(&self, summary: &SyncSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_sessions (
                id, tenant_id, outcome, outcome_detail,
                pulled, adopted, uploaded, queued, drained, failures,
                started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(summary.session_id.as_str())
        .bind(&summary.tenant_id)
        .bind(summary.outcome.as_str())
        .bind(serde_json::to_string(&summary.outcome)?)
        .bind(summary.pulled as i64)
        .bind(summary.adopted as i64)
        .bind(summary.uploaded as i64)
        .bind(summary.queued as i64)
        .bind(summary.drained as i64)
        .bind(serde_json::to_string(&summary.permanently_failed)?)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn history(&self, tenant_id: &TenantId, limit: u32) -> Result<Vec<SyncSummary>> {
        let rows = sqlx::query_as::<_, SyncSessionRow>(
            r#"
            SELECT id, tenant_id, outcome_detail,
                   pulled, adopted, uploaded, queued, drained, failures,
                   started_at, finished_at
            FROM sync_sessions
            WHERE tenant_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter()
            .map(SyncSummary::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{SyncPhase, SyncSession};
    use core_records::db::create_test_pool;

    async fn setup() -> SqliteSyncStateRepository {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteSyncStateRepository::new(pool);
        repo.initialize().await.unwrap();
        repo
    }

    fn summary(tenant: &str, started_at: i64, outcome: SyncOutcome) -> SyncSummary {
        let mut session = SyncSession::new(started_at);
        session.tenant_id = Some(tenant.to_string());
        session.uploaded = 3;
        session.finish(outcome, started_at + 10)
    }

    #[tokio::test]
    async fn test_last_sync_defaults_to_zero() {
        let repo = setup().await;
        assert_eq!(repo.last_sync_at(&TenantId::new("t1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_last_sync_is_per_tenant() {
        let repo = setup().await;
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");

        repo.set_last_sync_at(&t1, 500).await.unwrap();
        repo.set_last_sync_at(&t1, 900).await.unwrap();
        repo.set_last_sync_at(&t2, 42).await.unwrap();

        assert_eq!(repo.last_sync_at(&t1).await.unwrap(), 900);
        assert_eq!(repo.last_sync_at(&t2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let repo = setup().await;
        let tenant = TenantId::new("t1");

        repo.record_session(&summary("t1", 100, SyncOutcome::Completed))
            .await
            .unwrap();
        repo.record_session(&summary(
            "t1",
            200,
            SyncOutcome::Aborted {
                phase: SyncPhase::Pulling,
                reason: "offline".to_string(),
            },
        ))
        .await
        .unwrap();
        repo.record_session(&summary("t2", 300, SyncOutcome::Completed))
            .await
            .unwrap();

        let history = repo.history(&tenant, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].started_at, 200);
        assert!(matches!(history[0].outcome, SyncOutcome::Aborted { .. }));
        assert_eq!(history[1].uploaded, 3);

        assert_eq!(repo.history(&tenant, 1).await.unwrap().len(), 1);
    }
}
