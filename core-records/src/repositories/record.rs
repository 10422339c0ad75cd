//! Record repository trait and SQLite implementation

use crate::error::{RecordError, Result};
use crate::models::{EntityKind, RecordRow, SyncStatus, SyncableRecord};
use async_trait::async_trait;
use bridge_traits::{Clock, TenantId};
use sqlx::{query, query_as, SqlitePool};
use std::sync::Arc;
use tracing::debug;

const SELECT_COLUMNS: &str = "SELECT local_id, kind, payload, remote_id, tenant_id, sync_status, \
     updated_at, last_sync_timestamp, created_at FROM records";

/// Rows owned by the bound tenant or by nobody yet
const VISIBLE_TO_TENANT: &str = "(tenant_id = ? OR tenant_id IS NULL)";

/// Record repository interface for data access operations
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Find a record by its local ID
    ///
    /// # Returns
    /// - `Ok(Some(record))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, local_id: i64) -> Result<Option<SyncableRecord>>;

    /// Find the record `tenant_id` uploaded as (or adopted from) `remote_id`
    async fn find_by_remote_id(
        &self,
        tenant_id: &TenantId,
        remote_id: &str,
    ) -> Result<Option<SyncableRecord>>;

    /// All records of one kind, oldest first, whoever owns them
    async fn find_all(&self, kind: EntityKind) -> Result<Vec<SyncableRecord>>;

    /// Records of one kind owned by `tenant_id` or not owned yet, oldest first
    async fn find_visible(&self, tenant_id: &TenantId, kind: EntityKind) -> Result<Vec<SyncableRecord>>;

    /// Records whose status is `local` or `pending_upload` and that
    /// `tenant_id` may upload
    ///
    /// # Arguments
    /// * `tenant_id` - Tenant about to push; records owned by other tenants are skipped
    /// * `kind` - Restrict to one kind, or `None` for every kind
    async fn find_pending_sync(
        &self,
        tenant_id: &TenantId,
        kind: Option<EntityKind>,
    ) -> Result<Vec<SyncableRecord>>;

    /// Insert or update a record
    ///
    /// A record with `local_id == 0` is inserted and receives its local id and
    /// creation timestamp. Otherwise the existing row is overwritten.
    ///
    /// # Errors
    /// Returns error if:
    /// - Record validation fails
    /// - The record to update does not exist
    /// - Database error occurs
    async fn save(&self, record: SyncableRecord) -> Result<SyncableRecord>;

    /// Delete a record by local ID
    ///
    /// # Returns
    /// - `Ok(true)` if the record was deleted
    /// - `Ok(false)` if it was not found
    async fn delete(&self, local_id: i64) -> Result<bool>;

    /// Count records of one kind
    async fn count(&self, kind: EntityKind) -> Result<i64>;
}

/// SQLite implementation of RecordRepository
pub struct SqliteRecordRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteRecordRepository {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn convert(rows: Vec<RecordRow>) -> Result<Vec<SyncableRecord>> {
        rows.into_iter().map(SyncableRecord::try_from).collect()
    }
}

#[async_trait]
impl RecordRepository for SqliteRecordRepository {
    async fn find_by_id(&self, local_id: i64) -> Result<Option<SyncableRecord>> {
        let row = query_as::<_, RecordRow>(&format!("{} WHERE local_id = ?", SELECT_COLUMNS))
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncableRecord::try_from).transpose()
    }

    async fn find_by_remote_id(
        &self,
        tenant_id: &TenantId,
        remote_id: &str,
    ) -> Result<Option<SyncableRecord>> {
        let row = query_as::<_, RecordRow>(&format!(
            "{} WHERE remote_id = ? AND {} ORDER BY tenant_id IS NULL, local_id ASC LIMIT 1",
            SELECT_COLUMNS, VISIBLE_TO_TENANT
        ))
        .bind(remote_id)
        .bind(tenant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncableRecord::try_from).transpose()
    }

    async fn find_all(&self, kind: EntityKind) -> Result<Vec<SyncableRecord>> {
        let rows = query_as::<_, RecordRow>(&format!(
            "{} WHERE kind = ? ORDER BY local_id ASC",
            SELECT_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::convert(rows)
    }

    async fn find_visible(&self, tenant_id: &TenantId, kind: EntityKind) -> Result<Vec<SyncableRecord>> {
        let rows = query_as::<_, RecordRow>(&format!(
            "{} WHERE kind = ? AND {} ORDER BY local_id ASC",
            SELECT_COLUMNS, VISIBLE_TO_TENANT
        ))
        .bind(kind.as_str())
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::convert(rows)
    }

    async fn find_pending_sync(
        &self,
        tenant_id: &TenantId,
        kind: Option<EntityKind>,
    ) -> Result<Vec<SyncableRecord>> {
        let rows = match kind {
            Some(kind) => {
                query_as::<_, RecordRow>(&format!(
                    "{} WHERE kind = ? AND sync_status != ? AND {} ORDER BY local_id ASC",
                    SELECT_COLUMNS, VISIBLE_TO_TENANT
                ))
                .bind(kind.as_str())
                .bind(SyncStatus::Synced.as_str())
                .bind(tenant_id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                query_as::<_, RecordRow>(&format!(
                    "{} WHERE sync_status != ? AND {} ORDER BY local_id ASC",
                    SELECT_COLUMNS, VISIBLE_TO_TENANT
                ))
                .bind(SyncStatus::Synced.as_str())
                .bind(tenant_id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Self::convert(rows)
    }

    async fn save(&self, mut record: SyncableRecord) -> Result<SyncableRecord> {
        record.validate().map_err(|e| RecordError::InvalidInput {
            field: "SyncableRecord".to_string(),
            message: e,
        })?;

        let payload = record.payload.to_json()?;

        if !record.is_persisted() {
            let now = self.clock.now_millis();
            record.created_at = now;
            if record.updated_at <= 0 {
                record.updated_at = now;
            }

            let result = query(
                r#"
                INSERT INTO records (
                    kind, payload, remote_id, tenant_id, sync_status,
                    updated_at, last_sync_timestamp, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.kind().as_str())
            .bind(&payload)
            .bind(&record.remote_id)
            .bind(record.tenant_id.as_ref().map(TenantId::as_str))
            .bind(record.sync_status.as_str())
            .bind(record.updated_at)
            .bind(record.last_sync_timestamp)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;

            record.local_id = result.last_insert_rowid();
            debug!(local_id = record.local_id, kind = %record.kind(), "Inserted record");
            return Ok(record);
        }

        let result = query(
            r#"
            UPDATE records
            SET kind = ?, payload = ?, remote_id = ?, tenant_id = ?, sync_status = ?,
                updated_at = ?, last_sync_timestamp = ?
            WHERE local_id = ?
            "#,
        )
        .bind(record.kind().as_str())
        .bind(&payload)
        .bind(&record.remote_id)
        .bind(record.tenant_id.as_ref().map(TenantId::as_str))
        .bind(record.sync_status.as_str())
        .bind(record.updated_at)
        .bind(record.last_sync_timestamp)
        .bind(record.local_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordError::NotFound {
                entity_type: record.kind().to_string(),
                id: record.local_id.to_string(),
            });
        }

        Ok(record)
    }

    async fn delete(&self, local_id: i64) -> Result<bool> {
        let result = query("DELETE FROM records WHERE local_id = ?")
            .bind(local_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let count: (i64,) = query_as("SELECT COUNT(*) FROM records WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Game, RecordPayload, Team};
    use bridge_traits::ManualClock;

    fn tenant() -> TenantId {
        TenantId::new("coach-1")
    }

    async fn setup() -> (SqliteRecordRepository, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        (SqliteRecordRepository::new(pool, clock.clone()), clock)
    }

    fn team(name: &str) -> RecordPayload {
        RecordPayload::Team(Team {
            name: name.to_string(),
            season: None,
            coach: Some("Sam".to_string()),
        })
    }

    #[tokio::test]
    async fn test_save_inserts_and_assigns_id() {
        let (repo, _clock) = setup().await;

        let saved = repo
            .save(SyncableRecord::new_local(team("Falcons"), 0))
            .await
            .unwrap();

        assert!(saved.local_id > 0);
        assert_eq!(saved.created_at, 1_000);
        assert_eq!(saved.updated_at, 1_000);

        let found = repo.find_by_id(saved.local_id).await.unwrap().unwrap();
        assert_eq!(found, saved);
    }

    #[tokio::test]
    async fn test_save_updates_existing() {
        let (repo, clock) = setup().await;
        let mut record = repo
            .save(SyncableRecord::new_local(team("Falcons"), 1_000))
            .await
            .unwrap();

        record
            .edit_payload(team("Hawks"), clock.advance(10))
            .unwrap();
        repo.save(record.clone()).await.unwrap();

        let found = repo.find_by_id(record.local_id).await.unwrap().unwrap();
        assert_eq!(found.payload, team("Hawks"));
        assert_eq!(found.updated_at, 1_010);
    }

    #[tokio::test]
    async fn test_save_missing_record_fails() {
        let (repo, _clock) = setup().await;
        let mut ghost = SyncableRecord::new_local(team("Ghosts"), 1);
        ghost.local_id = 99;

        let result = repo.save(ghost).await;
        assert!(matches!(result, Err(RecordError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_record() {
        let (repo, _clock) = setup().await;
        let result = repo.save(SyncableRecord::new_local(team(""), 1)).await;
        assert!(matches!(result, Err(RecordError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_find_pending_sync_filters_synced() {
        let (repo, _clock) = setup().await;

        let falcons = repo
            .save(SyncableRecord::new_local(team("Falcons"), 1))
            .await
            .unwrap();
        let mut hawks = repo
            .save(SyncableRecord::new_local(team("Hawks"), 1))
            .await
            .unwrap();
        hawks.mark_synced(&tenant(), "doc-hawks", 50);
        repo.save(hawks).await.unwrap();

        let game = RecordPayload::Game(Game {
            team_id: falcons.local_id,
            opponent: "Owls".to_string(),
            scheduled_at: 10,
            location: None,
            team_score: None,
            opponent_score: None,
        });
        repo.save(SyncableRecord::new_local(game, 1)).await.unwrap();

        let pending = repo.find_pending_sync(&tenant(), None).await.unwrap();
        assert_eq!(pending.len(), 2);

        let pending_teams = repo
            .find_pending_sync(&tenant(), Some(EntityKind::Team))
            .await
            .unwrap();
        assert_eq!(pending_teams.len(), 1);
        assert_eq!(pending_teams[0].local_id, falcons.local_id);

        assert_eq!(repo.count(EntityKind::Team).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_by_remote_id_and_delete() {
        let (repo, _clock) = setup().await;
        let stored = repo
            .save(SyncableRecord::from_remote(tenant(), team("Owls"), "doc-owls", 700, 650))
            .await
            .unwrap();

        let found = repo
            .find_by_remote_id(&tenant(), "doc-owls")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.local_id, stored.local_id);
        assert_eq!(found.tenant_id, Some(tenant()));
        assert_eq!(found.last_sync_timestamp, 700);
        assert!(repo
            .find_by_remote_id(&TenantId::new("coach-2"), "doc-owls")
            .await
            .unwrap()
            .is_none());

        assert!(repo.delete(stored.local_id).await.unwrap());
        assert!(!repo.delete(stored.local_id).await.unwrap());
        assert!(repo
            .find_by_remote_id(&tenant(), "doc-owls")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_other_tenants_records_hidden() {
        let (repo, _clock) = setup().await;
        let other = TenantId::new("coach-2");

        let mut owned = SyncableRecord::new_local(team("Falcons"), 1);
        owned.claim(&tenant());
        repo.save(owned).await.unwrap();
        repo.save(SyncableRecord::new_local(team("Unclaimed"), 1))
            .await
            .unwrap();

        let mine = repo.find_pending_sync(&tenant(), None).await.unwrap();
        assert_eq!(mine.len(), 2);

        let theirs = repo.find_pending_sync(&other, None).await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].payload, team("Unclaimed"));

        assert_eq!(repo.find_visible(&other, EntityKind::Team).await.unwrap().len(), 1);
        assert_eq!(repo.find_all(EntityKind::Team).await.unwrap().len(), 2);
    }
}
