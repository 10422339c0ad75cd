//! Domain models for the local record store
//!
//! Every entity kind shares the [`SyncableRecord`] envelope: a local integer
//! identity, a typed payload and the metadata the sync engine needs to decide
//! what to upload.

use bridge_traits::{TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::{RecordError, Result};

// =============================================================================
// Entity Kinds
// =============================================================================

/// Closed set of synchronized entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Team,
    Game,
    Event,
}

impl EntityKind {
    /// Every kind, parents before children.
    pub const ALL: [EntityKind; 3] = [EntityKind::Team, EntityKind::Game, EntityKind::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Team => "team",
            EntityKind::Game => "game",
            EntityKind::Event => "event",
        }
    }

    /// Name of the per-tenant remote collection holding this kind.
    pub fn collection_name(&self) -> &'static str {
        match self {
            EntityKind::Team => "teams",
            EntityKind::Game => "games",
            EntityKind::Event => "events",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "team" => Ok(EntityKind::Team),
            "game" => Ok(EntityKind::Game),
            "event" => Ok(EntityKind::Event),
            other => Err(RecordError::InvalidInput {
                field: "kind".to_string(),
                message: format!("unknown entity kind '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Upload state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created or edited locally, never offered for upload since
    Local,
    /// Selected for upload; a commit has not confirmed it yet
    PendingUpload,
    /// Remote copy matches the local payload as of `last_sync_timestamp`
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Local => "local",
            SyncStatus::PendingUpload => "pending_upload",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn needs_upload(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

impl FromStr for SyncStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(SyncStatus::Local),
            "pending_upload" => Ok(SyncStatus::PendingUpload),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(RecordError::InvalidInput {
                field: "sync_status".to_string(),
                message: format!("unknown sync status '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// A team on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub coach: Option<String>,
}

/// A scheduled or played game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Local id of the owning team
    pub team_id: i64,
    pub opponent: String,
    pub scheduled_at: Timestamp,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub team_score: Option<u32>,
    #[serde(default)]
    pub opponent_score: Option<u32>,
}

/// Something that happened during a game (a goal, a substitution, a card).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Local id of the game
    pub game_id: i64,
    pub event_type: String,
    pub minute: u32,
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Typed payload of a record; the variant determines the entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Team(Team),
    Game(Game),
    Event(GameEvent),
}

impl RecordPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            RecordPayload::Team(_) => EntityKind::Team,
            RecordPayload::Game(_) => EntityKind::Game,
            RecordPayload::Event(_) => EntityKind::Event,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            RecordPayload::Team(team) => {
                if team.name.trim().is_empty() {
                    return Err("Team name cannot be empty".to_string());
                }
            }
            RecordPayload::Game(game) => {
                if game.opponent.trim().is_empty() {
                    return Err("Game opponent cannot be empty".to_string());
                }
                if game.team_id <= 0 {
                    return Err("Game must reference a saved team".to_string());
                }
            }
            RecordPayload::Event(event) => {
                if event.event_type.trim().is_empty() {
                    return Err("Event type cannot be empty".to_string());
                }
                if event.game_id <= 0 {
                    return Err("Event must reference a saved game".to_string());
                }
            }
        }
        Ok(())
    }

    /// Field map written to the remote document.
    pub fn to_remote_fields(&self) -> Result<Value> {
        let value = match self {
            RecordPayload::Team(team) => serde_json::to_value(team)?,
            RecordPayload::Game(game) => serde_json::to_value(game)?,
            RecordPayload::Event(event) => serde_json::to_value(event)?,
        };
        Ok(value)
    }

    /// Decode a remote document's field map as a payload of `kind`.
    pub fn from_remote_fields(kind: EntityKind, fields: &Value) -> Result<Self> {
        let payload = match kind {
            EntityKind::Team => RecordPayload::Team(serde_json::from_value(fields.clone())?),
            EntityKind::Game => RecordPayload::Game(serde_json::from_value(fields.clone())?),
            EntityKind::Event => RecordPayload::Event(serde_json::from_value(fields.clone())?),
        };
        Ok(payload)
    }

    /// Self-describing JSON used for local storage and queue snapshots.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// =============================================================================
// Syncable Record
// =============================================================================

/// A locally persisted entity plus its sync metadata.
///
/// Invariants (checked by [`validate`](Self::validate)):
/// - a record without `remote_id` is never `Synced`
/// - a `Synced` record has `last_sync_timestamp > 0`
/// - a `Synced` record is owned by a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableRecord {
    /// Local identity; `0` until the record is first saved
    pub local_id: i64,
    pub payload: RecordPayload,
    pub remote_id: Option<String>,
    /// Owning tenant. `None` for records created offline that have not been
    /// uploaded yet; the first tenant to upload one claims it.
    pub tenant_id: Option<TenantId>,
    pub sync_status: SyncStatus,
    /// Last local change on the device clock (Unix ms)
    pub updated_at: Timestamp,
    /// Commit time of the last successful upload or adoption (Unix ms)
    pub last_sync_timestamp: Timestamp,
    pub created_at: Timestamp,
}

impl SyncableRecord {
    /// A brand-new local record awaiting its first save.
    pub fn new_local(payload: RecordPayload, now: Timestamp) -> Self {
        Self {
            local_id: 0,
            payload,
            remote_id: None,
            tenant_id: None,
            sync_status: SyncStatus::Local,
            updated_at: now,
            last_sync_timestamp: 0,
            created_at: now,
        }
    }

    /// A record adopted from a remote document that has no local counterpart.
    ///
    /// `remote_updated_at` is the server's commit time; `adopted_at` is the
    /// device-clock instant the pull started and becomes `updated_at`, so the
    /// record never looks locally edited to a later sync.
    pub fn from_remote(
        tenant_id: TenantId,
        payload: RecordPayload,
        remote_id: impl Into<String>,
        remote_updated_at: Timestamp,
        adopted_at: Timestamp,
    ) -> Self {
        Self {
            local_id: 0,
            payload,
            remote_id: Some(remote_id.into()),
            tenant_id: Some(tenant_id),
            sync_status: SyncStatus::Synced,
            updated_at: adopted_at,
            last_sync_timestamp: remote_updated_at,
            created_at: adopted_at,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    pub fn is_persisted(&self) -> bool {
        self.local_id > 0
    }

    /// Whether `tenant_id` may read and upload this record.
    pub fn is_visible_to(&self, tenant_id: &TenantId) -> bool {
        self.tenant_id.as_ref().map_or(true, |owner| owner == tenant_id)
    }

    /// Take ownership of an unowned record. Returns `true` if the owner changed.
    pub fn claim(&mut self, tenant_id: &TenantId) -> bool {
        if self.tenant_id.is_some() {
            return false;
        }
        self.tenant_id = Some(tenant_id.clone());
        true
    }

    pub fn needs_upload(&self) -> bool {
        self.sync_status.needs_upload()
    }

    /// Replace the payload after a local edit.
    ///
    /// The kind cannot change. The record returns to `Local` so the next sync
    /// uploads it.
    pub fn edit_payload(&mut self, payload: RecordPayload, now: Timestamp) -> Result<()> {
        if payload.kind() != self.kind() {
            return Err(RecordError::InvalidInput {
                field: "payload".to_string(),
                message: format!(
                    "cannot change a {} record into a {}",
                    self.kind(),
                    payload.kind()
                ),
            });
        }
        self.payload = payload;
        self.updated_at = now;
        self.sync_status = SyncStatus::Local;
        Ok(())
    }

    pub fn mark_pending_upload(&mut self) {
        self.sync_status = SyncStatus::PendingUpload;
    }

    /// Record a confirmed remote commit to `tenant_id`'s collections.
    pub fn mark_synced(
        &mut self,
        tenant_id: &TenantId,
        remote_id: impl Into<String>,
        committed_at: Timestamp,
    ) {
        self.tenant_id = Some(tenant_id.clone());
        self.remote_id = Some(remote_id.into());
        self.sync_status = SyncStatus::Synced;
        self.last_sync_timestamp = committed_at;
    }

    /// Overwrite local state with the remote version.
    ///
    /// See [`from_remote`](Self::from_remote) for the two timestamps.
    pub fn adopt_remote(
        &mut self,
        tenant_id: TenantId,
        payload: RecordPayload,
        remote_id: impl Into<String>,
        remote_updated_at: Timestamp,
        adopted_at: Timestamp,
    ) {
        self.payload = payload;
        self.remote_id = Some(remote_id.into());
        self.tenant_id = Some(tenant_id);
        self.sync_status = SyncStatus::Synced;
        self.updated_at = adopted_at;
        self.last_sync_timestamp = remote_updated_at;
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.payload.validate()?;

        if self.remote_id.is_none() && self.sync_status == SyncStatus::Synced {
            return Err("A record without remote_id cannot be synced".to_string());
        }

        if self.sync_status == SyncStatus::Synced && self.last_sync_timestamp <= 0 {
            return Err("A synced record must carry a last_sync_timestamp".to_string());
        }

        if self.sync_status == SyncStatus::Synced && self.tenant_id.is_none() {
            return Err("A synced record must belong to a tenant".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Database Row Mapping
// =============================================================================

/// Raw row of the `records` table.
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub local_id: i64,
    pub kind: String,
    pub payload: String,
    pub remote_id: Option<String>,
    pub tenant_id: Option<String>,
    pub sync_status: String,
    pub updated_at: i64,
    pub last_sync_timestamp: i64,
    pub created_at: i64,
}

impl TryFrom<RecordRow> for SyncableRecord {
    type Error = RecordError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let kind = EntityKind::from_str(&row.kind)?;
        let payload = RecordPayload::from_json(&row.payload)?;
        if payload.kind() != kind {
            return Err(RecordError::InvalidInput {
                field: "payload".to_string(),
                message: format!(
                    "row {} is stored as {} but holds a {} payload",
                    row.local_id,
                    kind,
                    payload.kind()
                ),
            });
        }

        Ok(Self {
            local_id: row.local_id,
            payload,
            remote_id: row.remote_id,
            tenant_id: row.tenant_id.map(TenantId::new),
            sync_status: SyncStatus::from_str(&row.sync_status)?,
            updated_at: row.updated_at,
            last_sync_timestamp: row.last_sync_timestamp,
            created_at: row.created_at,
        })
    }
}
