//! # Record Store Module
//!
//! Owns the local database of synchronized entities and provides the
//! repository the sync engine reads and writes through.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite schema and migrations for the `records` table
//! - Typed payloads for teams, games and game events
//! - Sync metadata (`remote_id`, `sync_status`, timestamps) and its invariants
//! - The [`RecordRepository`] trait and its SQLite implementation

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{RecordError, Result};
pub use models::{
    EntityKind, Game, GameEvent, RecordPayload, RecordRow, SyncStatus, SyncableRecord, Team,
};
pub use repositories::{RecordRepository, SqliteRecordRepository};
