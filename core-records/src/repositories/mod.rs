//! Repository pattern implementations for data access

pub mod record;

pub use record::{RecordRepository, SqliteRecordRepository};
