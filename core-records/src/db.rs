//! # Database Connection Pool Module
//!
//! Provides the SQLite connection pool behind the local record store.
//!
//! ## Features
//!
//! - **WAL Mode**: Readers do not block the single writer
//! - **Foreign Keys**: Enforced
//! - **Automatic Migrations**: Applied on pool creation
//! - **Health Checks**: Connection validated before the pool is handed out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_records::db::{DatabaseConfig, create_pool};
//!
//! let pool = create_pool(DatabaseConfig::new("roster.db")).await?;
//! ```
//!
//! ## Testing
//!
//! In-memory databases live inside a single connection, so the test pool is
//! pinned to exactly one connection that never expires:
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::{RecordError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:` URL of the database file, or `sqlite::memory:`
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Configuration for a database file at `database_path`.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self::from_url(format!("sqlite:{}", path.display()))
    }

    /// Configuration for an already formed `sqlite:` URL.
    pub fn from_url(database_url: impl Into<String>) -> Self {
        let database_url = database_url.into();
        if database_url.contains(":memory:") {
            return Self::in_memory();
        }

        Self {
            database_url,
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// Configuration for a private in-memory database.
    ///
    /// Each SQLite connection to `:memory:` opens a distinct database, so the
    /// pool holds exactly one connection and never recycles it.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool
///
/// This function:
/// 1. Configures SQLite connection options (WAL mode, foreign keys, etc.)
/// 2. Creates a connection pool with the specified configuration
/// 3. Runs database migrations
/// 4. Performs a health check
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(RecordError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            RecordError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!("Database connection pool ready");
    Ok(pool)
}

/// In-memory pool with migrations applied, for tests.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    debug!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        RecordError::Migration(e.to_string())
    })?;

    Ok(())
}

async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        RecordError::Database(e)
    })?;

    debug!("Database health check passed");
    Ok(())
}
