//! # Core Configuration Module
//!
//! Provides configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding every collaborator the engine needs. It enforces fail-fast
//! validation: the engine does not start without a remote store and an
//! identity provider.
//!
//! ## Required Dependencies
//!
//! - `RemoteStore` - The per-tenant cloud document store
//! - `IdentityProvider` - Source of the signed-in tenant
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Time source (default: [`SystemClock`])
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/roster.db")
//!     .remote_store(Arc::new(MyRemoteStore::new()))
//!     .identity_provider(session_manager.clone())
//!     .background_drain_interval(Duration::from_secs(60))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Panics: no RemoteStore or IdentityProvider was injected
//! let config = CoreConfig::builder()
//!     .in_memory_database()
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, IdentityProvider, RemoteStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for the event channel capacity.
const MAX_EVENT_BUFFER_SIZE: usize = 10_000;

/// Shortest accepted background drain interval.
const MIN_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Where the local record store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// SQLite file on disk, created if missing
    File(PathBuf),
    /// Private in-memory database, discarded on shutdown
    InMemory,
}

impl DatabaseLocation {
    /// SQLite connection URL for this location.
    pub fn url(&self) -> String {
        match self {
            DatabaseLocation::File(path) => format!("sqlite:{}", path.display()),
            DatabaseLocation::InMemory => "sqlite::memory:".to_string(),
        }
    }
}

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub database: DatabaseLocation,

    /// Remote document store (required)
    pub remote_store: Arc<dyn RemoteStore>,

    /// Source of the current tenant (required)
    pub identity_provider: Arc<dyn IdentityProvider>,

    pub clock: Arc<dyn Clock>,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,

    /// Period of the opportunistic retry-queue drain; `None` disables it
    pub background_drain_interval: Option<Duration>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database", &self.database)
            .field(
                "remote_store",
                &format_args!(
                    "RemoteStore {{ max_batch_operations: {} }}",
                    self.remote_store.max_batch_operations()
                ),
            )
            .field("identity_provider", &"IdentityProvider { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("background_drain_interval", &self.background_drain_interval)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Event buffer size is within bounds
    /// - Background drain interval is not shorter than one second
    /// - The remote store advertises a usable batch size
    pub fn validate(&self) -> Result<()> {
        if let DatabaseLocation::File(path) = &self.database {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        if let Some(interval) = self.background_drain_interval {
            if interval < MIN_DRAIN_INTERVAL {
                return Err(Error::Config(format!(
                    "Background drain interval must be at least {:?}, got {:?}",
                    MIN_DRAIN_INTERVAL, interval
                )));
            }
        }

        if self.remote_store.max_batch_operations() == 0 {
            return Err(Error::Config(
                "RemoteStore reports a maximum batch size of 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn remote_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "RemoteStore".to_string(),
        message: "A RemoteStore implementation is required to synchronize records. \
                 Inject the cloud provider adapter, or provider-memory's \
                 InMemoryRemoteStore for local development."
            .to_string(),
    }
}

fn identity_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "IdentityProvider".to_string(),
        message: "An IdentityProvider is required to scope remote collections per tenant. \
                 Inject core-auth's SessionManager or a host identity adapter."
            .to_string(),
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database: Option<DatabaseLocation>,
    remote_store: Option<Arc<dyn RemoteStore>>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    background_drain_interval: Option<Duration>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite database file path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/data/roster.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database = Some(DatabaseLocation::File(path.into()));
        self
    }

    /// Use a private in-memory database.
    pub fn in_memory_database(mut self) -> Self {
        self.database = Some(DatabaseLocation::InMemory);
        self
    }

    pub fn remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote_store = Some(store);
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    /// Override the time source (tests inject a `ManualClock`).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Enable the periodic background drain of the retry queue.
    pub fn background_drain_interval(mut self, interval: Duration) -> Self {
        self.background_drain_interval = Some(interval);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when no database location was chosen or a value is out of range
    /// - [`Error::CapabilityMissing`] when a required bridge was not injected
    pub fn build(self) -> Result<CoreConfig> {
        let database = self.database.ok_or_else(|| {
            Error::Config(
                "Database location is required. Use .database_path() or .in_memory_database()."
                    .to_string(),
            )
        })?;

        let remote_store = self.remote_store.ok_or_else(remote_store_missing_error)?;
        let identity_provider = self
            .identity_provider
            .ok_or_else(identity_provider_missing_error)?;

        let config = CoreConfig {
            database,
            remote_store,
            identity_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            background_drain_interval: self.background_drain_interval,
        };

        config.validate()?;

        Ok(config)
    }
}
