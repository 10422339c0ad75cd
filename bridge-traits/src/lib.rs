//! # Host Bridge Traits
//!
//! Collaborator contracts the sync engine depends on but does not implement.
//!
//! ## Overview
//!
//! This crate defines the boundary between the engine and everything it talks
//! to. Each trait is a capability the host injects at startup; the engine never
//! constructs a remote client or reads a global session on its own.
//!
//! ## Traits
//!
//! ### Remote persistence
//! - [`RemoteStore`](remote::RemoteStore) - Per-tenant document collections with bounded atomic batches
//!
//! ### Identity
//! - [`IdentityProvider`](identity::IdentityProvider) - Current tenant or "unauthenticated"
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The runtime refuses to start when a required capability is missing:
//!
//! ```ignore
//! let remote = config.remote_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "RemoteStore".to_string(),
//!         message: "No remote store provided. Inject a provider implementation.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert transport errors into it and keep messages actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! across the orchestrator, the retry queue and background tasks.

pub mod error;
pub mod identity;
pub mod remote;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use identity::{FixedIdentity, IdentityProvider, TenantId};
pub use remote::{
    BatchCommit, BatchItemResult, BatchWrite, CollectionRef, RemoteDocument, RemotePredicate,
    RemoteStore, WriteAck,
};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock, Timestamp};
