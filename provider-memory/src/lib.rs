//! # In-Memory Remote Store
//!
//! Implements `RemoteStore` entirely in process memory.
//!
//! ## Overview
//!
//! This module provides:
//! - Per-tenant document collections (`tenants/{tenant}/{collection}`)
//! - A monotonic server clock stamping every write
//! - Batch commits bounded by a configurable maximum
//! - Fault injection: offline mode, failing commits, per-document rejection
//! - Call counters for asserting how the engine used the store

pub mod error;
pub mod store;

pub use error::{MemoryStoreError, Result};
pub use store::{InMemoryRemoteStore, DEFAULT_MAX_BATCH_OPERATIONS};
