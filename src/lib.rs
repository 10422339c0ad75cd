//! Workspace umbrella crate.
//!
//! Re-exports the public surface of the workspace crates so a host
//! application can depend on `rostersync-workspace` alone. Enable the
//! `memory-provider` feature to get the in-process remote store used for
//! development and tests.

pub use bridge_traits;
pub use core_records;
pub use core_runtime;
pub use core_service::{CoreError, CoreService, Result};
pub use core_sync;

#[cfg(feature = "memory-provider")]
pub use provider_memory;
