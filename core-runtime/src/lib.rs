//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other engine crate depends on this one. It establishes the logging
//! conventions, the configuration contract with the host, and the broadcast
//! channel through which sessions and the retry queue report activity.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
