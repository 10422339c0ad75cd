//! # Authentication Module
//!
//! Signed-in tenant tracking for the sync engine.
//!
//! ## Overview
//!
//! The host authenticates the user however it likes and tells the
//! [`SessionManager`] which tenant is now active. The manager exposes that
//! tenant through [`bridge_traits::IdentityProvider`] and broadcasts auth
//! events so that in-flight work can react to sign-out.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{AuthError, Result};
pub use manager::SessionManager;
pub use types::{AuthState, Session};
