//! # Sync Session State Machine
//!
//! Lifecycle of one sync session with validated phase transitions.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Pulling → Resolving → Pushing → Draining → Idle
//!   ↓       ↓          ↓          ↓          ↓
//!   └───────┴──────────┴──────────┴──────────┴────→ Aborted
//!           └──────────┴──────────┴──────────┴────→ Cancelled
//! ```
//!
//! `Aborted` and `Cancelled` are terminal. A session that returns to `Idle`
//! from `Draining` has completed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut session = SyncSession::new(now);
//! session.transition(SyncPhase::Pulling)?;
//! session.transition(SyncPhase::Resolving)?;
//! // Cannot skip straight back to Pulling
//! assert!(session.transition(SyncPhase::Pulling).is_err());
//! ```

use crate::retry_queue::PermanentFailure;
use crate::{Result, SyncError};
use bridge_traits::Timestamp;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncSessionId(Uuid);

impl SyncSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidStatus(format!("invalid session id: {}", s)))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Pulling,
    Resolving,
    Pushing,
    Draining,
    Aborted,
    Cancelled,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Pulling => "pulling",
            SyncPhase::Resolving => "resolving",
            SyncPhase::Pushing => "pushing",
            SyncPhase::Draining => "draining",
            SyncPhase::Aborted => "aborted",
            SyncPhase::Cancelled => "cancelled",
        }
    }

    /// Phases during which a second session must be refused
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Pulling | SyncPhase::Resolving | SyncPhase::Pushing | SyncPhase::Draining
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Aborted | SyncPhase::Cancelled)
    }

    fn can_transition_to(&self, to: SyncPhase) -> bool {
        match (self, to) {
            (SyncPhase::Idle, SyncPhase::Pulling) => true,
            (SyncPhase::Pulling, SyncPhase::Resolving) => true,
            (SyncPhase::Resolving, SyncPhase::Pushing) => true,
            (SyncPhase::Pushing, SyncPhase::Draining) => true,
            (SyncPhase::Draining, SyncPhase::Idle) => true,

            // Unauthenticated sessions abort before leaving Idle
            (SyncPhase::Idle, SyncPhase::Aborted) => true,
            (from, SyncPhase::Aborted) | (from, SyncPhase::Cancelled) => from.is_active(),

            _ => false,
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(SyncPhase::Idle),
            "pulling" => Ok(SyncPhase::Pulling),
            "resolving" => Ok(SyncPhase::Resolving),
            "pushing" => Ok(SyncPhase::Pushing),
            "draining" => Ok(SyncPhase::Draining),
            "aborted" => Ok(SyncPhase::Aborted),
            "cancelled" => Ok(SyncPhase::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

// ============================================================================
// Progress and Summary
// ============================================================================

/// Snapshot handed to the progress callback on every phase transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub session_id: SyncSessionId,
    pub from: SyncPhase,
    pub phase: SyncPhase,
    /// Remote documents fetched so far
    pub pulled: u64,
    /// Records uploaded and marked synced so far
    pub uploaded: u64,
    /// Operations routed to the retry queue so far
    pub queued: u64,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    Aborted { phase: SyncPhase, reason: String },
    Cancelled { phase: SyncPhase },
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Completed => "completed",
            SyncOutcome::Aborted { .. } => "aborted",
            SyncOutcome::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed)
    }
}

/// Terminal report of a session.
///
/// Every record the session touched lands in exactly one of `uploaded`,
/// `queued` or `permanently_failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub session_id: SyncSessionId,
    pub tenant_id: Option<String>,
    pub outcome: SyncOutcome,
    /// Remote documents fetched
    pub pulled: u64,
    /// Local records created or overwritten from remote
    pub adopted: u64,
    /// Records uploaded and marked synced
    pub uploaded: u64,
    /// Upload failures routed to the retry queue
    pub queued: u64,
    /// Queue entries replayed successfully
    pub drained: u64,
    pub permanently_failed: Vec<PermanentFailure>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl SyncSummary {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).max(0) as u64
    }

    /// Records that reached the remote store in this session
    pub fn synced(&self) -> u64 {
        self.uploaded + self.drained
    }
}

// ============================================================================
// Session Entity
// ============================================================================

/// A running sync session
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSession {
    pub id: SyncSessionId,
    pub tenant_id: Option<String>,
    pub phase: SyncPhase,
    pub pulled: u64,
    pub adopted: u64,
    pub uploaded: u64,
    pub queued: u64,
    pub drained: u64,
    pub permanently_failed: Vec<PermanentFailure>,
    pub started_at: Timestamp,
}

impl SyncSession {
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            id: SyncSessionId::new(),
            tenant_id: None,
            phase: SyncPhase::Idle,
            pulled: 0,
            adopted: 0,
            uploaded: 0,
            queued: 0,
            drained: 0,
            permanently_failed: Vec::new(),
            started_at,
        }
    }

    /// Move to `to`, returning the phase left behind.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` for any edge not in the state machine.
    pub fn transition(&mut self, to: SyncPhase) -> Result<SyncPhase> {
        if !self.phase.can_transition_to(to) {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self.phase, to),
            });
        }

        let from = self.phase;
        self.phase = to;
        Ok(from)
    }

    pub fn progress(&self, from: SyncPhase) -> SyncProgress {
        SyncProgress {
            session_id: self.id,
            from,
            phase: self.phase,
            pulled: self.pulled,
            uploaded: self.uploaded,
            queued: self.queued,
        }
    }

    pub fn finish(self, outcome: SyncOutcome, finished_at: Timestamp) -> SyncSummary {
        SyncSummary {
            session_id: self.id,
            tenant_id: self.tenant_id,
            outcome,
            pulled: self.pulled,
            adopted: self.adopted,
            uploaded: self.uploaded,
            queued: self.queued,
            drained: self.drained,
            permanently_failed: self.permanently_failed,
            started_at: self.started_at,
            finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_round_trip() {
        let id = SyncSessionId::new();
        assert_eq!(SyncSessionId::from_string(&id.as_str()).unwrap(), id);
        assert!(SyncSessionId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("draining".parse::<SyncPhase>().unwrap(), SyncPhase::Draining);
        assert!("sleeping".parse::<SyncPhase>().is_err());
    }

    #[test]
    fn test_phase_activity() {
        assert!(!SyncPhase::Idle.is_active());
        assert!(SyncPhase::Pulling.is_active());
        assert!(SyncPhase::Draining.is_active());
        assert!(!SyncPhase::Aborted.is_active());
        assert!(SyncPhase::Cancelled.is_terminal());
    }

    #[test]
    fn test_full_cycle() {
        let mut session = SyncSession::new(100);
        for phase in [
            SyncPhase::Pulling,
            SyncPhase::Resolving,
            SyncPhase::Pushing,
            SyncPhase::Draining,
            SyncPhase::Idle,
        ] {
            session.transition(phase).unwrap();
        }
        assert_eq!(session.phase, SyncPhase::Idle);
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        let mut session = SyncSession::new(100);
        assert!(matches!(
            session.transition(SyncPhase::Pushing),
            Err(SyncError::InvalidStateTransition { .. })
        ));

        session.transition(SyncPhase::Pulling).unwrap();
        assert!(session.transition(SyncPhase::Draining).is_err());
        assert!(session.transition(SyncPhase::Idle).is_err());
    }

    #[test]
    fn test_abort_and_cancel_edges() {
        let mut unauthenticated = SyncSession::new(1);
        assert_eq!(unauthenticated.transition(SyncPhase::Aborted).unwrap(), SyncPhase::Idle);
        assert!(unauthenticated.transition(SyncPhase::Pulling).is_err());

        let mut idle = SyncSession::new(1);
        assert!(idle.transition(SyncPhase::Cancelled).is_err());

        let mut pushing = SyncSession::new(1);
        pushing.transition(SyncPhase::Pulling).unwrap();
        pushing.transition(SyncPhase::Resolving).unwrap();
        pushing.transition(SyncPhase::Pushing).unwrap();
        assert_eq!(pushing.transition(SyncPhase::Cancelled).unwrap(), SyncPhase::Pushing);
        assert!(pushing.transition(SyncPhase::Aborted).is_err());
    }

    #[test]
    fn test_progress_and_summary() {
        let mut session = SyncSession::new(1_000);
        session.transition(SyncPhase::Pulling).unwrap();
        session.pulled = 4;
        let from = session.transition(SyncPhase::Resolving).unwrap();

        let progress = session.progress(from);
        assert_eq!(progress.from, SyncPhase::Pulling);
        assert_eq!(progress.phase, SyncPhase::Resolving);
        assert_eq!(progress.pulled, 4);

        session.uploaded = 2;
        session.drained = 1;
        let summary = session.finish(SyncOutcome::Completed, 1_250);
        assert_eq!(summary.duration_ms(), 250);
        assert_eq!(summary.synced(), 3);
        assert!(summary.outcome.is_completed());
    }
}
