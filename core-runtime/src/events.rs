//! # Event Bus System
//!
//! Provides an event-driven architecture for the sync engine using `tokio::sync::broadcast`.
//! Components publish typed events; hosts and other components subscribe without
//! holding references to the publisher.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for auth, sync sessions and the retry queue
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ SessionMgr   ├────────────>│           │
//! └──────────────┘             │           │    subscribe    ┌────────────┐
//! ┌──────────────┐    emit     │ EventBus  ├────────────────>│ Host UI    │
//! │ Orchestrator ├────────────>│ (broadcast│                 └────────────┘
//! └──────────────┘             │  channel) │    subscribe    ┌────────────┐
//! ┌──────────────┐    emit     │           ├────────────────>│ Telemetry  │
//! │ RetryQueue   ├────────────>│           │                 └────────────┘
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Started {
//!         session_id: "s-1".to_string(),
//!         tenant_id: "tenant-1".to_string(),
//!     }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert!(matches!(received, CoreEvent::Sync(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving newer events.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.
//!
//! Publishers ignore `SendError` (`.ok()`): having no subscriber is normal.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sign-in state changes
    Auth(AuthEvent),
    /// Sync session lifecycle
    Sync(SyncEvent),
    /// Retry queue activity
    Queue(QueueEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Aborted { .. }) => EventSeverity::Error,
            CoreEvent::Queue(QueueEvent::EntryPermanentlyFailed { .. }) => EventSeverity::Error,
            CoreEvent::Queue(QueueEvent::EntryEnqueued { .. }) => EventSeverity::Warning,
            CoreEvent::Queue(QueueEvent::EntryRetried { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(_) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events emitted when the signed-in tenant changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A tenant signed in.
    SignedIn { tenant_id: String },
    /// The current tenant signed out.
    SignedOut { tenant_id: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SignedIn { .. } => "Tenant signed in",
            AuthEvent::SignedOut { .. } => "Tenant signed out",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events describing the lifecycle of a sync session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Session started pulling.
    Started {
        session_id: String,
        tenant_id: String,
    },
    /// Session moved between phases.
    PhaseChanged {
        session_id: String,
        /// Phase name before the transition (e.g. "pulling").
        from: String,
        /// Phase name after the transition.
        to: String,
    },
    /// Session drained the queue and returned to idle.
    Completed {
        session_id: String,
        /// Remote documents fetched during the pull.
        pulled: u64,
        /// Records uploaded and marked synced.
        synced: u64,
        /// Operations currently waiting in the retry queue.
        queued: u64,
        /// Operations discarded after exhausting their retry budget.
        permanently_failed: u64,
        duration_ms: u64,
    },
    /// Session stopped before completing.
    Aborted {
        session_id: String,
        /// Phase the session was in when it stopped.
        phase: String,
        message: String,
        /// Whether triggering another sync may succeed without user action.
        recoverable: bool,
    },
    /// Session was cancelled by the caller between phases.
    Cancelled { session_id: String, phase: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::PhaseChanged { .. } => "Sync phase changed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Aborted { .. } => "Sync aborted",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Events emitted by the durable retry queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// A failed operation was deferred.
    EntryEnqueued {
        entry_id: String,
        entity_kind: String,
        operation: String,
        error: String,
    },
    /// A replay attempt failed; the entry stays queued.
    EntryRetried {
        entry_id: String,
        entity_kind: String,
        retry_count: u32,
        max_retries: u32,
        error: String,
    },
    /// A replay attempt succeeded and the entry was removed.
    EntryCompleted {
        entry_id: String,
        entity_kind: String,
        operation: String,
    },
    /// The entry exhausted its retry budget and was discarded.
    EntryPermanentlyFailed {
        entry_id: String,
        entity_kind: String,
        operation: String,
        retry_count: u32,
        error: String,
    },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::EntryEnqueued { .. } => "Operation queued for retry",
            QueueEvent::EntryRetried { .. } => "Retry attempt failed, will attempt again later",
            QueueEvent::EntryCompleted { .. } => "Queued operation succeeded",
            QueueEvent::EntryPermanentlyFailed { .. } => "Queued operation permanently failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// let event_bus = EventBus::new(100);
/// let queue_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Queue(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drain every matching event currently buffered.
    pub fn drain_ready(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(Ok(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueued(entry: &str) -> CoreEvent {
        CoreEvent::Queue(QueueEvent::EntryEnqueued {
            entry_id: entry.to_string(),
            entity_kind: "game".to_string(),
            operation: "create".to_string(),
            error: "timeout".to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        let event = CoreEvent::Auth(AuthEvent::SignedOut {
            tenant_id: "t".to_string(),
        });

        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::Started {
            session_id: "s-1".to_string(),
            tenant_id: "t-1".to_string(),
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|event| matches!(event, CoreEvent::Queue(_)));

        bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
            session_id: "s-1".to_string(),
            phase: "pushing".to_string(),
        }))
        .ok();
        bus.emit(enqueued("e-1")).ok();

        let received = stream.recv().await.unwrap();
        assert_eq!(received, enqueued("e-1"));
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(enqueued(&format!("e-{}", i))).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Queue(QueueEvent::EntryPermanentlyFailed {
            entry_id: "e".to_string(),
            entity_kind: "team".to_string(),
            operation: "update".to_string(),
            retry_count: 5,
            error: "boom".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(enqueued("e").severity(), EventSeverity::Warning);

        let phase = CoreEvent::Sync(SyncEvent::PhaseChanged {
            session_id: "s".to_string(),
            from: "idle".to_string(),
            to: "pulling".to_string(),
        });
        assert_eq!(phase.severity(), EventSeverity::Debug);
        assert_eq!(phase.description(), "Sync phase changed");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::Completed {
            session_id: "s-9".to_string(),
            pulled: 3,
            synced: 2,
            queued: 1,
            permanently_failed: 0,
            duration_ms: 1200,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Sync\""));
        assert!(json.contains("s-9"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_drain_ready_respects_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Auth(_)));

        bus.emit(enqueued("e-1")).ok();
        bus.emit(CoreEvent::Auth(AuthEvent::SignedIn {
            tenant_id: "t".to_string(),
        }))
        .ok();

        let events = stream.drain_ready();
        assert_eq!(events.len(), 1);
        assert!(stream.try_recv().is_none());
    }
}
