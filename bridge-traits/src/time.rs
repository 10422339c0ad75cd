//! Time and Logging Abstractions
//!
//! Provides an injectable time source and a logging sink so hosts can control
//! wall-clock time in tests and receive structured logs from the engine.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::Result;

/// Milliseconds since the Unix epoch.
///
/// Every record, queue entry and sync watermark in the engine is stamped with
/// this unit. `0` means "never".
pub type Timestamp = i64;

/// Time source trait
///
/// Abstracts system time so sync decisions that compare `updated_at` against
/// the last-sync watermark can be tested deterministically.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn stamp(clock: &dyn Clock) -> i64 {
///     clock.now_millis()
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Get current Unix timestamp in milliseconds
    fn now_millis(&self) -> Timestamp {
        self.now().timestamp_millis()
    }
}

/// System clock implementation using actual system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
///
/// Starts at the given instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start),
        }
    }

    /// Move the clock forward by `delta` milliseconds and return the new time.
    pub fn advance(&self, delta: i64) -> Timestamp {
        self.millis.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn set(&self, millis: Timestamp) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }

    fn now_millis(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    pub message: String,
    /// Structured fields
    pub fields: HashMap<String, String>,
    /// Span ID of the enclosing tracing span, if any
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

/// Logger sink trait
///
/// Forwards structured logs from the engine to the host's logging pipeline
/// (a console, a log file, a crash reporter).
///
/// Implementations must not persist tenant identifiers or record payloads in
/// clear text; the `core-runtime` logging layer already redacts the fields it
/// knows about before forwarding.
#[async_trait]
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Logs below this level are dropped before they reach the sink.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Console logger implementation for development
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

#[async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            println!(
                "[{}] {} {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                entry.level.as_str(),
                entry.target,
                entry.message
            );

            if !entry.fields.is_empty() {
                println!("  Fields: {:?}", entry.fields);
            }
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}
