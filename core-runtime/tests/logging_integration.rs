//! Integration tests for the logging system
//!
//! The global subscriber can only be installed once per process, so every
//! assertion that depends on it lives in a single test.

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_if_sensitive, redact_tenant, LogFormat, LoggingConfig};
use core_runtime::Error;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CapturingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

#[test]
fn test_global_logging_forwards_to_sink_once() {
    let sink = Arc::new(CapturingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());

    init_logging(config).expect("first initialization succeeds");

    tracing::info!(target: "core_sync", tenant_id = "tenant-abcdef", "Session completed");
    tracing::trace!(target: "core_sync", "Below sink level");
    tracing::info!(target: "hyper", "Filtered by default directives");

    let entries = sink.entries.lock().unwrap().clone();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Session completed");
    assert_eq!(entries[0].fields.get("tenant_id"), Some(&"tena…".to_string()));

    let second = init_logging(LoggingConfig::default());
    assert!(matches!(second, Err(Error::Logging(_))));
}

#[test]
fn test_redaction_helpers() {
    assert_eq!(redact_if_sensitive("refresh_token", "abc"), "[REDACTED]");
    assert!(!redact_if_sensitive("contact", "user@example.com").contains("example.com"));
    assert_eq!(redact_if_sensitive("remote_id", "doc-1"), "doc-1");
    assert_eq!(redact_tenant("tenant-42"), "tena…");
}
