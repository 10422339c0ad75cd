//! # Logging & Tracing Infrastructure
//!
//! Provides structured logging with the `tracing` crate, supporting:
//! - JSON, pretty and compact output formats
//! - Module-level filtering through `EnvFilter`
//! - Redaction of credentials, e-mail addresses and tenant identifiers
//! - Forwarding to the host through a [`LoggerSink`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{LoggingConfig, LogFormat, init_logging};
//! use bridge_traits::time::{LogLevel, ConsoleLogger};
//! use std::sync::Arc;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Compact)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(ConsoleLogger::default()));
//!
//! init_logging(config)?;
//! tracing::info!(tenant_id = %redact_tenant("coach-42"), "Engine started");
//! ```
//!
//! ## LoggerSink integration
//!
//! When a sink is configured, every event that survives filtering is mirrored
//! to it as a [`LogEntry`]. With redaction enabled, field values pass through
//! [`redact_if_sensitive`] before they leave the process.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates whose events are shown at the configured level by default.
const ENGINE_TARGETS: &[&str] = &[
    "rostersync",
    "core_runtime",
    "core_auth",
    "core_records",
    "core_sync",
    "core_service",
    "provider_memory",
];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format with colors
    Pretty,
    /// Structured JSON format for machine parsing
    Json,
    /// Compact single-line format
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Minimum log level for engine crates
    pub level: LogLevel,
    /// Redact sensitive field values forwarded to the sink
    pub redact_pii: bool,
    /// Custom filter string (e.g., "core_sync=trace,sqlx=warn")
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_pii: true,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("redact_pii", &self.redact_pii)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_pii_redaction(mut self, redact: bool) -> Self {
        self.redact_pii = redact;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Initialize the global logging subscriber.
///
/// Call once during startup; a second call returns [`Error::Logging`].
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let sink_layer = LoggerSinkLayer::new(config.logger_sink.clone(), config.redact_pii);
    let registry = tracing_subscriber::registry().with(filter).with(sink_layer);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_span_events(if config.enable_spans {
                        tracing_subscriber::fmt::format::FmtSpan::ACTIVE
                    } else {
                        tracing_subscriber::fmt::format::FmtSpan::NONE
                    })
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(config.enable_spans)
                    .with_span_list(config.enable_spans)
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_writer(io::stdout),
            )
            .try_init(),
    };

    result.map_err(|e| Error::Logging(format!("failed to install subscriber: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let base_level = match config.level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };

    let filter_string = match &config.filter {
        Some(custom_filter) => custom_filter.clone(),
        None => {
            // Engine crates at the requested level, dependencies at warn
            let mut directives: Vec<String> = ENGINE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, base_level))
                .collect();
            directives.push("sqlx=warn".to_string());
            directives.join(",")
        }
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Logging(format!("invalid log filter: {}", e)))
}

/// Layer that forwards events to a `LoggerSink` implementation.
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    redact: bool,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>, redact: bool) -> Self {
        Self { sink, redact }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = tracing_level_to_log_level(*metadata.level());

        if level < sink.min_level() {
            return;
        }

        let mut visitor = SinkVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());

        let mut entry = LogEntry::new(level, metadata.target(), message);

        for (key, value) in visitor.fields {
            let value = if self.redact {
                redact_if_sensitive(&key, &value)
            } else {
                value
            };
            entry = entry.with_field(key, value);
        }

        if let Some(span) = ctx.lookup_current() {
            entry.span_id = Some(span.name().to_string());
        }

        let sink = Arc::clone(sink);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = sink.log(entry).await {
                    eprintln!("LoggerSink error: {}", err);
                }
            });
            return;
        }

        if let Err(err) = futures::executor::block_on(sink.log(entry)) {
            eprintln!("LoggerSink error: {}", err);
        }
    }
}

#[derive(Default)]
struct SinkVisitor {
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl SinkVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for SinkVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn tracing_level_to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Redact a field value when its name or shape marks it as sensitive.
///
/// ```ignore
/// use core_runtime::logging::redact_if_sensitive;
///
/// info!(token = %redact_if_sensitive("token", token), "Session refreshed");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const SENSITIVE_FIELDS: &[&str] = &[
        "token",
        "password",
        "secret",
        "api_key",
        "authorization",
        "bearer",
    ];

    let field_lower = field_name.to_lowercase();
    if SENSITIVE_FIELDS.iter().any(|&f| field_lower.contains(f)) {
        "[REDACTED]".to_string()
    } else if field_lower == "tenant_id" || field_lower == "tenant" {
        redact_tenant(value)
    } else if value.contains('@') && value.contains('.') {
        // Likely an email - keep the first character only
        match value.find('@') {
            Some(at_pos) => format!("{}***@[REDACTED]", &value[..1.min(at_pos)]),
            None => value.to_string(),
        }
    } else {
        value.to_string()
    }
}

/// Shorten a tenant identifier to a recognizable but non-identifying prefix.
///
/// ```ignore
/// info!(tenant_id = %redact_tenant(tenant.as_str()), "Sync started");
/// // Logs: tenant_id="coac…"
/// ```
pub fn redact_tenant(tenant_id: &str) -> String {
    const VISIBLE: usize = 4;
    if tenant_id.chars().count() <= VISIBLE {
        return "[REDACTED]".to_string();
    }
    let prefix: String = tenant_id.chars().take(VISIBLE).collect();
    format!("{}…", prefix)
}
