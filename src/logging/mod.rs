//! Logging configuration and initialization
//!
//! This module provides centralized logging setup using the `tracing`
//! ecosystem. It supports both human-readable and JSON output formats,
//! configurable via environment variables or programmatically.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "info", "debug,flowforge=trace")
//! - `FLOWFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `FLOWFORGE_LOG_FORMAT`: Output format ("human" or "json")

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global flag to track if tracing has been initialized
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Environment variable for log level override
const LOG_LEVEL_ENV: &str = "FLOWFORGE_LOG_LEVEL";

/// Environment variable for log format (json/human)
const LOG_FORMAT_ENV: &str = "FLOWFORGE_LOG_FORMAT";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Invalid log level string provided
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Invalid log format string provided
    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),
}

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to EnvFilter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable colored output (default)
    #[default]
    Human,
    /// JSON structured output
    Json,
}

impl LogFormat {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log level to use
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Whether to include file/line in logs
    pub with_file_info: bool,
    /// Whether to include span events
    pub with_span_events: bool,
}

impl LoggingConfig {
    /// Create a new default logging configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable file/line information
    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }
}

/// Initialize logging with default configuration.
///
/// Uses the `FLOWFORGE_LOG_LEVEL` and `FLOWFORGE_LOG_FORMAT` environment
/// variables if set, otherwise defaults to `info` level and human-readable
/// format.
///
/// This function is idempotent - calling it multiple times will only
/// initialize the subscriber once.
pub fn init_logging_default() {
    init_logging_from_env().ok();
}

/// Initialize logging from environment variables.
///
/// Reads `RUST_LOG` (standard tracing filter), `FLOWFORGE_LOG_LEVEL` and
/// `FLOWFORGE_LOG_FORMAT`, falling back to defaults when unset.
///
/// This function is idempotent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    TRACING_INITIALIZED.get_or_init(|| {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or_default();

        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or_default();

        let config = LoggingConfig::new().with_level(level).with_format(format);

        // Ignore errors during initialization
        let _ = init_with_config_internal(&config);
    });
    Ok(())
}

/// Initialize logging with a custom configuration.
///
/// This function is idempotent.
pub fn init_with_config(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let _ = init_with_config_internal(config);
    });
}

/// Internal initialization that can return errors
fn init_with_config_internal(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(config.level)?;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(false)
                .with_file(config.with_file_info)
                .with_line_number(config.with_file_info)
                .with_span_events(span_events(config.with_span_events));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .init();
        }
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(config.with_file_info)
                .with_line_number(config.with_file_info)
                .with_span_events(span_events(config.with_span_events));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .init();
        }
    }

    Ok(())
}

/// Helper to convert bool to FmtSpan
fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Build the environment filter for log level.
/// Tries RUST_LOG first (standard tracing convention), then FLOWFORGE_LOG_LEVEL.
fn build_env_filter(default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(rust_log)
            .map_err(|e| LoggingError::InvalidLogLevel(e.to_string()));
    }

    if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
        if let Some(level) = LogLevel::parse(&level) {
            return Ok(EnvFilter::new(level.as_filter_str()));
        }
    }

    Ok(EnvFilter::new(default_level.as_filter_str()))
}

/// Check if tracing has been initialized
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}
