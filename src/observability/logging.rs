//! Structured logging for the harness and the runner binary
//!
//! ## Log Format Options
//!
//! `LOG_FORMAT` selects the output:
//!
//! - `json` - one JSON object per event, for CI log collection
//! - `pretty` - multi-line human-readable output with colors
//! - `compact` - single-line terminal output (default)
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE - defaults to INFO
//! - `LOG_FORMAT`: json, pretty or compact - defaults to compact
//! - `LOG_SPANS`: include span open/close events (true/false) - defaults to false
//! - `RUST_LOG`: replaces the whole filter when set
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=DEBUG broker-itest run
//! RUST_LOG=broker_itest=trace,rumqttc=debug broker-itest run --filter lwt
//! ```

use once_cell::sync::OnceCell;
use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Parse a level name; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Filter for `level` with the client library and runtime kept quiet
pub fn default_filter(level: Level) -> String {
    format!("{level},rumqttc=warn,tokio=warn")
}

fn build_filter(level: Level) -> EnvFilter {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(default_filter(level)))
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Install the global subscriber. Returns false if one was already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) -> bool {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let installed = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    installed.is_ok()
}

/// Initialize logging from `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
pub fn init_default_logging() -> bool {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()));
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    init_logging(level, format, include_spans)
}

static TEST_LOGGING: OnceCell<()> = OnceCell::new();

/// Route logs through the test harness's captured output; safe to call from every test
pub fn init_test_logging() {
    TEST_LOGGING.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(build_filter(Level::DEBUG))
            .with(fmt::layer().compact().with_test_writer())
            .try_init();
    });
}

/// Span covering one scenario run
#[macro_export]
macro_rules! scenario_span {
    ($($field:tt)*) => {
        tracing::info_span!("scenario", $($field)*)
    };
}

/// Span covering one adapter's lifetime
#[macro_export]
macro_rules! adapter_span {
    ($($field:tt)*) => {
        tracing::debug_span!("adapter", $($field)*)
    };
}

pub use crate::{adapter_span, scenario_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_compact() {
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("Warning"), Level::WARN);
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_default_filter_quiets_dependencies() {
        let filter = default_filter(Level::DEBUG);
        assert!(filter.starts_with("DEBUG"));
        assert!(filter.contains("rumqttc=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::info!("Logged after repeated init");
    }

    #[test]
    fn test_span_macros_expand() {
        let span = scenario_span!(name = "connect");
        let _guard = span.enter();
        let adapter = adapter_span!(client = "Sub0-abcd1234");
        let _inner = adapter.enter();
    }
}
