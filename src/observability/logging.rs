//! Structured logging using the tracing crate
//!
//! Diagnostics go to stderr so command output on stdout stays machine-readable.
//! The NDJSON audit log written by [`crate::events::JsonlEventLog`] is separate.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG, TRACE. Defaults to WARN, raised by `-v` on the CLI
//! - `LOG_FORMAT`: json, pretty, compact. Defaults to compact
//! - `LOG_SPANS`: include span open/close events (true/false)
//! - `RUST_LOG`: overrides the filter entirely
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=INFO team drain
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-readable, one JSON object per line
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Parse a level name; unknown names yield `None`
pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Level for a count of `-v` flags on top of `base`
pub fn level_for_verbosity(base: Level, verbosity: u8) -> Level {
    let ladder = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    let start = ladder.iter().position(|l| *l == base).unwrap_or(1);
    ladder[(start + verbosity as usize).min(ladder.len() - 1)]
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Install the global subscriber. Returns false when one is already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) -> bool {
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(format!("{},tokio=warn", level.as_str().to_lowercase())),
    };
    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };
    installed.is_ok()
}

/// Initialize logging from the environment, raised by `verbosity` levels
pub fn init_default_logging(verbosity: u8) -> bool {
    let base = env::var("LOG_LEVEL")
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(Level::WARN);
    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let include_spans = env::var("LOG_SPANS")
        .map(|value| value.to_lowercase() == "true")
        .unwrap_or(false);

    init_logging(
        level_for_verbosity(base, verbosity),
        LogFormat::parse(&format),
        include_spans,
    )
}

/// Span around one dispatch, from selection to settlement
#[macro_export]
macro_rules! dispatch_span {
    ($($field:tt)*) => {
        tracing::info_span!("task_dispatch", $($field)*)
    };
}

/// Span around a pipeline or debate run
#[macro_export]
macro_rules! run_span {
    ($($field:tt)*) => {
        tracing::info_span!("owner_run", $($field)*)
    };
}

/// Span around start/stop/resume
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {dispatch_span, lifecycle_span, run_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_unknown_defaults_to_compact() {
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_verbosity_ladder() {
        assert_eq!(level_for_verbosity(Level::WARN, 0), Level::WARN);
        assert_eq!(level_for_verbosity(Level::WARN, 1), Level::INFO);
        assert_eq!(level_for_verbosity(Level::WARN, 2), Level::DEBUG);
        assert_eq!(level_for_verbosity(Level::WARN, 9), Level::TRACE);
        assert_eq!(level_for_verbosity(Level::ERROR, 1), Level::WARN);
    }
}
