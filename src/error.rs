//! Error types for the team orchestration engine
//!
//! Config and state layers own narrow error enums (`ConfigError`, `StoreError`);
//! `TeamError` is the crate-wide type the engine's public operations return.
//! Agent runner failures never surface here: they are recorded on the task.

use crate::config::ConfigError;
use crate::state::StoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum TeamError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Report I/O failed for {path}: {source}")]
    ReportIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Invalid transition for {task_id}: {message}")]
    InvalidTransition { task_id: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TeamError {
    /// Create task-not-found error
    pub fn task_not_found<S: Into<String>>(task_id: S) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    /// Create invalid transition error
    pub fn invalid_transition<S: Into<String>, M: Into<String>>(task_id: S, message: M) -> Self {
        Self::InvalidTransition {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap a report file failure with the path it concerned
    pub fn report_io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::ReportIo {
            path: path.display().to_string(),
            source,
        }
    }

    /// Whether this error must abort the process instead of being reported on a task.
    ///
    /// Only an unreadable state document qualifies.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TeamError::Store(StoreError::Decode { .. }))
    }
}

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("static regex is valid")
});

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("static regex is valid")
});

const MAX_ERROR_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact secret-looking fragments from backend output before it is persisted
/// on a task or written to the event log.
pub fn sanitize_error_message(message: &str) -> String {
    let redacted = SECRET_ASSIGNMENT.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH
        .replace_all(&redacted, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for engine operations
pub type TeamResult<T> = Result<T, TeamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_redacts_tokens() {
        let sanitized = sanitize_error_message("request failed token=abc123 retrying");
        assert!(sanitized.contains("token=***"));
        assert!(!sanitized.contains("abc123"));
    }

    #[test]
    fn test_sanitize_redacts_sensitive_paths() {
        let sanitized = sanitize_error_message("cannot open /home/dev/.ssh/id_rsa");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("id_rsa"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let long = "x".repeat(2000);
        let sanitized = sanitize_error_message(&long);
        assert_eq!(sanitized.len(), MAX_ERROR_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let sanitized = sanitize_error_message(&long);
        assert!(sanitized.len() <= MAX_ERROR_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_sanitize_leaves_plain_messages_alone() {
        assert_eq!(
            sanitize_error_message("Model execution failed"),
            "Model execution failed"
        );
    }

    #[test]
    fn test_error_constructors() {
        let err = TeamError::task_not_found("TASK-0009");
        assert_eq!(err.to_string(), "Task not found: TASK-0009");

        let err = TeamError::invalid_transition("TASK-0001", "task is running");
        assert!(err.to_string().contains("TASK-0001"));
        assert!(!err.is_fatal());
    }
}
