//! Agent runner abstraction
//!
//! The engine hands a fully assembled prompt to an [`AgentRunner`] and gets back
//! the agent's final message, its session handle, and an exit code. Process
//! failures that can be classified (binary missing, timeout) come back as exit
//! codes, not errors; `RunnerError` is reserved for the runner itself breaking.

pub mod process;

pub use process::{parse_codex_stream, parse_opencode_stream, ProcessAgentRunner, StreamSummary};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code reported when the backend binary cannot be found
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when a run exceeds its timeout
pub const EXIT_TIMEOUT: i32 = 124;

/// One agent invocation
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunRequest {
    pub role: String,
    pub task_id: String,
    pub prompt: String,
    pub resume_session_id: Option<String>,
    /// Lower-case backend name (`codex`, `opencode`)
    pub backend: String,
    /// Empty means the backend's default
    pub model: String,
    pub workdir: PathBuf,
    pub timeout: Duration,
}

/// Outcome of one agent invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentRunResult {
    pub exit_code: i32,
    /// Session handle reported by the run, or the one that was resumed
    pub session_id: Option<String>,
    pub message: String,
    pub stderr: String,
}

impl AgentRunResult {
    pub fn success<S: Into<String>>(message: S, session_id: Option<String>) -> Self {
        Self {
            exit_code: 0,
            session_id,
            message: message.into(),
            stderr: String::new(),
        }
    }

    pub fn failure<S: Into<String>>(exit_code: i32, stderr: S, session_id: Option<String>) -> Self {
        Self {
            exit_code,
            session_id,
            message: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runner errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    pub fn spawn<S: Into<String>>(binary: S, source: std::io::Error) -> Self {
        Self::Spawn {
            binary: binary.into(),
            source,
        }
    }
}

/// Executes agent turns for the dispatch engine
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunResult, RunnerError>;

    /// Human-readable authentication problems; empty means ready
    async fn auth_check(&self) -> Vec<String> {
        Vec::new()
    }
}
