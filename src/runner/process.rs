//! Agent runner backed by the `codex` and `opencode` CLIs
//!
//! Both CLIs are run non-interactively with JSON-lines output on stdout. The
//! stream is scanned for the session handle and the agent's message parts;
//! anything that is not a JSON object is skipped.

use super::{
    AgentRunRequest, AgentRunResult, AgentRunner, RunnerError, EXIT_NOT_FOUND, EXIT_TIMEOUT,
};
use crate::config::RunnerSection;
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Codex,
    OpenCode,
}

impl Backend {
    /// Anything that is not opencode runs on codex
    fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("opencode") {
            Backend::OpenCode
        } else {
            Backend::Codex
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Backend::Codex => "codex",
            Backend::OpenCode => "opencode",
        }
    }
}

/// Parsed JSON-lines output of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub session_id: Option<String>,
    pub message: String,
}

fn join_messages(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

fn json_lines(stdout: &str) -> impl Iterator<Item = Value> + '_ {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
}

/// `thread.started` carries the session; completed `agent_message` items carry text
pub fn parse_codex_stream(stdout: &str) -> StreamSummary {
    let mut session_id = None;
    let mut parts = Vec::new();

    for event in json_lines(stdout) {
        match event.get("type").and_then(Value::as_str) {
            Some("thread.started") => {
                if let Some(thread_id) = event
                    .get("thread_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                {
                    session_id = Some(thread_id.to_string());
                }
            }
            Some("item.completed") => {
                let item = event.get("item");
                let is_message = item
                    .and_then(|item| item.get("type"))
                    .and_then(Value::as_str)
                    == Some("agent_message");
                if let Some(text) = item
                    .filter(|_| is_message)
                    .and_then(|item| item.get("text"))
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                {
                    parts.push(text.trim().to_string());
                }
            }
            _ => {}
        }
    }

    StreamSummary {
        session_id,
        message: join_messages(parts),
    }
}

/// Any event may carry `sessionID`; `text` events carry `part.text`
pub fn parse_opencode_stream(stdout: &str) -> StreamSummary {
    let mut session_id = None;
    let mut parts = Vec::new();

    for event in json_lines(stdout) {
        if let Some(sid) = event
            .get("sessionID")
            .and_then(Value::as_str)
            .filter(|sid| !sid.trim().is_empty())
        {
            session_id = Some(sid.to_string());
        }

        if event.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(text) = event
                .get("part")
                .and_then(|part| part.get("text"))
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
            {
                parts.push(text.trim().to_string());
            }
        }
    }

    StreamSummary {
        session_id,
        message: join_messages(parts),
    }
}

/// Spawns the configured agent CLIs as child processes
#[derive(Debug, Clone)]
pub struct ProcessAgentRunner {
    settings: RunnerSection,
    /// Working directory for auth checks
    root: PathBuf,
}

impl ProcessAgentRunner {
    pub fn new<P: Into<PathBuf>>(settings: RunnerSection, root: P) -> Self {
        Self {
            settings,
            root: root.into(),
        }
    }

    /// Binary and argument list for a request
    pub fn command_line(&self, request: &AgentRunRequest) -> (String, Vec<String>) {
        let model = request.model.trim();
        let session = request
            .resume_session_id
            .as_deref()
            .filter(|sid| !sid.trim().is_empty());

        match Backend::from_name(&request.backend) {
            Backend::Codex => {
                let mut args = vec!["exec".to_string()];
                if let Some(sid) = session {
                    args.push("resume".to_string());
                    args.push(sid.to_string());
                }
                args.push(request.prompt.clone());

                let model = if model.is_empty() {
                    self.settings.codex_default_model.trim()
                } else {
                    model
                };
                if !model.is_empty() {
                    args.push("-m".to_string());
                    args.push(model.to_string());
                }
                args.push("--json".to_string());
                args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
                (self.settings.codex_binary.clone(), args)
            }
            Backend::OpenCode => {
                let mut args = vec![
                    "run".to_string(),
                    request.prompt.clone(),
                    "--format".to_string(),
                    "json".to_string(),
                ];
                if !model.is_empty() {
                    args.push("--model".to_string());
                    args.push(model.to_string());
                }
                if let Some(sid) = session {
                    args.push("--session".to_string());
                    args.push(sid.to_string());
                }
                (self.settings.opencode_binary.clone(), args)
            }
        }
    }

    async fn check_one(&self, label: &str, binary: &str, args: &[&str]) -> Option<String> {
        let output = Command::new(binary)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => None,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let detail = if stderr.is_empty() {
                    "unknown error".to_string()
                } else {
                    stderr
                };
                Some(format!("{label} auth check failed: {detail}"))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Some(format!("{label} auth check failed: {binary} command not found"))
            }
            Err(e) => Some(format!("{label} auth check failed: {e}")),
        }
    }
}

#[async_trait]
impl AgentRunner for ProcessAgentRunner {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunResult, RunnerError> {
        let backend = Backend::from_name(&request.backend);
        let (binary, args) = self.command_line(&request);
        let prior_session = request.resume_session_id.clone();

        debug!(
            task_id = %request.task_id,
            backend = backend.label(),
            binary = %binary,
            workdir = %request.workdir.display(),
            resume = prior_session.is_some(),
            "Spawning agent process"
        );

        let spawned = Command::new(&binary)
            .args(&args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(binary = %binary, "Agent binary not found");
                return Ok(AgentRunResult::failure(
                    EXIT_NOT_FOUND,
                    format!("{binary} command not found"),
                    prior_session,
                ));
            }
            Err(e) => return Err(RunnerError::spawn(binary, e)),
        };

        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RunnerError::spawn(binary, e)),
            Err(_) => {
                warn!(
                    task_id = %request.task_id,
                    timeout_sec = request.timeout.as_secs(),
                    "Agent run timed out"
                );
                return Ok(AgentRunResult::failure(
                    EXIT_TIMEOUT,
                    format!(
                        "{} run timed out after {} seconds",
                        backend.label(),
                        request.timeout.as_secs()
                    ),
                    prior_session,
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = match backend {
            Backend::Codex => parse_codex_stream(&stdout),
            Backend::OpenCode => parse_opencode_stream(&stdout),
        };

        Ok(AgentRunResult {
            exit_code: output.status.code().unwrap_or(-1),
            session_id: summary.session_id.or(prior_session),
            message: summary.message,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn auth_check(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let codex = self.settings.codex_binary.clone();
        let gh = self.settings.gh_binary.clone();

        if let Some(error) = self.check_one("codex", &codex, &["login", "status"]).await {
            errors.push(error);
        }
        if let Some(error) = self.check_one("github", &gh, &["auth", "status"]).await {
            errors.push(error);
        }
        errors
    }
}
