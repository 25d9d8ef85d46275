//! Task dispatch
//!
//! Runs one ready task through its role's model chain. Each chain entry gets up
//! to `1 + max_output_format_retries` attempts; a non-zero exit abandons the
//! entry at once, malformed output is retried with correction feedback. The
//! task ends `done`, `failed`, or back in `queued` with a `retry_at` when every
//! entry hit a quota limit.

use super::prompt::{build_handoff_context, build_task_prompt};
use super::retry::{resolve, AttemptDecision, EntryOutcome, Resolution};
use super::TeamEngine;
use crate::aggregate::settle_owners;
use crate::contract::{
    build_compression_summary, extract_contract, format_contract_error_feedback,
    validate_task_output, OutputContract,
};
use crate::dispatch_span;
use crate::error::{sanitize_error_message, TeamError, TeamResult};
use crate::graph::BlockedTask;
use crate::runner::{AgentRunRequest, AgentRunResult};
use crate::state::{ModelChainEntry, RoleActivity, RuntimeState, Task, TaskStatus};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const EMPTY_MESSAGE_PLACEHOLDER: &str = "No message returned by model runner.";
const BLOCKED_PREVIEW: usize = 5;

/// Result of a dispatch request
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed {
        task_id: String,
        output_path: String,
        attempts: u32,
    },
    Deferred {
        task_id: String,
        retry_at: Option<String>,
    },
    Failed {
        task_id: String,
        error: String,
        exit_code: i32,
    },
    NotRunning,
    NotFound {
        task_id: String,
    },
    NotQueued {
        task_id: String,
        status: TaskStatus,
    },
    /// Explicitly requested task is still inside its deferral window
    AlreadyDeferred {
        task_id: String,
        retry_at: Option<String>,
    },
    Blocked {
        task_id: String,
        waiting_for: Vec<String>,
    },
    /// Nothing ready to run
    Idle {
        blocked: Vec<BlockedTask>,
    },
}

impl DispatchOutcome {
    /// Process exit code: 0 for done, deferred and idle; the failing run's code otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchOutcome::Completed { .. }
            | DispatchOutcome::Deferred { .. }
            | DispatchOutcome::AlreadyDeferred { .. }
            | DispatchOutcome::Idle { .. } => 0,
            DispatchOutcome::Failed { exit_code, .. } => *exit_code,
            DispatchOutcome::NotRunning
            | DispatchOutcome::NotFound { .. }
            | DispatchOutcome::NotQueued { .. }
            | DispatchOutcome::Blocked { .. } => 1,
        }
    }

    /// The task this outcome concerns, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Completed { task_id, .. }
            | DispatchOutcome::Deferred { task_id, .. }
            | DispatchOutcome::Failed { task_id, .. }
            | DispatchOutcome::NotFound { task_id }
            | DispatchOutcome::NotQueued { task_id, .. }
            | DispatchOutcome::AlreadyDeferred { task_id, .. }
            | DispatchOutcome::Blocked { task_id, .. } => Some(task_id),
            DispatchOutcome::NotRunning | DispatchOutcome::Idle { .. } => None,
        }
    }
}

fn describe_blocked(item: &BlockedTask) -> String {
    match &item.retry_at {
        Some(retry_at) => format!("- {} [{}] deferred until {retry_at}", item.task_id, item.role),
        None => {
            let deps = if item.waiting_for.is_empty() {
                "-".to_string()
            } else {
                item.waiting_for.join(", ")
            };
            format!("- {} [{}] waiting for {deps}", item.task_id, item.role)
        }
    }
}

/// Up to five blocked tasks, one per line, with a count of the rest
pub fn format_blocked(blocked: &[BlockedTask]) -> String {
    let mut lines: Vec<String> = blocked.iter().take(BLOCKED_PREVIEW).map(describe_blocked).collect();
    if blocked.len() > BLOCKED_PREVIEW {
        lines.push(format!("... and {} more", blocked.len() - BLOCKED_PREVIEW));
    }
    lines.join("\n")
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Completed {
                task_id,
                output_path,
                ..
            } => write!(f, "Completed {task_id}\nOutput: {output_path}"),
            DispatchOutcome::Deferred { task_id, retry_at } => write!(
                f,
                "Deferred {task_id} until {} after model quota exhaustion.",
                retry_at.as_deref().unwrap_or("-")
            ),
            DispatchOutcome::Failed { task_id, error, .. } => {
                write!(f, "Failed {task_id}\n{error}")
            }
            DispatchOutcome::NotRunning => {
                write!(f, "Team is not running. Use start/resume first.")
            }
            DispatchOutcome::NotFound { task_id } => write!(f, "Task not found: {task_id}"),
            DispatchOutcome::NotQueued { task_id, status } => {
                write!(f, "Task {task_id} is not queued (status={status}).")
            }
            DispatchOutcome::AlreadyDeferred { task_id, retry_at } => write!(
                f,
                "Task {task_id} is deferred until {}.",
                retry_at.as_deref().unwrap_or("-")
            ),
            DispatchOutcome::Blocked { task_id, .. } => {
                write!(f, "Task {task_id} is blocked by unfinished dependencies.")
            }
            DispatchOutcome::Idle { blocked } if blocked.is_empty() => {
                write!(f, "No queued task found.")
            }
            DispatchOutcome::Idle { blocked } => write!(
                f,
                "No ready queued task. Blocked tasks:\n{}",
                format_blocked(blocked)
            ),
        }
    }
}

/// The attempt that produced acceptable output
struct AcceptedRun {
    entry: ModelChainEntry,
    session_id: Option<String>,
    message: String,
    contract: Option<Map<String, Value>>,
}

/// Everything the chain loop learned about one task
struct ChainReport {
    attempts: u32,
    attempted: Vec<ModelChainEntry>,
    exhausted: Vec<ModelChainEntry>,
    outcomes: Vec<EntryOutcome>,
    accepted: Option<AcceptedRun>,
}

impl TeamEngine {
    /// Dispatch `task_id`, or the next ready task when `None`
    pub async fn dispatch_one(&self, task_id: Option<&str>) -> TeamResult<DispatchOutcome> {
        let mut state = self.load_state()?;
        let now = self.now();

        if !state.is_running() {
            warn!("Dispatch refused: team is not running");
            return Ok(DispatchOutcome::NotRunning);
        }

        let selected = match task_id {
            Some(requested) => {
                let Some(task) = state.task(requested) else {
                    return Ok(DispatchOutcome::NotFound {
                        task_id: requested.to_string(),
                    });
                };
                if task.status != TaskStatus::Queued {
                    return Ok(DispatchOutcome::NotQueued {
                        task_id: task.id.clone(),
                        status: task.status,
                    });
                }
                if task.is_deferred(now) {
                    return Ok(DispatchOutcome::AlreadyDeferred {
                        task_id: task.id.clone(),
                        retry_at: task.metadata.retry_at.clone(),
                    });
                }
                if !state.is_task_ready(task) {
                    return Ok(DispatchOutcome::Blocked {
                        task_id: task.id.clone(),
                        waiting_for: state.describe_blocked(task, now).waiting_for,
                    });
                }
                task.id.clone()
            }
            None => match state.next_queued_task(now) {
                Some(task) => task.id.clone(),
                None => {
                    return Ok(DispatchOutcome::Idle {
                        blocked: state.blocked_report(now),
                    })
                }
            },
        };

        let role = state
            .task(&selected)
            .map(|task| task.role.clone())
            .unwrap_or_default();
        let span = dispatch_span!(
            dispatch_id = %Uuid::new_v4(),
            task_id = %selected,
            role = %role
        );
        self.dispatch_task(&mut state, &selected).instrument(span).await
    }

    async fn dispatch_task(
        &self,
        state: &mut RuntimeState,
        task_id: &str,
    ) -> TeamResult<DispatchOutcome> {
        let started = self.now();
        let task = {
            let task = state
                .task_mut(task_id)
                .ok_or_else(|| TeamError::task_not_found(task_id))?;
            task.status = TaskStatus::Running;
            task.started_at = Some(started);
            task.updated_at = started;
            task.metadata.retry_at = None;
            task.clone()
        };
        let role = task.role.clone();
        state.ensure_role(&role).state = RoleActivity::Busy;
        self.save_state(state)?;

        let workdir = self.catalog.workspace_dir(&role);
        let chain = self.router.chain_for_role(&role);
        info!(
            workdir = %workdir.display(),
            chain_len = chain.len(),
            "Task started"
        );
        self.emit(
            "task_started",
            json!({
                "task_id": task.id,
                "role": role,
                "pipeline_id": task.pipeline_id(),
                "debate_id": task.debate_id(),
                "workdir": workdir.display().to_string(),
                "model_chain": chain,
            }),
        );

        let handoff = build_handoff_context(state, &task, &self.reports);
        let report = self.run_chain(state, &task, &chain, &handoff, &workdir).await;
        let outcome = self.settle(state, &task, &workdir, report)?;

        self.save_state(state)?;
        Ok(outcome)
    }

    async fn run_chain(
        &self,
        state: &RuntimeState,
        task: &Task,
        chain: &[ModelChainEntry],
        handoff: &str,
        workdir: &Path,
    ) -> ChainReport {
        let role = task.role.as_str();
        let timeout = Duration::from_secs(self.config.runtime.effective_timeout_sec());
        let mut report = ChainReport {
            attempts: 0,
            attempted: Vec::new(),
            exhausted: Vec::new(),
            outcomes: Vec::new(),
            accepted: None,
        };

        for (index, entry) in chain.iter().enumerate() {
            let model_index = index + 1;
            report.attempted.push(entry.clone());
            let mut session = state
                .roles
                .get(role)
                .and_then(|role_state| role_state.reusable_session(entry));

            debug!(
                backend = %entry.backend,
                model = %entry.model,
                model_index,
                resume = session.is_some(),
                "Trying chain entry"
            );
            self.emit(
                "task_model_attempt_started",
                json!({
                    "task_id": task.id,
                    "role": role,
                    "model_index": model_index,
                    "backend": entry.backend,
                    "model": entry.model,
                }),
            );

            let mut feedback = String::new();
            let mut violations: Vec<String> = Vec::new();
            let mut format_attempt: u32 = 0;

            let outcome = loop {
                format_attempt += 1;
                report.attempts += 1;

                let request = AgentRunRequest {
                    role: role.to_string(),
                    task_id: task.id.clone(),
                    prompt: build_task_prompt(&self.catalog, task, handoff, workdir, &feedback),
                    resume_session_id: session.clone(),
                    backend: entry.backend.clone(),
                    model: entry.model.clone(),
                    workdir: workdir.to_path_buf(),
                    timeout,
                };
                let result = match self.runner.run(request).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "Agent runner failed");
                        AgentRunResult::failure(-1, e.to_string(), session.clone())
                    }
                };

                if let Some(sid) = result.session_id.as_deref().filter(|sid| !sid.is_empty()) {
                    session = Some(sid.to_string());
                }

                let (contract, found) = if result.succeeded() {
                    let contract = extract_contract(&result.message);
                    let found =
                        validate_task_output(role, &task.id, &result.message, contract.as_ref());
                    (contract, found)
                } else {
                    (None, Vec::new())
                };

                match self
                    .retry
                    .decide(format_attempt, result.exit_code, &found)
                {
                    AttemptDecision::Accept => {
                        report.accepted = Some(AcceptedRun {
                            entry: entry.clone(),
                            session_id: session.clone(),
                            message: result.message,
                            contract,
                        });
                        break EntryOutcome::Accepted;
                    }
                    _ if !result.succeeded() => {
                        let stderr = sanitize_error_message(result.stderr.trim());
                        warn!(
                            backend = %entry.backend,
                            model = %entry.model,
                            attempt = report.attempts,
                            exit_code = result.exit_code,
                            "Agent run failed"
                        );
                        self.emit(
                            "task_model_attempt_failed",
                            json!({
                                "task_id": task.id,
                                "role": role,
                                "backend": entry.backend,
                                "model": entry.model,
                                "model_index": model_index,
                                "attempt": report.attempts,
                                "stderr": stderr,
                            }),
                        );
                        break EntryOutcome::Abandoned {
                            violations: violations.clone(),
                            exit_code: result.exit_code,
                            quota_exhausted: self.router.is_quota_error(&result.stderr),
                            stderr,
                        };
                    }
                    decision => {
                        violations = found;
                        warn!(
                            attempt = report.attempts,
                            format_attempt,
                            violations = violations.len(),
                            "Output contract invalid"
                        );
                        self.emit(
                            "task_output_contract_invalid",
                            json!({
                                "task_id": task.id,
                                "role": role,
                                "backend": entry.backend,
                                "model": entry.model,
                                "model_index": model_index,
                                "attempt": report.attempts,
                                "format_attempt": format_attempt,
                                "errors": violations,
                            }),
                        );
                        if decision == AttemptDecision::RetryWithFeedback {
                            feedback = format_contract_error_feedback(&violations, &task.id, role);
                            continue;
                        }
                        break EntryOutcome::Abandoned {
                            violations: violations.clone(),
                            exit_code: result.exit_code,
                            stderr: sanitize_error_message(result.stderr.trim()),
                            quota_exhausted: false,
                        };
                    }
                }
            };

            if outcome.is_quota_exhausted() {
                warn!(backend = %entry.backend, model = %entry.model, "Model quota exhausted");
                report.exhausted.push(entry.clone());
                self.emit(
                    "task_model_quota_exhausted",
                    json!({
                        "task_id": task.id,
                        "role": role,
                        "backend": entry.backend,
                        "model": entry.model,
                        "model_index": model_index,
                    }),
                );
            }

            let accepted = outcome == EntryOutcome::Accepted;
            report.outcomes.push(outcome);
            if accepted {
                break;
            }
        }

        report
    }

    /// Apply the chain result to the task and its role, then settle owners
    fn settle(
        &self,
        state: &mut RuntimeState,
        task: &Task,
        workdir: &Path,
        report: ChainReport,
    ) -> TeamResult<DispatchOutcome> {
        let finished = self.now();
        let task_id = task.id.as_str();
        let role = task.role.as_str();
        let last_entry = report.attempted.last().cloned();

        let outcome = match resolve(&report.outcomes, self.router.defer_enabled()) {
            Resolution::Complete => {
                let accepted = report
                    .accepted
                    .ok_or_else(|| TeamError::internal("accepted run missing from chain report"))?;
                let content = if accepted.message.trim().is_empty() {
                    EMPTY_MESSAGE_PLACEHOLDER
                } else {
                    accepted.message.as_str()
                };
                let output_path = self.reports.write_output(task_id, content)?;

                let contract = accepted.contract.as_ref().map(OutputContract::from_object);
                let compression_path = match &contract {
                    Some(contract) => {
                        let digest = build_compression_summary(task_id, &task.title, contract);
                        let path = self.reports.write_compression(task_id, &digest)?;
                        self.emit(
                            "task_compression_written",
                            json!({
                                "task_id": task_id,
                                "role": role,
                                "compression_path": path,
                            }),
                        );
                        Some(path)
                    }
                    None => None,
                };

                let role_state = state.ensure_role(role);
                role_state.remember_session(accepted.session_id.clone(), &accepted.entry);
                role_state.tasks_completed += 1;

                if let Some(stored) = state.task_mut(task_id) {
                    stored.status = TaskStatus::Done;
                    stored.error = None;
                    stored.output_path = Some(output_path.clone());
                    stored.finished_at = Some(finished);
                    stored.metadata.runner_backend = Some(accepted.entry.backend.clone());
                    stored.metadata.runner_model =
                        Some(accepted.entry.model.clone()).filter(|model| !model.is_empty());
                    stored.metadata.attempted_models = report.attempted.clone();
                    stored.metadata.output_contract = contract;
                    stored.metadata.compression_path = compression_path;
                }

                info!(
                    attempts = report.attempts,
                    backend = %accepted.entry.backend,
                    model = %accepted.entry.model,
                    output_path = %output_path,
                    "Task completed"
                );
                self.emit(
                    "task_completed",
                    json!({
                        "task_id": task_id,
                        "role": role,
                        "pipeline_id": task.pipeline_id(),
                        "debate_id": task.debate_id(),
                        "workdir": workdir.display().to_string(),
                        "output_path": output_path,
                        "attempts": report.attempts,
                        "backend": accepted.entry.backend,
                        "model": accepted.entry.model,
                    }),
                );
                DispatchOutcome::Completed {
                    task_id: task_id.to_string(),
                    output_path,
                    attempts: report.attempts,
                }
            }
            Resolution::Defer => {
                let minutes = self.router.defer_minutes();
                let reason = format!(
                    "All configured models hit quota/rate limits. Deferred for {minutes} minutes."
                );
                let mut retry_at = None;
                if let Some(stored) = state.task_mut(task_id) {
                    stored.set_retry(minutes, &reason, finished);
                    stored.metadata.attempted_models = report.attempted.clone();
                    stored.metadata.quota_exhausted_models = report.exhausted.clone();
                    retry_at = stored.metadata.retry_at.clone();
                }

                info!(retry_at = ?retry_at, minutes, "Task deferred after quota exhaustion");
                self.emit(
                    "task_deferred_quota_exhausted",
                    json!({
                        "task_id": task_id,
                        "role": role,
                        "retry_at": retry_at,
                        "attempted_models": report.attempted,
                    }),
                );
                DispatchOutcome::Deferred {
                    task_id: task_id.to_string(),
                    retry_at,
                }
            }
            Resolution::Fail {
                error: message,
                exit_code,
            } => {
                if let Some(stored) = state.task_mut(task_id) {
                    stored.status = TaskStatus::Failed;
                    stored.error = Some(message.clone());
                    stored.finished_at = Some(finished);
                    stored.metadata.attempted_models = report.attempted.clone();
                }

                error!(
                    attempts = report.attempts,
                    exit_code,
                    error = %message,
                    "Task failed"
                );
                self.emit(
                    "task_failed",
                    json!({
                        "task_id": task_id,
                        "role": role,
                        "pipeline_id": task.pipeline_id(),
                        "debate_id": task.debate_id(),
                        "workdir": workdir.display().to_string(),
                        "error": message,
                        "attempts": report.attempts,
                        "backend": last_entry.as_ref().map(|entry| entry.backend.clone()),
                        "model": last_entry.as_ref().map(|entry| entry.model.clone()),
                        "attempted_models": report.attempted,
                    }),
                );
                DispatchOutcome::Failed {
                    task_id: task_id.to_string(),
                    error: message,
                    exit_code,
                }
            }
        };

        let role_state = state.ensure_role(role);
        role_state.state = RoleActivity::Idle;
        role_state.last_active_at = Some(finished);
        let session_id = role_state.session_id.clone();
        if let Some(stored) = state.task_mut(task_id) {
            stored.session_id = session_id;
            stored.updated_at = finished;
        }

        settle_owners(state, task_id, self.events.as_ref(), finished);
        Ok(outcome)
    }
}
