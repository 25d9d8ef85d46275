//! Pipeline, debate and queue runs
//!
//! Runs are sequential: member tasks are visited in creation order and the
//! state document is reloaded before every step, so edits made between steps
//! (cancellations, manual requeues) are honoured.

use super::dispatcher::format_blocked;
use super::TeamEngine;
use crate::aggregate::{recompute_debate_status, recompute_pipeline_status};
use crate::error::TeamResult;
use crate::graph::BlockedTask;
use crate::run_span;
use crate::state::{OwnerStatus, TaskStatus};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{info, warn, Instrument};

/// Cap applied when a drain is started without one
pub const DEFAULT_DRAIN_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerKind {
    Pipeline,
    Debate,
}

impl OwnerKind {
    fn label(&self) -> &'static str {
        match self {
            OwnerKind::Pipeline => "pipeline",
            OwnerKind::Debate => "debate",
        }
    }

    fn payload(&self, id: &str, extra: &[(&str, Value)]) -> Value {
        let mut payload = Map::new();
        payload.insert(format!("{}_id", self.label()), json!(id));
        for (key, value) in extra {
            payload.insert((*key).to_string(), value.clone());
        }
        Value::Object(payload)
    }
}

/// Result of running a pipeline or debate
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    NotRunning,
    NotFound { id: String },
    Stopped { reason: String, exit_code: i32 },
    Finished { status: OwnerStatus },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::NotRunning | RunOutcome::NotFound { .. } => 1,
            RunOutcome::Stopped { exit_code, .. } => *exit_code,
            RunOutcome::Finished { .. } => 0,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::NotRunning => write!(f, "Team is not running. Use start/resume first."),
            RunOutcome::NotFound { id } => write!(f, "Not found: {id}"),
            RunOutcome::Stopped { reason, .. } => write!(f, "Run stopped: {reason}"),
            RunOutcome::Finished { status } => write!(f, "Final status: {status}"),
        }
    }
}

/// Result of draining the ready queue
#[derive(Debug, Clone, PartialEq)]
pub struct DrainSummary {
    pub executed: usize,
    pub exit_code: i32,
    /// Task whose failure ended the drain
    pub stopped_on: Option<String>,
    /// Tasks still queued but not ready when the drain ran dry
    pub blocked: Vec<BlockedTask>,
    pub team_running: bool,
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.team_running {
            return write!(f, "Team is not running. Use start/resume first.");
        }
        if let Some(task_id) = &self.stopped_on {
            return write!(f, "Drain stopped after failure on {task_id}");
        }
        if !self.blocked.is_empty() {
            writeln!(f, "Queue has blocked tasks only.")?;
            writeln!(f, "{}", format_blocked(&self.blocked))?;
        }
        write!(f, "Drain executed {} task(s).", self.executed)
    }
}

impl TeamEngine {
    pub async fn run_pipeline(
        &self,
        pipeline_id: &str,
        stop_on_failure: bool,
    ) -> TeamResult<RunOutcome> {
        let span = run_span!(kind = "pipeline", id = %pipeline_id);
        self.run_owner(OwnerKind::Pipeline, pipeline_id, stop_on_failure)
            .instrument(span)
            .await
    }

    pub async fn run_debate(&self, debate_id: &str, stop_on_failure: bool) -> TeamResult<RunOutcome> {
        let span = run_span!(kind = "debate", id = %debate_id);
        self.run_owner(OwnerKind::Debate, debate_id, stop_on_failure)
            .instrument(span)
            .await
    }

    async fn run_owner(
        &self,
        kind: OwnerKind,
        id: &str,
        stop_on_failure: bool,
    ) -> TeamResult<RunOutcome> {
        let label = kind.label();
        let state = self.load_state()?;
        if !state.is_running() {
            warn!("Run refused: team is not running");
            return Ok(RunOutcome::NotRunning);
        }

        let task_ids = match kind {
            OwnerKind::Pipeline => state.pipeline(id).map(|p| p.task_ids.clone()),
            OwnerKind::Debate => state.debate(id).map(|d| d.task_ids.clone()),
        };
        let Some(task_ids) = task_ids else {
            return Ok(RunOutcome::NotFound { id: id.to_string() });
        };

        info!(tasks = task_ids.len(), "Run started");
        self.emit(&format!("{label}_run_started"), kind.payload(id, &[]));

        for task_id in &task_ids {
            let state = self.load_state()?;
            let stop_reason = match state.task(task_id).map(|task| task.status) {
                None => {
                    warn!(task_id = %task_id, "Missing member task");
                    Some((format!("missing task {task_id}"), 1))
                }
                Some(TaskStatus::Done) => continue,
                Some(TaskStatus::Failed) => {
                    warn!(task_id = %task_id, "Member task already failed");
                    Some((format!("failed task {task_id}"), 1))
                }
                Some(_) => {
                    let outcome = self.dispatch_one(Some(task_id)).await?;
                    let code = outcome.exit_code();
                    (code != 0).then(|| (format!("dispatch failure on {task_id}"), code))
                }
            };

            if let Some((reason, exit_code)) = stop_reason {
                if stop_on_failure {
                    warn!(reason = %reason, "Run stopped");
                    self.emit(
                        &format!("{label}_run_stopped"),
                        kind.payload(id, &[("reason", json!(reason))]),
                    );
                    return Ok(RunOutcome::Stopped { reason, exit_code });
                }
            }
        }

        let mut state = self.load_state()?;
        let now = self.now();
        let status = match kind {
            OwnerKind::Pipeline => recompute_pipeline_status(&mut state, id, self.events.as_ref(), now),
            OwnerKind::Debate => recompute_debate_status(&mut state, id, self.events.as_ref(), now),
        }
        .unwrap_or_default();
        self.save_state(&mut state)?;

        info!(status = %status, "Run finished");
        self.emit(
            &format!("{label}_run_finished"),
            kind.payload(id, &[("status", json!(status))]),
        );
        Ok(RunOutcome::Finished { status })
    }

    /// Dispatch ready tasks until none remain or `max_tasks` ran (0 means
    /// [`DEFAULT_DRAIN_LIMIT`]). A failure ends the drain unless `continue_on_failure`.
    pub async fn drain_ready(
        &self,
        max_tasks: usize,
        continue_on_failure: bool,
    ) -> TeamResult<DrainSummary> {
        let limit = if max_tasks == 0 {
            DEFAULT_DRAIN_LIMIT
        } else {
            max_tasks
        };
        let mut summary = DrainSummary {
            executed: 0,
            exit_code: 0,
            stopped_on: None,
            blocked: Vec::new(),
            team_running: true,
        };

        if !self.load_state()?.is_running() {
            warn!("Drain refused: team is not running");
            summary.team_running = false;
            summary.exit_code = 1;
            return Ok(summary);
        }

        while summary.executed < limit {
            let state = self.load_state()?;
            let now = self.now();
            let Some(task_id) = state.next_queued_task(now).map(|task| task.id.clone()) else {
                summary.blocked = state.blocked_report(now);
                break;
            };

            let outcome = self.dispatch_one(Some(&task_id)).await?;
            summary.executed += 1;
            let code = outcome.exit_code();
            if code != 0 && !continue_on_failure {
                warn!(task_id = %task_id, exit_code = code, "Drain stopped after failure");
                summary.exit_code = code;
                summary.stopped_on = Some(task_id);
                return Ok(summary);
            }
        }

        info!(executed = summary.executed, "Drain finished");
        Ok(summary)
    }
}
