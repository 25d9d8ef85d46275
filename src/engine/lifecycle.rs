//! Team lifecycle, work creation and status queries

use super::TeamEngine;
use crate::aggregate::{recover_inflight, refresh_all};
use crate::contract::extract_contract;
use crate::error::{TeamError, TeamResult};
use crate::lifecycle_span;
use crate::state::{
    Debate, OwnerStatus, Pipeline, RoleActivity, RuntimeState, Task, TaskMetadata, TaskStatus,
    TeamStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{info, warn, Instrument};

/// Characters of a report shown by `task_report` before truncation
pub const REPORT_CHAR_LIMIT: usize = 5000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: usize,
    /// Subset of `queued` still inside a deferral window
    pub deferred: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

/// Pipeline or debate counts; `running` includes `in_progress`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OwnerCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl OwnerCounts {
    fn tally<I: IntoIterator<Item = OwnerStatus>>(statuses: I) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                OwnerStatus::Queued => counts.queued += 1,
                OwnerStatus::Running | OwnerStatus::InProgress => counts.running += 1,
                OwnerStatus::Done => counts.done += 1,
                OwnerStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleSummary {
    pub role: String,
    pub state: RoleActivity,
    /// First eight characters of the session handle
    pub session: Option<String>,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub tasks_completed: u64,
}

/// Point-in-time view of the team for `status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamSnapshot {
    pub status: TeamStatus,
    pub profile: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub tasks: TaskCounts,
    pub pipelines: OwnerCounts,
    pub debates: OwnerCounts,
    pub roles: Vec<RoleSummary>,
}

fn short_session(session_id: &str) -> String {
    let short: String = session_id.chars().take(8).collect();
    format!("{short}...")
}

fn blank_as_none(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

impl TeamSnapshot {
    pub fn from_state(state: &RuntimeState, now: DateTime<Utc>) -> Self {
        let mut tasks = TaskCounts::default();
        for task in &state.tasks {
            match task.status {
                TaskStatus::Queued => {
                    tasks.queued += 1;
                    if task.is_deferred(now) {
                        tasks.deferred += 1;
                    }
                }
                TaskStatus::Running => tasks.running += 1,
                TaskStatus::Done => tasks.done += 1,
                TaskStatus::Failed => tasks.failed += 1,
            }
        }

        let roles = state
            .roles
            .iter()
            .map(|(role, info)| RoleSummary {
                role: role.clone(),
                state: info.state,
                session: info
                    .session_id
                    .as_deref()
                    .filter(|sid| !sid.is_empty())
                    .map(short_session),
                backend: blank_as_none(info.session_backend.as_ref()),
                model: blank_as_none(info.session_model.as_ref()),
                tasks_completed: info.tasks_completed,
            })
            .collect();

        Self {
            status: state.status,
            profile: state.config.profile.clone(),
            started_at: state.started_at,
            stopped_at: state.stopped_at,
            tasks,
            pipelines: OwnerCounts::tally(state.pipelines.iter().map(|p| p.status)),
            debates: OwnerCounts::tally(state.debates.iter().map(|d| d.status)),
            roles,
        }
    }
}

fn or_dash<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for TeamSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Team status: {}", self.status)?;
        writeln!(f, "Profile: {}", self.profile)?;
        writeln!(f, "Started at: {}", or_dash(&self.started_at))?;
        writeln!(f, "Stopped at: {}", or_dash(&self.stopped_at))?;
        let t = &self.tasks;
        writeln!(
            f,
            "Tasks: queued={} deferred={} running={} done={} failed={}",
            t.queued, t.deferred, t.running, t.done, t.failed
        )?;
        for (label, counts) in [("Pipelines", &self.pipelines), ("Debates", &self.debates)] {
            writeln!(
                f,
                "{label}: queued={} running={} done={} failed={}",
                counts.queued, counts.running, counts.done, counts.failed
            )?;
        }
        write!(f, "Roles:")?;
        for role in &self.roles {
            write!(
                f,
                "\n- {}: state={} session={} backend={} model={} completed={}",
                role.role,
                match role.state {
                    RoleActivity::Idle => "idle",
                    RoleActivity::Busy => "busy",
                },
                or_dash(&role.session),
                or_dash(&role.backend),
                or_dash(&role.model),
                role.tasks_completed
            )?;
        }
        Ok(())
    }
}

/// A completed task's report, as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub role: String,
    pub output_path: String,
    pub content: String,
    /// `status` of the parsed footer, when the report carries one
    pub contract_status: Option<String>,
    pub handoff_to: Vec<String>,
    pub has_contract: bool,
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} report ({}) ---", self.task_id, self.role)?;
        writeln!(f, "{}", self.content)?;
        if self.has_contract {
            writeln!(f, "--- parsed contract ---")?;
            writeln!(
                f,
                "status={} handoff_to={:?}",
                self.contract_status.as_deref().unwrap_or("-"),
                self.handoff_to
            )?;
        }
        write!(f, "--- end report ---")
    }
}

impl TeamEngine {
    /// Mark the team running. Fails with exit code 1 when auth checks fail and
    /// `skip_auth_check` is not set.
    pub async fn start(&self, skip_auth_check: bool) -> TeamResult<i32> {
        let span = lifecycle_span!(action = "start");
        self.start_team(skip_auth_check).instrument(span).await
    }

    async fn start_team(&self, skip_auth_check: bool) -> TeamResult<i32> {
        let mut state = self.load_state()?;
        if !self.auth_gate(skip_auth_check).await {
            return Ok(1);
        }

        let now = self.now();
        state.status = TeamStatus::Running;
        if state.started_at.is_none() {
            state.started_at = Some(now);
        }
        state.stopped_at = None;
        state.config = self.config.runtime.knobs();
        for role in self.catalog.role_ids() {
            state.ensure_role(role);
        }
        self.idle_all_roles(&mut state);
        self.recover(&mut state, "team start", now);
        refresh_all(&mut state, self.events.as_ref(), now);
        self.save_state(&mut state)?;

        info!(profile = %state.config.profile, "Team started");
        self.emit("team_started", json!({"profile": state.config.profile}));
        Ok(0)
    }

    pub fn stop(&self) -> TeamResult<i32> {
        let _span = lifecycle_span!(action = "stop").entered();
        let mut state = self.load_state()?;
        let now = self.now();

        let recovered = recover_inflight(&mut state, "team stop", self.events.as_ref(), now);
        state.status = TeamStatus::Stopped;
        state.stopped_at = Some(now);
        self.idle_all_roles(&mut state);
        refresh_all(&mut state, self.events.as_ref(), now);
        self.save_state(&mut state)?;

        info!("Team stopped");
        self.emit("team_stopped", json!({"stopped_at": state.stopped_at}));
        if recovered > 0 {
            self.emit(
                "recovery_applied",
                json!({"count": recovered, "reason": "team stop"}),
            );
        }
        Ok(0)
    }

    pub async fn resume(&self, skip_auth_check: bool) -> TeamResult<i32> {
        let span = lifecycle_span!(action = "resume");
        self.resume_team(skip_auth_check).instrument(span).await
    }

    async fn resume_team(&self, skip_auth_check: bool) -> TeamResult<i32> {
        let mut state = self.load_state()?;
        if !self.auth_gate(skip_auth_check).await {
            return Ok(1);
        }

        let now = self.now();
        state.status = TeamStatus::Running;
        state.stopped_at = None;
        self.idle_all_roles(&mut state);
        self.recover(&mut state, "team resume", now);
        refresh_all(&mut state, self.events.as_ref(), now);
        self.save_state(&mut state)?;

        info!("Team resumed");
        self.emit("team_resumed", json!({}));
        Ok(0)
    }

    /// Refresh owner statuses, persist, and return the whole document
    pub fn status_document(&self) -> TeamResult<RuntimeState> {
        let mut state = self.load_state()?;
        refresh_all(&mut state, self.events.as_ref(), self.now());
        self.save_state(&mut state)?;
        Ok(state)
    }

    pub fn status(&self) -> TeamResult<TeamSnapshot> {
        let state = self.status_document()?;
        Ok(TeamSnapshot::from_state(&state, self.now()))
    }

    pub fn enqueue_task(&self, role: &str, title: &str, description: &str) -> TeamResult<Task> {
        let role = role.trim();
        if role.is_empty() {
            return Err(TeamError::invalid_input("role must not be empty"));
        }
        self.with_graph(|graph| graph.enqueue_task(role, title, description, TaskMetadata::default()))
    }

    /// Empty `roles` means the configured default pipeline
    pub fn create_pipeline(&self, title: &str, brief: &str, roles: &[String]) -> TeamResult<Pipeline> {
        let roles = if roles.is_empty() {
            self.catalog.default_pipeline_roles()
        } else {
            roles.to_vec()
        };
        self.with_graph(|graph| graph.create_pipeline(title, brief, &roles))
    }

    /// Empty `roles` and `moderator` fall back to the configured defaults
    pub fn create_debate(
        &self,
        title: &str,
        topic: &str,
        roles: &[String],
        moderator: Option<&str>,
    ) -> TeamResult<Debate> {
        let roles = if roles.is_empty() {
            self.catalog.default_debate_roles()
        } else {
            roles.to_vec()
        };
        let moderator = moderator
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.catalog.debate_moderator())
            .to_string();
        self.with_graph(|graph| graph.create_debate(title, topic, &roles, &moderator))
    }

    pub fn cancel_task(&self, task_id: &str, reason: &str) -> TeamResult<Task> {
        self.with_graph(|graph| graph.cancel_task(task_id, reason))
    }

    pub fn pipelines(&self) -> TeamResult<Vec<Pipeline>> {
        Ok(self.status_document()?.pipelines)
    }

    pub fn debates(&self) -> TeamResult<Vec<Debate>> {
        Ok(self.status_document()?.debates)
    }

    /// Report text (truncated to [`REPORT_CHAR_LIMIT`] characters) with the
    /// footer's status and handoff list
    pub fn task_report(&self, task_id: &str) -> TeamResult<TaskReport> {
        let state = self.load_state()?;
        let task = state
            .task(task_id)
            .ok_or_else(|| TeamError::task_not_found(task_id))?;
        let output_path = task
            .output_path
            .clone()
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| TeamError::invalid_input(format!("No output path for {task_id}.")))?;
        let raw = self.reports.read(&output_path).ok_or_else(|| {
            TeamError::invalid_input(format!("Output file not found: {output_path}"))
        })?;

        let raw = raw.trim();
        let contract = extract_contract(raw);
        let content = match raw.char_indices().nth(REPORT_CHAR_LIMIT) {
            Some((cut, _)) => format!("{}\n\n[truncated]", &raw[..cut]),
            None => raw.to_string(),
        };

        let contract_status = contract.as_ref().and_then(|c| c.get("status")).map(|status| match status {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
        let handoff_to = contract
            .as_ref()
            .and_then(|c| c.get("handoff_to"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(TaskReport {
            task_id: task.id.clone(),
            role: task.role.clone(),
            output_path,
            content,
            contract_status,
            handoff_to,
            has_contract: contract.is_some(),
        })
    }

    async fn auth_gate(&self, skip_auth_check: bool) -> bool {
        let errors = self.runner.auth_check().await;
        if errors.is_empty() {
            return true;
        }
        for err in &errors {
            warn!(error = %err, "Auth check failed");
        }
        if !skip_auth_check {
            return false;
        }
        self.emit("auth_check_skipped_with_errors", json!({"errors": errors}));
        true
    }

    fn idle_all_roles(&self, state: &mut RuntimeState) {
        for role in state.roles.values_mut() {
            role.state = RoleActivity::Idle;
        }
    }

    fn recover(&self, state: &mut RuntimeState, reason: &str, now: DateTime<Utc>) {
        let recovered = recover_inflight(state, reason, self.events.as_ref(), now);
        if recovered > 0 {
            info!(count = recovered, reason = reason, "Recovered inflight tasks");
            self.emit("recovery_applied", json!({"count": recovered, "reason": reason}));
        }
    }
}
