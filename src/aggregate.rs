//! Derived status of pipelines and debates, and crash recovery
//!
//! Owner status is a pure reduction over member task statuses. `running` is
//! never a stable state across restarts: `recover_inflight` puts any task left
//! in it back into the queue.

use crate::events::EventSink;
use crate::state::{Debate, OwnerStatus, Pipeline, RuntimeState, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

/// Reduce member statuses (`None` = member task missing) in priority order:
/// any failed; all done; any running; any done; otherwise queued.
pub fn recompute_owner_status(statuses: &[Option<TaskStatus>]) -> OwnerStatus {
    let any = |wanted: TaskStatus| statuses.iter().any(|s| *s == Some(wanted));

    if any(TaskStatus::Failed) {
        OwnerStatus::Failed
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == Some(TaskStatus::Done)) {
        OwnerStatus::Done
    } else if any(TaskStatus::Running) {
        OwnerStatus::Running
    } else if any(TaskStatus::Done) {
        OwnerStatus::InProgress
    } else {
        OwnerStatus::Queued
    }
}

/// A work item whose status is derived from its member tasks
pub trait CompositeWork {
    /// Prefix for event names and payload keys
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn task_ids(&self) -> &[String];
    fn status(&self) -> OwnerStatus;
    fn set_status(&mut self, status: OwnerStatus, now: DateTime<Utc>);
    fn set_last_error(&mut self, error: Option<String>);
}

impl CompositeWork for Pipeline {
    const KIND: &'static str = "pipeline";

    fn id(&self) -> &str {
        &self.id
    }

    fn task_ids(&self) -> &[String] {
        &self.task_ids
    }

    fn status(&self) -> OwnerStatus {
        self.status
    }

    fn set_status(&mut self, status: OwnerStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    fn set_last_error(&mut self, error: Option<String>) {
        self.last_error = error;
    }
}

impl CompositeWork for Debate {
    const KIND: &'static str = "debate";

    fn id(&self) -> &str {
        &self.id
    }

    fn task_ids(&self) -> &[String] {
        &self.task_ids
    }

    fn status(&self) -> OwnerStatus {
        self.status
    }

    fn set_status(&mut self, status: OwnerStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    fn set_last_error(&mut self, error: Option<String>) {
        self.last_error = error;
    }
}

fn member_statuses(tasks: &[Task], task_ids: &[String]) -> Vec<Option<TaskStatus>> {
    task_ids
        .iter()
        .map(|id| tasks.iter().find(|task| task.id == *id).map(|task| task.status))
        .collect()
}

/// Recompute one owner, emitting `<kind>_status_changed` only on a change
pub fn recompute<W: CompositeWork>(
    tasks: &[Task],
    owner: &mut W,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) -> OwnerStatus {
    let next = recompute_owner_status(&member_statuses(tasks, owner.task_ids()));
    let previous = owner.status();
    owner.set_status(next, now);

    if previous != next {
        info!(
            owner = owner.id(),
            kind = W::KIND,
            from = %previous,
            to = %next,
            "Owner status changed"
        );
        let mut payload = serde_json::Map::new();
        payload.insert(format!("{}_id", W::KIND), json!(owner.id()));
        payload.insert("from".into(), json!(previous));
        payload.insert("to".into(), json!(next));
        events.emit(
            &format!("{}_status_changed", W::KIND),
            serde_json::Value::Object(payload),
            now,
        );
    }
    next
}

pub fn recompute_pipeline_status(
    state: &mut RuntimeState,
    pipeline_id: &str,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) -> Option<OwnerStatus> {
    let RuntimeState {
        tasks, pipelines, ..
    } = state;
    let pipeline = pipelines.iter_mut().find(|p| p.id == pipeline_id)?;
    Some(recompute(tasks, pipeline, events, now))
}

pub fn recompute_debate_status(
    state: &mut RuntimeState,
    debate_id: &str,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) -> Option<OwnerStatus> {
    let RuntimeState { tasks, debates, .. } = state;
    let debate = debates.iter_mut().find(|d| d.id == debate_id)?;
    Some(recompute(tasks, debate, events, now))
}

/// Recompute every pipeline and debate
pub fn refresh_all(state: &mut RuntimeState, events: &dyn EventSink, now: DateTime<Utc>) {
    let RuntimeState {
        tasks,
        pipelines,
        debates,
        ..
    } = state;
    for pipeline in pipelines.iter_mut() {
        recompute(tasks, pipeline, events, now);
    }
    for debate in debates.iter_mut() {
        recompute(tasks, debate, events, now);
    }
}

/// After a task reaches a terminal or deferred state: surface a failure as the
/// owner's `last_error` and recompute the owning pipeline/debate.
pub fn settle_owners(
    state: &mut RuntimeState,
    task_id: &str,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) {
    let Some(task) = state.task(task_id) else {
        return;
    };
    let failure = (task.status == TaskStatus::Failed).then(|| task.error.clone()).flatten();
    let pipeline_id = task.pipeline_id().map(str::to_string);
    let debate_id = task.debate_id().map(str::to_string);

    if let Some(pipeline_id) = pipeline_id {
        if let Some(error) = &failure {
            if let Some(pipeline) = state.pipeline_mut(&pipeline_id) {
                pipeline.set_last_error(Some(error.clone()));
            }
        }
        recompute_pipeline_status(state, &pipeline_id, events, now);
    }

    if let Some(debate_id) = debate_id {
        if let Some(error) = &failure {
            if let Some(debate) = state.debate_mut(&debate_id) {
                debate.set_last_error(Some(error.clone()));
            }
        }
        recompute_debate_status(state, &debate_id, events, now);
    }
}

/// Requeue every task stuck in `running`. Returns how many were recovered.
///
/// Dependencies are kept: they were all `done` when the task started.
pub fn recover_inflight(
    state: &mut RuntimeState,
    reason: &str,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) -> usize {
    let mut recovered = 0;
    for task in state
        .tasks
        .iter_mut()
        .filter(|task| task.status == TaskStatus::Running)
    {
        task.status = TaskStatus::Queued;
        task.updated_at = now;
        task.started_at = None;
        task.finished_at = None;
        task.metadata.retry_at = None;
        task.error = Some(format!("Recovered inflight task: {reason}"));
        recovered += 1;

        warn!(task_id = %task.id, reason = reason, "Requeued inflight task");
        events.emit(
            "task_requeued_from_recovery",
            json!({"task_id": task.id, "reason": reason}),
            now,
        );
    }
    recovered
}
