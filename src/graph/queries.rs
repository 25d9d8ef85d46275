//! Read-side task graph queries: id allocation, lookup, readiness, deferral

use crate::error::{TeamError, TeamResult};
use crate::state::{Debate, Pipeline, RuntimeState, Task, TaskStatus};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;

pub const TASK_PREFIX: &str = "TASK";
pub const PIPELINE_PREFIX: &str = "PIPE";
pub const DEBATE_PREFIX: &str = "DEBATE";

/// `max(existing numeric suffix) + 1`, zero-padded to four digits.
/// Ids without an all-digit suffix are ignored. Fails when the next id would not fit in a `u64`.
pub fn next_id<'a, I>(prefix: &str, existing: I) -> TeamResult<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut last: u64 = 0;
    for id in existing {
        let Some((_, suffix)) = id.rsplit_once('-') else {
            continue;
        };
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let value = suffix.parse::<u64>().map_err(|_| id_space_exhausted(prefix, id))?;
        last = last.max(value);
    }
    let next = last
        .checked_add(1)
        .ok_or_else(|| id_space_exhausted(prefix, &format!("{prefix}-{last}")))?;
    Ok(format!("{prefix}-{next:04}"))
}

fn id_space_exhausted(prefix: &str, highest: &str) -> TeamError {
    TeamError::internal(format!(
        "no {prefix} id left after {highest}; renumber the state document"
    ))
}

/// Parse a stored `retry_at`. Naive timestamps are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

impl Task {
    pub fn dependencies(&self) -> &[String] {
        &self.metadata.depends_on_task_ids
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.retry_at.as_deref().and_then(parse_timestamp)
    }

    /// True iff `retry_at` parses to a time strictly after `now`
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.retry_at().map_or(false, |retry_at| retry_at > now)
    }

    /// Put the task back in the queue, not eligible for `defer_minutes` (at least one)
    pub fn set_retry(&mut self, defer_minutes: i64, reason: &str, now: DateTime<Utc>) {
        let retry_at = now + Duration::minutes(defer_minutes.max(1));
        self.metadata.retry_at = Some(retry_at.to_rfc3339_opts(SecondsFormat::Secs, false));
        self.status = TaskStatus::Queued;
        self.updated_at = now;
        self.started_at = None;
        self.finished_at = None;
        self.error = Some(reason.to_string());
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        self.metadata.pipeline_id.as_deref()
    }

    pub fn debate_id(&self) -> Option<&str> {
        self.metadata.debate_id.as_deref()
    }
}

/// Why a queued task cannot run yet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedTask {
    pub task_id: String,
    pub role: String,
    /// Dependencies not yet `done` (or missing)
    pub waiting_for: Vec<String>,
    /// Set when the task is deferred
    pub retry_at: Option<String>,
}

impl RuntimeState {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }

    pub fn task_index(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == task_id)
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.id == pipeline_id)
    }

    pub fn pipeline_mut(&mut self, pipeline_id: &str) -> Option<&mut Pipeline> {
        self.pipelines.iter_mut().find(|p| p.id == pipeline_id)
    }

    pub fn debate(&self, debate_id: &str) -> Option<&Debate> {
        self.debates.iter().find(|d| d.id == debate_id)
    }

    pub fn debate_mut(&mut self, debate_id: &str) -> Option<&mut Debate> {
        self.debates.iter_mut().find(|d| d.id == debate_id)
    }

    pub fn next_task_id(&self) -> TeamResult<String> {
        next_id(TASK_PREFIX, self.tasks.iter().map(|t| t.id.as_str()))
    }

    pub fn next_pipeline_id(&self) -> TeamResult<String> {
        next_id(PIPELINE_PREFIX, self.pipelines.iter().map(|p| p.id.as_str()))
    }

    pub fn next_debate_id(&self) -> TeamResult<String> {
        next_id(DEBATE_PREFIX, self.debates.iter().map(|d| d.id.as_str()))
    }

    /// Every dependency exists and is `done`
    pub fn is_task_ready(&self, task: &Task) -> bool {
        task.dependencies().iter().all(|dep| {
            self.task(dep)
                .map_or(false, |dep_task| dep_task.status == TaskStatus::Done)
        })
    }

    /// First queued, non-deferred, ready task in list order
    pub fn next_queued_task(&self, now: DateTime<Utc>) -> Option<&Task> {
        self.tasks.iter().find(|task| {
            task.status == TaskStatus::Queued && !task.is_deferred(now) && self.is_task_ready(task)
        })
    }

    /// Queued tasks held back by dependencies or deferral
    pub fn queued_but_blocked(&self, now: DateTime<Utc>) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| {
                task.status == TaskStatus::Queued
                    && (task.is_deferred(now) || !self.is_task_ready(task))
            })
            .collect()
    }

    pub fn describe_blocked(&self, task: &Task, now: DateTime<Utc>) -> BlockedTask {
        let waiting_for = task
            .dependencies()
            .iter()
            .filter(|dep| {
                self.task(dep)
                    .map_or(true, |dep_task| dep_task.status != TaskStatus::Done)
            })
            .cloned()
            .collect();
        BlockedTask {
            task_id: task.id.clone(),
            role: task.role.clone(),
            waiting_for,
            retry_at: task
                .is_deferred(now)
                .then(|| task.metadata.retry_at.clone())
                .flatten(),
        }
    }

    pub fn blocked_report(&self, now: DateTime<Utc>) -> Vec<BlockedTask> {
        self.queued_but_blocked(now)
            .into_iter()
            .map(|task| self.describe_blocked(task, now))
            .collect()
    }
}
