//! Persisted runtime document types
//!
//! The document root is [`RuntimeState`]. Every struct keeps unknown fields in a
//! flattened `extra` map so documents written by newer builds survive a round trip.

use crate::contract::OutputContract;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Current schema version of the state document
pub const STATE_SCHEMA_VERSION: u32 = 3;

/// Process-level team status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for TeamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamStatus::Stopped => write!(f, "stopped"),
            TeamStatus::Running => write!(f, "running"),
        }
    }
}

/// Profile knobs recorded in the document on `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeKnobs {
    pub profile: String,
    pub max_active_sessions: u32,
    pub agent_idle_timeout_sec: u64,
    pub local_test_scope: String,
    pub use_docker: bool,
    pub run_full_tests_in_ci: bool,
}

impl Default for RuntimeKnobs {
    fn default() -> Self {
        crate::config::RuntimeSection::default().knobs()
    }
}

/// Whether a role is currently executing a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleActivity {
    #[default]
    Idle,
    Busy,
}

/// One backend/model pair in a role's fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChainEntry {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub model: String,
}

fn default_backend() -> String {
    "codex".to_string()
}

/// Backends the process runner knows how to launch
pub const SUPPORTED_BACKENDS: &[&str] = &["codex", "opencode"];

impl ModelChainEntry {
    pub fn new<B: Into<String>, M: Into<String>>(backend: B, model: M) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
        }
        .normalized()
    }

    /// The implicit chain entry: codex with its own default model
    pub fn codex_default() -> Self {
        Self::new("codex", "")
    }

    pub fn has_supported_backend(&self) -> bool {
        SUPPORTED_BACKENDS.contains(&self.normalized().backend.as_str())
    }

    /// Lower-case the backend (blank means codex) and trim the model
    pub fn normalized(&self) -> Self {
        let backend = self.backend.trim().to_lowercase();
        Self {
            backend: if backend.is_empty() {
                default_backend()
            } else {
                backend
            },
            model: self.model.trim().to_string(),
        }
    }
}

impl fmt::Display for ModelChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.model.is_empty() {
            write!(f, "{}", self.backend)
        } else {
            write!(f, "{}/{}", self.backend, self.model)
        }
    }
}

/// Mutable runtime record of one role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleState {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_backend: Option<String>,
    #[serde(default)]
    pub session_model: Option<String>,
    #[serde(default)]
    pub state: RoleActivity,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoleState {
    /// A session recorded without a backend predates multi-backend routing and is codex's.
    pub fn session_matches(&self, entry: &ModelChainEntry) -> bool {
        let recorded_backend = self
            .session_backend
            .as_deref()
            .map(|b| b.trim().to_lowercase())
            .unwrap_or_default();
        let recorded_backend = if recorded_backend.is_empty() && self.session_id.is_some() {
            "codex".to_string()
        } else {
            recorded_backend
        };
        let recorded_model = self.session_model.as_deref().unwrap_or("").trim();

        recorded_backend == entry.backend.trim().to_lowercase()
            && recorded_model == entry.model.trim()
    }

    /// Session handle to resume for this chain entry, if any
    pub fn reusable_session(&self, entry: &ModelChainEntry) -> Option<String> {
        if !self.session_matches(entry) {
            return None;
        }
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|sid| !sid.is_empty())
            .map(str::to_string)
    }

    pub fn remember_session(&mut self, session_id: Option<String>, entry: &ModelChainEntry) {
        self.session_id = session_id;
        self.session_backend = Some(entry.backend.clone());
        self.session_model = Some(entry.model.clone());
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Role of a task within a debate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStage {
    Position,
    Moderation,
}

/// Typed task metadata; unrecognised keys are preserved in `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub depends_on_task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate_stage: Option<DebateStage>,
    /// Deferred-until timestamp, RFC 3339. Kept as text so a garbled value only
    /// disables deferral instead of failing the whole document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted_models: Vec<ModelChainEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quota_exhausted_models: Vec<ModelChainEntry>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_contract"
    )]
    pub output_contract: Option<OutputContract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_contract<'de, D>(deserializer: D) -> Result<Option<OutputContract>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => Some(OutputContract::from_object(&map)),
        _ => None,
    })
}

/// Atomic unit of dispatched work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub role: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Derived status of a pipeline or debate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerStatus {
    #[default]
    Queued,
    Running,
    InProgress,
    Done,
    Failed,
}

impl OwnerStatus {
    /// Running and partially complete owners are both "active"
    pub fn is_active(&self) -> bool {
        matches!(self, OwnerStatus::Running | OwnerStatus::InProgress)
    }
}

impl fmt::Display for OwnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OwnerStatus::Queued => "queued",
            OwnerStatus::Running => "running",
            OwnerStatus::InProgress => "in_progress",
            OwnerStatus::Done => "done",
            OwnerStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Ordered chain of tasks, one per role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub brief: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub status: OwnerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fan-in of position tasks feeding one moderator task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub moderator: String,
    #[serde(default)]
    pub participant_task_ids: Vec<String>,
    pub moderator_task_id: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub status: OwnerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Root of the persisted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub version: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TeamStatus,
    #[serde(default)]
    pub config: RuntimeKnobs,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleState>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub debates: Vec<Debate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuntimeState {
    /// Fresh document with one idle record per catalog role
    pub fn new(role_ids: &[String], knobs: RuntimeKnobs, now: DateTime<Utc>) -> Self {
        let roles = role_ids
            .iter()
            .map(|role| (role.clone(), RoleState::default()))
            .collect();
        Self {
            version: STATE_SCHEMA_VERSION,
            created_at: Some(now),
            updated_at: Some(now),
            started_at: None,
            stopped_at: None,
            status: TeamStatus::Stopped,
            config: knobs,
            roles,
            tasks: Vec::new(),
            pipelines: Vec::new(),
            debates: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TeamStatus::Running
    }

    /// Role record, created idle on first reference
    pub fn ensure_role(&mut self, role: &str) -> &mut RoleState {
        self.roles.entry(role.to_string()).or_default()
    }
}
