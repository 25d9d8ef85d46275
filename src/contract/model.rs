//! Typed view of a parsed output contract
//!
//! Validation runs against the raw JSON object so it can describe any shape an
//! agent produces. Once accepted, the footer is converted with
//! [`OutputContract::from_object`], which never fails: fields of the wrong type
//! collapse to empty values and unknown keys are kept in `extra`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Statuses an agent may report in its footer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[default]
    Done,
    NeedsReview,
    NeedsChanges,
    Blocked,
    NeedsFixFormat,
    ReadyForHandoff,
    Dispatched,
    ApprovedOrChangesRequested,
    PassedOrFailed,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 9] = [
        ContractStatus::Done,
        ContractStatus::NeedsReview,
        ContractStatus::NeedsChanges,
        ContractStatus::Blocked,
        ContractStatus::NeedsFixFormat,
        ContractStatus::ReadyForHandoff,
        ContractStatus::Dispatched,
        ContractStatus::ApprovedOrChangesRequested,
        ContractStatus::PassedOrFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Done => "done",
            ContractStatus::NeedsReview => "needs_review",
            ContractStatus::NeedsChanges => "needs_changes",
            ContractStatus::Blocked => "blocked",
            ContractStatus::NeedsFixFormat => "needs_fix_format",
            ContractStatus::ReadyForHandoff => "ready_for_handoff",
            ContractStatus::Dispatched => "dispatched",
            ContractStatus::ApprovedOrChangesRequested => "approved_or_changes_requested",
            ContractStatus::PassedOrFailed => "passed_or_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact value: a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ArtifactValue {
    Text(String),
    List(Vec<String>),
}

/// One artifact reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Artifact {
    /// Bare path string
    Path(String),
    /// Typed entry such as `{"type": "commands", "value": ["cargo test"]}`
    Entry {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ArtifactValue>,
    },
}

impl Artifact {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(path) => Some(Artifact::Path(path.clone())),
            Value::Object(map) => Some(Artifact::Entry {
                kind: map.get("type").and_then(scalar_text),
                path: map.get("path").and_then(Value::as_str).map(str::to_string),
                value: match map.get("value") {
                    Some(Value::String(text)) => Some(ArtifactValue::Text(text.clone())),
                    Some(Value::Array(items)) => Some(ArtifactValue::List(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect(),
                    )),
                    _ => None,
                },
            }),
            _ => None,
        }
    }
}

/// Follow-up work addressed to another role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionItem {
    pub role: String,
    pub items: Vec<String>,
}

/// The JSON footer every agent response must end with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputContract {
    /// Must equal the dispatched task id
    pub task_id: String,
    /// Must equal the role the task was dispatched to
    pub owner: String,
    #[serde(default)]
    pub status: ContractStatus,
    pub acceptance_criteria: Vec<String>,
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_questions: Vec<String>,
    pub handoff_to: Vec<String>,
    pub next_role_action_items: Vec<ActionItem>,
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: Map<String, Value>,
}

const KNOWN_FIELDS: &[&str] = &[
    "task_id",
    "owner",
    "status",
    "acceptance_criteria",
    "artifacts",
    "risks",
    "open_questions",
    "handoff_to",
    "next_role_action_items",
];

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn non_blank_list(value: Option<&Value>) -> Vec<String> {
    string_list(value)
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .collect()
}

impl OutputContract {
    /// Lenient conversion from a raw footer object
    pub fn from_object(raw: &Map<String, Value>) -> Self {
        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .and_then(|s| ContractStatus::parse(s.trim()))
            .unwrap_or_default();

        let artifacts = raw
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Artifact::from_value).collect())
            .unwrap_or_default();

        let next_role_action_items = raw
            .get("next_role_action_items")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|entry| ActionItem {
                        role: entry
                            .get("role")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        items: string_list(entry.get("items")),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let extra = raw
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            task_id: raw.get("task_id").and_then(scalar_text).unwrap_or_default(),
            owner: raw.get("owner").and_then(scalar_text).unwrap_or_default(),
            status,
            acceptance_criteria: string_list(raw.get("acceptance_criteria")),
            artifacts,
            risks: non_blank_list(raw.get("risks")),
            open_questions: non_blank_list(raw.get("open_questions")),
            handoff_to: non_blank_list(raw.get("handoff_to")),
            next_role_action_items,
            extra,
        }
    }

    /// Flattened artifact paths: bare strings, an entry's `path`, else its `value`.
    /// Trimmed, blanks dropped.
    pub fn artifact_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for artifact in &self.artifacts {
            match artifact {
                Artifact::Path(path) => paths.push(path.trim().to_string()),
                Artifact::Entry {
                    path: Some(path), ..
                } => paths.push(path.trim().to_string()),
                Artifact::Entry {
                    path: None,
                    value: Some(ArtifactValue::Text(text)),
                    ..
                } => paths.push(text.trim().to_string()),
                Artifact::Entry {
                    path: None,
                    value: Some(ArtifactValue::List(items)),
                    ..
                } => paths.extend(items.iter().map(|item| item.trim().to_string())),
                Artifact::Entry { .. } => {}
            }
        }
        paths.retain(|path| !path.is_empty());
        paths
    }

    /// Path and value strings of every entry whose `type` equals `kind`
    pub fn artifact_values_for_type(&self, kind: &str) -> Vec<String> {
        let mut values = Vec::new();
        for artifact in &self.artifacts {
            let Artifact::Entry {
                kind: Some(entry_kind),
                path,
                value,
            } = artifact
            else {
                continue;
            };
            if entry_kind.trim() != kind {
                continue;
            }
            if let Some(path) = path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                values.push(path.to_string());
            }
            match value {
                Some(ArtifactValue::Text(text)) if !text.trim().is_empty() => {
                    values.push(text.trim().to_string())
                }
                Some(ArtifactValue::List(items)) => values.extend(
                    items
                        .iter()
                        .map(|item| item.trim())
                        .filter(|item| !item.is_empty())
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        values
    }

    /// First `handoff_to` entry
    pub fn next_owner(&self) -> Option<&str> {
        self.handoff_to.first().map(String::as_str)
    }
}

/// JSON Schema of the footer, for prompt authors and stage templates
pub fn contract_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(OutputContract)
}
