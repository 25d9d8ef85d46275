//! Compression summaries
//!
//! A completed task's contract is condensed into a fixed seven-line digest with
//! its own JSON footer. Downstream stages read this instead of the raw report,
//! which keeps handoff context bounded across long pipelines.

use super::model::OutputContract;
use serde::{Deserialize, Serialize};
use std::fmt;

const DEFAULT_NEXT_ACTION: &str = "Follow stage template and acceptance criteria.";

/// Acceptance status inferred from criteria wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Met,
    Partial,
    NotMet,
    Unknown,
}

impl AcceptanceStatus {
    /// "pass" anywhere counts as passing; "fail", "not met" or "blocked" as failing
    pub fn infer<S: AsRef<str>>(criteria: &[S]) -> Self {
        let lowered: Vec<String> = criteria.iter().map(|c| c.as_ref().to_lowercase()).collect();
        let has_fail = lowered.iter().any(|item| {
            ["fail", "not met", "blocked"]
                .iter()
                .any(|marker| item.contains(marker))
        });
        let has_pass = lowered.iter().any(|item| item.contains("pass"));

        match (has_pass, has_fail) {
            (true, false) => AcceptanceStatus::Met,
            (true, true) => AcceptanceStatus::Partial,
            (false, true) => AcceptanceStatus::NotMet,
            (false, false) => AcceptanceStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptanceStatus::Met => "met",
            AcceptanceStatus::Partial => "partial",
            AcceptanceStatus::NotMet => "not_met",
            AcceptanceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AcceptanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Footer of a compression summary; parses as a contract-shaped object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionFooter {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub artifacts: Vec<String>,
    pub validation: Vec<String>,
    pub acceptance_status: AcceptanceStatus,
    pub risks: Vec<String>,
    pub open_questions: Vec<String>,
    pub next_owner: String,
    pub next_actions: Vec<String>,
}

impl CompressionFooter {
    pub const KIND: &'static str = "compression_summary";

    pub fn from_contract(task_id: &str, contract: &OutputContract) -> Self {
        let task_id = if task_id.is_empty() {
            contract.task_id.clone()
        } else {
            task_id.to_string()
        };

        let mut validation = contract.artifact_values_for_type("commands");
        if validation.is_empty() {
            validation = contract.artifact_values_for_type("validation");
        }

        let next_owner = contract.next_owner().unwrap_or_default().to_string();
        let mut next_actions: Vec<String> = contract
            .next_role_action_items
            .iter()
            .filter(|entry| next_owner.is_empty() || entry.role == next_owner)
            .flat_map(|entry| entry.items.iter())
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        if next_actions.is_empty() {
            next_actions.push(DEFAULT_NEXT_ACTION.to_string());
        }

        Self {
            task_id,
            kind: Self::KIND.to_string(),
            artifacts: contract.artifact_paths(),
            validation,
            acceptance_status: AcceptanceStatus::infer(&contract.acceptance_criteria),
            risks: contract.risks.iter().take(3).cloned().collect(),
            open_questions: contract.open_questions.iter().take(3).cloned().collect(),
            next_owner,
            next_actions,
        }
    }
}

fn joined_or(items: &[String], limit: usize, separator: &str, fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items
            .iter()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Render the digest for a completed task. Always ends with a newline.
pub fn build_compression_summary(task_id: &str, title: &str, contract: &OutputContract) -> String {
    let footer = CompressionFooter::from_contract(task_id, contract);
    let goal = match title.trim() {
        "" => "No task title provided.",
        trimmed => trimmed,
    };
    let next_owner_label = if footer.next_owner.is_empty() {
        "unassigned"
    } else {
        footer.next_owner.as_str()
    };

    let lines = [
        "### IMMUTABLE SUMMARY (5-10 lines)".to_string(),
        format!("1) Task: {} - {}", footer.task_id, goal),
        format!(
            "2) Changes/Artifacts: {}",
            joined_or(&footer.artifacts, 4, ", ", "none reported")
        ),
        format!(
            "3) Validation: {}",
            joined_or(&footer.validation, 3, ", ", "not reported")
        ),
        format!(
            "4) Acceptance: {}; criteria_count={}",
            footer.acceptance_status,
            contract.acceptance_criteria.len()
        ),
        format!(
            "5) Risks: {}",
            joined_or(&contract.risks, 3, ", ", "none reported")
        ),
        format!(
            "6) Open questions: {}",
            joined_or(&contract.open_questions, 2, ", ", "none reported")
        ),
        format!(
            "7) Next: {}: {}",
            next_owner_label,
            joined_or(&footer.next_actions, 2, "; ", DEFAULT_NEXT_ACTION)
        ),
    ];

    let footer_json = serde_json::to_string_pretty(&footer).unwrap_or_else(|_| "{}".to_string());

    let mut summary = lines.join("\n");
    summary.push_str("\n\n```json\n");
    summary.push_str(&footer_json);
    summary.push_str("\n```\n");
    summary
}
