//! Output contract and report structure validation
//!
//! Both validators return human-readable violations; an empty list means valid.
//! The strings are fed back to the agent verbatim in correction prompts, so they
//! name the offending field and the expected value.

use super::model::{ContractStatus, OutputContract};
use serde_json::{Map, Value};

/// Fields whose absence is reported individually
pub const REQUIRED_FIELDS: &[&str] = &["task_id", "owner", "acceptance_criteria", "artifacts"];

/// Artifact paths certain roles must always deliver. A trailing `/` matches as a prefix.
pub const ROLE_REQUIRED_ARTIFACT_PATHS: &[(&str, &[&str])] = &[
    ("concept", &["docs/concept.md"]),
    ("game_design", &["docs/game_design.md", "docs/balance_knobs.md"]),
    ("narrative", &["docs/narrative.md", "assets/text/ui_copy.md"]),
    ("player_experience", &["docs/ux_flow.md", "docs/ftue.md"]),
];

/// Markdown sections every report needs, with accepted heading spellings (lower-case)
pub const REQUIRED_REPORT_SECTIONS: &[(&str, &[&str])] = &[
    (
        "task meta",
        &["## task meta", "### task meta", "### task status summary"],
    ),
    (
        "acceptance criteria",
        &["## acceptance criteria", "### acceptance criteria"],
    ),
    (
        "artifacts",
        &["## artifacts", "### artifacts", "### required artifacts"],
    ),
    (
        "handoff",
        &["## handoff", "### handoff", "### handoff instructions"],
    ),
];

pub fn required_artifact_paths(role: &str) -> &'static [&'static str] {
    ROLE_REQUIRED_ARTIFACT_PATHS
        .iter()
        .find(|(name, _)| *name == role)
        .map(|(_, paths)| *paths)
        .unwrap_or(&[])
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn non_empty_list(value: Option<&Value>) -> Option<&Vec<Value>> {
    value.and_then(Value::as_array).filter(|items| !items.is_empty())
}

/// Validate a parsed footer against the task it claims to answer
pub fn validate_contract(
    role: &str,
    task_id: &str,
    contract: Option<&Map<String, Value>>,
) -> Vec<String> {
    let Some(contract) = contract else {
        return vec!["Missing JSON output contract footer.".to_string()];
    };
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if !contract.contains_key(*field) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    if let Some(reported) = contract.get("task_id").map(text_of) {
        if !reported.is_empty() && reported != task_id {
            errors.push(format!(
                "task_id mismatch: expected {task_id}, got {reported}"
            ));
        }
    }

    if let Some(owner) = contract.get("owner").map(text_of) {
        if !owner.is_empty() && owner != role {
            errors.push(format!("owner mismatch: expected {role}, got {owner}"));
        }
    }

    let status = contract
        .get("status")
        .map(text_of)
        .unwrap_or_else(|| ContractStatus::Done.as_str().to_string());
    let status = status.trim();
    if !status.is_empty() && ContractStatus::parse(status).is_none() {
        errors.push(format!("Invalid status: {status}"));
    }

    for field in ["artifacts", "acceptance_criteria", "handoff_to"] {
        if non_empty_list(contract.get(field)).is_none() {
            errors.push(format!("{field} must be a non-empty list"));
        }
    }

    match non_empty_list(contract.get("next_role_action_items")) {
        None => errors.push("next_role_action_items must be a non-empty list".to_string()),
        Some(entries) => {
            for (idx, entry) in entries.iter().enumerate() {
                errors.extend(validate_action_item(idx + 1, entry));
            }
        }
    }

    let required_paths = required_artifact_paths(role);
    if !required_paths.is_empty() {
        let paths = OutputContract::from_object(contract).artifact_paths();
        for required in required_paths {
            if required.ends_with('/') {
                if !paths.iter().any(|path| path.starts_with(required)) {
                    errors.push(format!("Missing required artifact path prefix: {required}"));
                }
            } else if !paths.iter().any(|path| path == required) {
                errors.push(format!("Missing required artifact path: {required}"));
            }
        }
    }

    errors
}

fn validate_action_item(idx: usize, entry: &Value) -> Vec<String> {
    let Some(entry) = entry.as_object() else {
        return vec![format!("next_role_action_items[{idx}] must be an object")];
    };
    let mut errors = Vec::new();

    let role_ok = entry
        .get("role")
        .and_then(Value::as_str)
        .map_or(false, |role| !role.trim().is_empty());
    if !role_ok {
        errors.push(format!(
            "next_role_action_items[{idx}].role must be a non-empty string"
        ));
    }

    match non_empty_list(entry.get("items")) {
        None => errors.push(format!(
            "next_role_action_items[{idx}].items must be a non-empty list"
        )),
        Some(items) => {
            let all_text = items
                .iter()
                .all(|item| item.as_str().map_or(false, |s| !s.trim().is_empty()));
            if !all_text {
                errors.push(format!(
                    "next_role_action_items[{idx}].items must contain non-empty strings"
                ));
            }
        }
    }

    errors
}

/// Check the response for every required markdown section, case-insensitively
pub fn validate_report_structure(message: &str) -> Vec<String> {
    let lowered = message.to_lowercase();
    REQUIRED_REPORT_SECTIONS
        .iter()
        .filter(|(_, alternatives)| !alternatives.iter().any(|heading| lowered.contains(heading)))
        .map(|(label, _)| format!("Missing report section: {label}"))
        .collect()
}

/// Contract violations followed by structure violations
pub fn validate_task_output(
    role: &str,
    task_id: &str,
    message: &str,
    contract: Option<&Map<String, Value>>,
) -> Vec<String> {
    let mut errors = validate_contract(role, task_id, contract);
    errors.extend(validate_report_structure(message));
    errors
}

/// Correction prompt appended to the next attempt after a rejected response
pub fn format_contract_error_feedback(errors: &[String], task_id: &str, role: &str) -> String {
    let bullets = errors
        .iter()
        .map(|err| format!("- {err}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Your previous response did not satisfy the required output contract.\n\
         Task ID: {task_id}\n\
         Role: {role}\n\
         Fix only the response formatting/content contract and reply again.\n\
         Do not omit the markdown sections and the final JSON block.\n\
         Validation errors:\n\
         {bullets}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn valid_contract(task_id: &str, owner: &str) -> Map<String, Value> {
        object(json!({
            "task_id": task_id,
            "owner": owner,
            "status": "ready_for_handoff",
            "acceptance_criteria": ["unit tests pass"],
            "artifacts": ["src/lib.rs"],
            "risks": [],
            "handoff_to": ["reviewer"],
            "next_role_action_items": [{"role": "reviewer", "items": ["review diff"]}]
        }))
    }

    #[test]
    fn test_valid_contract_has_no_violations() {
        let contract = valid_contract("TASK-0001", "coder");
        assert!(validate_contract("coder", "TASK-0001", Some(&contract)).is_empty());
    }

    #[test]
    fn test_missing_contract() {
        assert_eq!(
            validate_contract("coder", "TASK-0001", None),
            vec!["Missing JSON output contract footer."]
        );
    }

    #[test]
    fn test_status_defaults_to_done_when_absent() {
        let mut contract = valid_contract("TASK-0001", "coder");
        contract.remove("status");
        assert!(validate_contract("coder", "TASK-0001", Some(&contract)).is_empty());
    }

    #[test]
    fn test_invalid_status_is_reported() {
        let mut contract = valid_contract("TASK-0001", "coder");
        contract.insert("status".into(), json!("finished"));
        let errors = validate_contract("coder", "TASK-0001", Some(&contract));
        assert_eq!(errors, vec!["Invalid status: finished"]);
    }

    #[test]
    fn test_action_item_shapes() {
        let mut contract = valid_contract("TASK-0001", "coder");
        contract.insert(
            "next_role_action_items".into(),
            json!(["loose", {"role": " ", "items": []}, {"role": "qa", "items": ["ok", ""]}]),
        );
        let errors = validate_contract("coder", "TASK-0001", Some(&contract));
        assert_eq!(
            errors,
            vec![
                "next_role_action_items[1] must be an object",
                "next_role_action_items[2].role must be a non-empty string",
                "next_role_action_items[2].items must be a non-empty list",
                "next_role_action_items[3].items must contain non-empty strings",
            ]
        );
    }

    #[test]
    fn test_role_required_artifacts() {
        let mut contract = valid_contract("TASK-0002", "game_design");
        contract.insert(
            "artifacts".into(),
            json!([{"type": "doc", "path": "docs/game_design.md"}]),
        );
        let errors = validate_contract("game_design", "TASK-0002", Some(&contract));
        assert_eq!(
            errors,
            vec!["Missing required artifact path: docs/balance_knobs.md"]
        );
    }

    #[test]
    fn test_roles_without_required_artifacts() {
        assert!(required_artifact_paths("coder").is_empty());
        assert_eq!(required_artifact_paths("concept"), &["docs/concept.md"]);
    }

    #[test]
    fn test_report_structure_accepts_alternatives() {
        let message = "### Task Status Summary\n### Acceptance Criteria\n### Required Artifacts\n### Handoff Instructions\n";
        assert!(validate_report_structure(message).is_empty());
    }

    #[test]
    fn test_report_structure_lists_missing_sections() {
        let errors = validate_report_structure("## Task Meta\nbody");
        assert_eq!(
            errors,
            vec![
                "Missing report section: acceptance criteria",
                "Missing report section: artifacts",
                "Missing report section: handoff",
            ]
        );
    }

    #[test]
    fn test_feedback_enumerates_errors() {
        let feedback = format_contract_error_feedback(
            &["Missing required field: owner".to_string()],
            "TASK-0003",
            "qa",
        );
        assert!(feedback.starts_with("Your previous response did not satisfy"));
        assert!(feedback.contains("Task ID: TASK-0003\nRole: qa\n"));
        assert!(feedback.ends_with("Validation errors:\n- Missing required field: owner\n"));
    }
}
