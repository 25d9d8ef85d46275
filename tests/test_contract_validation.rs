//! Output contract extraction and validation tests
//!
//! Tests exercise whole agent responses the way the dispatcher sees them.

use serde_json::{json, Value};
use team_orchestrator::contract::{
    build_compression_summary, contract_schema, extract_contract, format_contract_error_feedback,
    validate_contract, validate_report_structure, validate_task_output, OutputContract,
};
use team_orchestrator::testing::{report_with_footer, valid_contract, valid_report};

fn object(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_conforming_report_has_no_violations() {
    let report = valid_report("TASK-0004", "game_design", &[]);
    let contract = extract_contract(&report);

    assert!(contract.is_some());
    assert!(validate_task_output("game_design", "TASK-0004", &report, contract.as_ref()).is_empty());
}

#[test]
fn test_last_fenced_block_wins() {
    let text = "```json\n{\"task_id\": \"OLD\"}\n```\nmore words\n```JSON\n{\"task_id\": \"NEW\"}\n```\n";
    let contract = extract_contract(text).unwrap();
    assert_eq!(contract["task_id"], "NEW");
}

#[test]
fn test_bare_object_fallback_and_non_objects() {
    let contract = extract_contract("Summary text {\"owner\": \"qa\"} trailing").unwrap();
    assert_eq!(contract["owner"], "qa");

    assert!(extract_contract("no json here").is_none());
    assert!(extract_contract("```json\n[1, 2, 3]\n```").is_none());
    assert!(extract_contract("```json\n{not json}\n```").is_none());
}

#[test]
fn test_missing_footer_is_a_single_violation() {
    assert_eq!(
        validate_contract("coder", "TASK-0001", None),
        vec!["Missing JSON output contract footer."]
    );
}

#[test]
fn test_each_missing_required_field_is_reported() {
    for field in ["task_id", "owner", "acceptance_criteria", "artifacts"] {
        let mut contract = object(valid_contract("TASK-0001", "coder", &[]));
        contract.remove(field);

        let errors = validate_contract("coder", "TASK-0001", Some(&contract));

        assert!(
            errors.contains(&format!("Missing required field: {field}")),
            "{field}: {errors:?}"
        );
    }
}

#[test]
fn test_identity_mismatches_name_both_values() {
    let mut contract = object(valid_contract("TASK-0001", "coder", &[]));
    contract.insert("task_id".into(), json!("TASK-0009"));
    contract.insert("owner".into(), json!("qa"));

    let errors = validate_contract("coder", "TASK-0001", Some(&contract));

    assert!(errors.contains(&"task_id mismatch: expected TASK-0001, got TASK-0009".to_string()));
    assert!(errors.contains(&"owner mismatch: expected coder, got qa".to_string()));
}

#[test]
fn test_status_must_be_known() {
    let mut contract = object(valid_contract("TASK-0001", "coder", &[]));
    contract.insert("status".into(), json!("finished-ish"));

    let errors = validate_contract("coder", "TASK-0001", Some(&contract));
    assert_eq!(errors, vec!["Invalid status: finished-ish"]);
}

#[test]
fn test_lists_must_be_non_empty() {
    let mut contract = object(valid_contract("TASK-0001", "coder", &[]));
    contract.insert("handoff_to".into(), json!([]));
    contract.insert("artifacts".into(), json!("docs/x.md"));

    let errors = validate_contract("coder", "TASK-0001", Some(&contract));

    assert!(errors.contains(&"handoff_to must be a non-empty list".to_string()));
    assert!(errors.contains(&"artifacts must be a non-empty list".to_string()));
}

#[test]
fn test_action_items_are_checked_item_by_item() {
    let mut contract = object(valid_contract("TASK-0001", "coder", &[]));
    contract.insert(
        "next_role_action_items".into(),
        json!([
            {"role": "qa", "items": ["run smoke"]},
            {"role": " ", "items": []},
            "not an object",
            {"role": "sre", "items": ["ok", ""]}
        ]),
    );

    let errors = validate_contract("coder", "TASK-0001", Some(&contract));

    assert_eq!(
        errors,
        vec![
            "next_role_action_items[2].role must be a non-empty string",
            "next_role_action_items[2].items must be a non-empty list",
            "next_role_action_items[3] must be an object",
            "next_role_action_items[4].items must contain non-empty strings",
        ]
    );
}

#[test]
fn test_role_artifact_paths_are_enforced() {
    let contract = object(valid_contract("TASK-0001", "narrative", &["docs/narrative.md"]));
    let errors = validate_contract("narrative", "TASK-0001", Some(&contract));
    assert_eq!(errors, vec!["Missing required artifact path: assets/text/ui_copy.md"]);

    let mut typed = object(valid_contract("TASK-0001", "narrative", &["docs/narrative.md"]));
    typed.insert(
        "artifacts".into(),
        json!([
            {"type": "doc", "path": "docs/narrative.md"},
            {"type": "copy", "value": ["assets/text/ui_copy.md"]}
        ]),
    );
    assert!(validate_contract("narrative", "TASK-0001", Some(&typed)).is_empty());
}

#[test]
fn test_report_sections_accept_heading_variants() {
    let text = "### Task Status Summary\n### ACCEPTANCE CRITERIA\n### Required Artifacts\n### Handoff Instructions\n";
    assert!(validate_report_structure(text).is_empty());

    let errors = validate_report_structure("## Task Meta\n## Artifacts\n");
    assert_eq!(
        errors,
        vec![
            "Missing report section: acceptance criteria",
            "Missing report section: handoff",
        ]
    );
}

#[test]
fn test_task_output_lists_contract_then_structure_errors() {
    let footer = valid_contract("TASK-0001", "qa", &[]);
    let text = format!("Only a footer\n```json\n{footer}\n```");
    let contract = extract_contract(&text);

    let errors = validate_task_output("qa", "TASK-0002", &text, contract.as_ref());

    assert_eq!(errors[0], "task_id mismatch: expected TASK-0002, got TASK-0001");
    assert_eq!(errors.len(), 5);
}

#[test]
fn test_feedback_enumerates_violations() {
    let feedback = format_contract_error_feedback(
        &["Missing report section: handoff".to_string(), "Invalid status: x".to_string()],
        "TASK-0003",
        "sre",
    );

    assert!(feedback.starts_with("Your previous response did not satisfy the required output contract.\n"));
    assert!(feedback.contains("Task ID: TASK-0003\nRole: sre\n"));
    assert!(feedback.ends_with("Validation errors:\n- Missing report section: handoff\n- Invalid status: x\n"));
}

#[test]
fn test_compression_summary_reparses_as_contract_shape() {
    let mut raw = object(valid_contract("TASK-0001", "coder", &["src/lib.rs"]));
    raw.insert("handoff_to".into(), json!(["reviewer", "qa"]));
    raw.insert(
        "acceptance_criteria".into(),
        json!(["unit tests pass", "lint pass"]),
    );
    let contract = OutputContract::from_object(&raw);

    let summary = build_compression_summary("TASK-0001", "Implement loop", &contract);
    let footer = extract_contract(&summary).unwrap();

    assert!(summary.starts_with("### IMMUTABLE SUMMARY (5-10 lines)\n1) Task: TASK-0001 - Implement loop\n"));
    assert!(summary.contains("4) Acceptance: met; criteria_count=2"));
    assert_eq!(footer["type"], "compression_summary");
    assert_eq!(footer["next_owner"], "reviewer");
    assert_eq!(footer["task_id"], "TASK-0001");
}

#[test]
fn test_report_builder_wraps_any_footer() {
    let text = report_with_footer(&json!({"task_id": "TASK-0001"}));
    assert!(validate_report_structure(&text).is_empty());
    assert_eq!(extract_contract(&text).unwrap()["task_id"], "TASK-0001");
}

#[test]
fn test_contract_schema_names_required_fields() {
    let schema = serde_json::to_value(contract_schema()).unwrap();
    let required: Vec<&str> = schema["required"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();

    for field in ["task_id", "owner", "acceptance_criteria", "artifacts", "handoff_to"] {
        assert!(required.contains(&field), "{field} not required: {required:?}");
    }
    assert!(!required.contains(&"status"));
}
