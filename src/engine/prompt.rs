//! Agent prompt assembly and handoff context

use super::reports::ReportStore;
use crate::catalog::RoleCatalog;
use crate::state::{RuntimeState, Task};
use std::path::Path;

/// Characters of a dependency's report or digest carried into the next prompt
pub const HANDOFF_CHAR_LIMIT: usize = 4000;

const LOW_SPEC_RULES: &str = "Low-spec runtime rules:\n\
    - Keep changes minimal and focused.\n\
    - Minimize file count and command count.\n\
    - Prefer quick local checks only; heavy tests stay in CI.\n\
    - Keep planning concise and execution-oriented.\n";

const ROLE_GATES: &[(&str, &[&str])] = &[
    (
        "coder",
        &[
            "Before marking done, run fast local checks aligned with lint + unit_tests.",
            "If local resources are constrained, run subset locally and state that full suite is CI-only.",
        ],
    ),
    (
        "reviewer",
        &[
            "Provide file-referenced findings for architecture_check and review_approval.",
            "Return explicit merge recommendation: approve or needs_changes.",
        ],
    ),
    (
        "qa",
        &[
            "List smoke/regression flows executed and expected outcomes.",
            "Call out pass/fail status per flow.",
        ],
    ),
    (
        "security",
        &[
            "Provide threat model delta in STRIDE-style bullets where relevant.",
            "Include severity, exploit scenario, and concrete fix recommendation per issue.",
        ],
    ),
    (
        "sre",
        &[
            "Provide reliability_slo assumptions and observability baseline.",
            "Include rollback safety checks and missing signals.",
        ],
    ),
    (
        "devops",
        &[
            "Include deploy checklist, rollback plan, and release gate confirmation.",
            "Flag unknowns that block safe release.",
        ],
    ),
];

/// Release-gate expectations for delivery roles; empty for everyone else
pub fn role_gate_guidance(role: &str) -> String {
    let Some((_, rules)) = ROLE_GATES.iter().find(|(name, _)| *name == role) else {
        return String::new();
    };
    let mut guidance = String::from("Gate-aligned role requirements:\n");
    for rule in rules.iter() {
        guidance.push_str("- ");
        guidance.push_str(rule);
        guidance.push('\n');
    }
    guidance
}

pub fn output_contract_prompt(task_id: &str, role: &str) -> String {
    format!(
        "Output contract (strict):\n\
         - Include markdown sections covering: Task Meta, Acceptance Criteria, Artifacts, and Handoff.\n\
         - Section titles may follow the active stage template wording.\n\
         - End response with ONE fenced JSON block (```json ... ```).\n\
         - JSON required fields: task_id, owner, status, acceptance_criteria, artifacts, risks, handoff_to, next_role_action_items.\n\
         - task_id must be exactly {task_id}.\n\
         - owner must be exactly {role}.\n"
    )
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Digest or report excerpt of every dependency, joined by blank lines.
///
/// A dependency's compression digest wins over its raw report. Missing tasks
/// and unreadable or empty files are skipped.
pub fn build_handoff_context(state: &RuntimeState, task: &Task, reports: &ReportStore) -> String {
    let mut chunks = Vec::new();

    for dep_id in task.dependencies() {
        let Some(dep) = state.task(dep_id) else {
            continue;
        };

        let digest = dep
            .metadata
            .compression_path
            .as_deref()
            .and_then(|path| reports.read(path))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        if let Some(digest) = digest {
            chunks.push(format!(
                "Handoff summary from {dep_id} ({}):\n{}",
                dep.role,
                truncate_chars(&digest, HANDOFF_CHAR_LIMIT)
            ));
            continue;
        }

        let excerpt = dep
            .output_path
            .as_deref()
            .and_then(|path| reports.read(path))
            .map(|text| truncate_chars(&text, HANDOFF_CHAR_LIMIT).trim().to_string())
            .filter(|text| !text.is_empty());
        if let Some(excerpt) = excerpt {
            chunks.push(format!("Handoff from {dep_id} ({}):\n{excerpt}", dep.role));
        }
    }

    chunks.join("\n\n")
}

/// Full prompt for one attempt: system and role prompts, task body, contract
/// instructions, then handoff context and correction feedback when present
pub fn build_task_prompt(
    catalog: &RoleCatalog,
    task: &Task,
    handoff: &str,
    workdir: &Path,
    correction_feedback: &str,
) -> String {
    let role = task.role.as_str();
    let mut body = format!(
        "Role: {role}\n\
         Task ID: {id}\n\
         Title: {title}\n\
         Description:\n{description}\n\n\
         Work directory: {workdir}\n\
         Work in the current repository.\n\
         {LOW_SPEC_RULES}\n\
         {gates}\n\
         {contract}\n",
        id = task.id,
        title = task.title,
        description = task.description,
        workdir = workdir.display(),
        gates = role_gate_guidance(role),
        contract = output_contract_prompt(&task.id, role),
    );

    if !handoff.is_empty() {
        body.push_str("\nPipeline handoff context from previous stages:\n");
        body.push_str(handoff);
        body.push('\n');
    }

    if !correction_feedback.is_empty() {
        body.push_str("\nContract correction request:\n");
        body.push_str(correction_feedback);
        body.push('\n');
    }

    let prefix: Vec<String> = [catalog.system_prompt(), catalog.role_prompt(role)]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    if prefix.is_empty() {
        body
    } else {
        let mut parts = prefix;
        parts.push(body);
        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TeamConfig;
    use crate::state::{RuntimeKnobs, TaskMetadata, TaskStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use std::fs;
    use tempfile::TempDir;

    fn task(id: &str, role: &str, deps: &[&str]) -> Task {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        Task {
            id: id.to_string(),
            role: role.to_string(),
            title: "Title".to_string(),
            description: "Desc".to_string(),
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            session_id: None,
            output_path: None,
            error: None,
            metadata: TaskMetadata {
                depends_on_task_ids: deps.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            },
            extra: Map::new(),
        }
    }

    #[test]
    fn test_gate_guidance_table() {
        assert!(role_gate_guidance("coder").starts_with("Gate-aligned role requirements:\n- Before"));
        assert_eq!(role_gate_guidance("coder").lines().count(), 3);
        assert_eq!(role_gate_guidance("narrative"), "");
    }

    #[test]
    fn test_prompt_layout_without_prefix() {
        let dir = TempDir::new().unwrap();
        let catalog = RoleCatalog::from_config(&TeamConfig::test_config(dir.path()));
        let prompt = build_task_prompt(&catalog, &task("TASK-0002", "qa", &[]), "", Path::new("/w"), "");

        assert!(prompt.starts_with("Role: qa\nTask ID: TASK-0002\nTitle: Title\nDescription:\nDesc\n\nWork directory: /w\n"));
        assert!(prompt.contains("- task_id must be exactly TASK-0002.\n"));
        assert!(prompt.contains("- owner must be exactly qa.\n"));
        assert!(prompt.contains("Call out pass/fail status per flow."));
        assert!(!prompt.contains("Pipeline handoff context"));
        assert!(!prompt.contains("Contract correction request"));
    }

    #[test]
    fn test_prompt_prefix_handoff_and_feedback() {
        let dir = TempDir::new().unwrap();
        let config = TeamConfig::test_config(dir.path());
        fs::create_dir_all(config.paths.prompts_path()).unwrap();
        fs::write(config.paths.prompts_path().join("orchestrator_system.md"), "SYSTEM\n").unwrap();
        fs::write(config.paths.prompts_path().join("coder.md"), "CODER\n").unwrap();
        let catalog = RoleCatalog::from_config(&config);

        let prompt = build_task_prompt(
            &catalog,
            &task("TASK-0003", "coder", &[]),
            "Handoff from TASK-0001 (concept):\nnotes",
            Path::new("/w"),
            "fix the footer",
        );

        assert!(prompt.starts_with("SYSTEM\n\nCODER\n\nRole: coder\n"));
        assert!(prompt.contains(
            "\nPipeline handoff context from previous stages:\nHandoff from TASK-0001 (concept):\nnotes\n"
        ));
        assert!(prompt.ends_with("\nContract correction request:\nfix the footer\n"));
    }

    #[test]
    fn test_handoff_prefers_digest_and_truncates_reports() {
        let dir = TempDir::new().unwrap();
        let reports = ReportStore::new(dir.path(), dir.path().join("out"));
        let mut state = RuntimeState::new(&[], RuntimeKnobs::default(), Utc::now());

        let mut with_digest = task("TASK-0001", "concept", &[]);
        with_digest.output_path = Some(reports.write_output("TASK-0001", "raw concept").unwrap());
        with_digest.metadata.compression_path =
            Some(reports.write_compression("TASK-0001", "digest text").unwrap());

        let mut raw_only = task("TASK-0002", "narrative", &[]);
        raw_only.output_path = Some(reports.write_output("TASK-0002", &"y".repeat(5000)).unwrap());

        state.tasks.push(with_digest);
        state.tasks.push(raw_only);
        let consumer = task("TASK-0003", "coder", &["TASK-0001", "TASK-0002", "TASK-0404"]);

        let handoff = build_handoff_context(&state, &consumer, &reports);
        let chunks: Vec<&str> = handoff.split("\n\n").collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Handoff summary from TASK-0001 (concept):\ndigest text");
        assert!(chunks[1].starts_with("Handoff from TASK-0002 (narrative):\n"));
        assert_eq!(chunks[1].matches('y').count(), HANDOFF_CHAR_LIMIT);
    }

    #[test]
    fn test_handoff_empty_without_dependencies() {
        let dir = TempDir::new().unwrap();
        let reports = ReportStore::new(dir.path(), dir.path().join("out"));
        let state = RuntimeState::new(&[], RuntimeKnobs::default(), Utc::now());
        assert_eq!(build_handoff_context(&state, &task("TASK-0001", "qa", &[]), &reports), "");
    }
}
