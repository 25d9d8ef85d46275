//! Task graph construction, readiness and deferral tests


use chrono::Duration;
use proptest::prelude::*;
use std::fs;
use team_orchestrator::catalog::RoleCatalog;
use team_orchestrator::error::TeamError;
use team_orchestrator::graph::{next_id, TaskGraph, TASK_PREFIX};
use team_orchestrator::state::{
    DebateStage, OwnerStatus, RuntimeKnobs, RuntimeState, TaskMetadata, TaskStatus,
};
use team_orchestrator::testing::MemoryEventSink;
use tempfile::TempDir;
use test_helpers::{epoch, roles, test_config};

struct Fixture {
    _dir: TempDir,
    catalog: RoleCatalog,
    events: MemoryEventSink,
    state: RuntimeState,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let catalog = RoleCatalog::from_config(&config);
    let state = RuntimeState::new(catalog.role_ids(), RuntimeKnobs::default(), epoch());
    Fixture {
        _dir: dir,
        catalog,
        events: MemoryEventSink::new(),
        state,
    }
}

fn mark(state: &mut RuntimeState, task_id: &str, status: TaskStatus) {
    state.task_mut(task_id).unwrap().status = status;
}

#[test]
fn test_pipeline_is_a_linear_dependency_chain() {
    let mut fx = fixture();
    let pipeline = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
        .create_pipeline(
            "Login",
            "  Add a login screen  ",
            &roles(&["concept", "coder", "qa"]),
        )
        .unwrap();

    assert_eq!(pipeline.id, "PIPE-0001");
    assert_eq!(pipeline.brief, "Add a login screen");
    assert_eq!(pipeline.task_ids, vec!["TASK-0001", "TASK-0002", "TASK-0003"]);

    let state = &fx.state;
    assert!(state.task("TASK-0001").unwrap().dependencies().is_empty());
    assert_eq!(state.task("TASK-0002").unwrap().dependencies().to_vec(), vec!["TASK-0001"]);
    assert_eq!(state.task("TASK-0003").unwrap().dependencies().to_vec(), vec!["TASK-0002"]);

    let stage_two = state.task("TASK-0002").unwrap();
    assert_eq!(stage_two.title, "[PIPE-0001] Login :: coder");
    assert_eq!(stage_two.metadata.stage_index, Some(2));
    assert_eq!(stage_two.metadata.stage_count, Some(3));
    assert_eq!(stage_two.metadata.pipeline_id.as_deref(), Some("PIPE-0001"));
    assert!(stage_two
        .description
        .starts_with("Pipeline ID: PIPE-0001\nStage: 2/3\nRole: coder\nProject brief:\nAdd a login screen\n"));
    assert!(!stage_two.description.contains("Stage template:"));

    assert_eq!(fx.events.count("task_enqueued"), 3);
    assert_eq!(fx.events.count("pipeline_created"), 1);
}

#[test]
fn test_stage_is_not_ready_until_previous_stage_done() {
    let mut fx = fixture();
    TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
        .create_pipeline("Login", "brief", &roles(&["concept", "coder", "qa"]))
        .unwrap();
    let now = epoch();

    assert_eq!(fx.state.next_queued_task(now).unwrap().id, "TASK-0001");
    let blocked: Vec<&str> = fx
        .state
        .queued_but_blocked(now)
        .iter()
        .map(|task| task.id.as_str())
        .collect();
    assert_eq!(blocked, vec!["TASK-0002", "TASK-0003"]);

    mark(&mut fx.state, "TASK-0001", TaskStatus::Running);
    assert!(fx.state.next_queued_task(now).is_none());

    mark(&mut fx.state, "TASK-0001", TaskStatus::Done);
    assert_eq!(fx.state.next_queued_task(now).unwrap().id, "TASK-0002");
    let report = fx.state.blocked_report(now);
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].task_id, "TASK-0003");
    assert_eq!(report[0].waiting_for, vec!["TASK-0002"]);
}

#[test]
fn test_stage_template_is_appended() {
    let mut fx = fixture();
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    fs::create_dir_all(config.paths.templates_path()).unwrap();
    fs::write(
        config.paths.templates_path().join("coder.md"),
        "\n## Build notes\nKeep diffs small.\n\n",
    )
    .unwrap();
    let catalog = RoleCatalog::from_config(&config);

    TaskGraph::new(&mut fx.state, &catalog, &fx.events, epoch())
        .create_pipeline("Login", "brief", &roles(&["coder"]))
        .unwrap();

    let description = &fx.state.task("TASK-0001").unwrap().description;
    assert!(description.ends_with("\nStage template:\n## Build notes\nKeep diffs small.\n"));
}

#[test]
fn test_pipeline_without_roles_is_rejected() {
    let mut fx = fixture();
    let result = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
        .create_pipeline("Login", "brief", &roles(&["  ", ""]));

    assert!(matches!(result, Err(TeamError::InvalidInput { .. })));
    assert!(fx.state.tasks.is_empty());
    assert!(fx.state.pipelines.is_empty());
}

#[test]
fn test_debate_moderator_depends_on_every_participant() {
    let mut fx = fixture();
    let debate = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
        .create_debate(
            "Storage",
            "SQLite or flat files?",
            &roles(&["council_red", "council_blue", "council_green"]),
            "orchestrator",
        )
        .unwrap();

    assert_eq!(debate.id, "DEBATE-0001");
    assert_eq!(fx.state.tasks.len(), 4);
    assert_eq!(debate.participant_task_ids, vec!["TASK-0001", "TASK-0002", "TASK-0003"]);
    assert_eq!(debate.moderator_task_id, "TASK-0004");
    assert_eq!(debate.task_ids.len(), 4);

    let moderator = fx.state.task("TASK-0004").unwrap();
    assert_eq!(moderator.role, "orchestrator");
    assert_eq!(moderator.dependencies(), debate.participant_task_ids.as_slice());
    assert_eq!(moderator.metadata.debate_stage, Some(DebateStage::Moderation));

    for id in &debate.participant_task_ids {
        let participant = fx.state.task(id).unwrap();
        assert!(participant.dependencies().is_empty());
        assert_eq!(participant.metadata.debate_stage, Some(DebateStage::Position));
    }

    for id in ["TASK-0001", "TASK-0002"] {
        mark(&mut fx.state, id, TaskStatus::Done);
    }
    assert_eq!(fx.state.next_queued_task(epoch()).unwrap().id, "TASK-0003");
    mark(&mut fx.state, "TASK-0003", TaskStatus::Done);
    assert_eq!(fx.state.next_queued_task(epoch()).unwrap().id, "TASK-0004");
}

#[test]
fn test_missing_dependency_is_never_ready() {
    let mut fx = fixture();
    let metadata = TaskMetadata {
        depends_on_task_ids: vec!["TASK-0099".to_string()],
        ..Default::default()
    };
    let task = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
        .enqueue_task("coder", "Orphan", "Depends on nothing real", metadata)
        .unwrap();

    assert!(!fx.state.is_task_ready(&task));
    assert!(fx.state.next_queued_task(epoch()).is_none());
    assert_eq!(fx.state.blocked_report(epoch())[0].waiting_for, vec!["TASK-0099"]);
}

#[test]
fn test_deferred_task_is_skipped_until_retry_at() {
    let mut fx = fixture();
    let task = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch()).enqueue_task(
        "coder",
        "Fix",
        "Fix it",
        TaskMetadata::default(),
    )
    .unwrap();
    let now = epoch();

    fx.state
        .task_mut(&task.id)
        .unwrap()
        .set_retry(5, "quota", now);

    let stored = fx.state.task(&task.id).unwrap();
    assert!(stored.is_deferred(now));
    assert!(stored.is_deferred(now + Duration::minutes(4)));
    assert!(!stored.is_deferred(now + Duration::minutes(5)));
    assert!(!stored.is_deferred(now + Duration::minutes(6)));

    assert!(fx.state.next_queued_task(now).is_none());
    assert_eq!(fx.state.queued_but_blocked(now).len(), 1);
    assert_eq!(
        fx.state.next_queued_task(now + Duration::minutes(6)).unwrap().id,
        task.id
    );
}

#[test]
fn test_unparseable_retry_at_is_not_deferred() {
    let mut fx = fixture();
    let metadata = TaskMetadata {
        retry_at: Some("not a timestamp".to_string()),
        ..Default::default()
    };
    let task = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
        .enqueue_task("coder", "Fix", "Fix it", metadata)
        .unwrap();

    assert!(!task.is_deferred(epoch()));
    assert_eq!(fx.state.next_queued_task(epoch()).unwrap().id, task.id);
}

#[test]
fn test_cancel_fails_queued_task_and_its_pipeline() {
    let mut fx = fixture();
    let mut graph = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch());
    graph
        .create_pipeline("Login", "brief", &roles(&["concept", "coder"]))
        .unwrap();

    let cancelled = graph.cancel_task("TASK-0002", "  ").unwrap();
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert_eq!(cancelled.error.as_deref(), Some("Cancelled: cancelled by operator"));

    let again = graph.cancel_task("TASK-0002", "twice");
    assert!(matches!(again, Err(TeamError::InvalidTransition { .. })));
    let missing = graph.cancel_task("TASK-0404", "gone");
    assert!(matches!(missing, Err(TeamError::TaskNotFound { .. })));

    let pipeline = &fx.state.pipelines[0];
    assert_eq!(pipeline.status, OwnerStatus::Failed);
    assert_eq!(
        pipeline.last_error.as_deref(),
        Some("Cancelled: cancelled by operator")
    );
    assert_eq!(fx.events.count("task_cancelled"), 1);
    assert_eq!(fx.events.count("pipeline_status_changed"), 1);
}

#[test]
fn test_ids_continue_after_existing_maximum() {
    let ids = ["TASK-0002", "TASK-0010", "TASK-bogus", "TASK-0007"];
    assert_eq!(next_id(TASK_PREFIX, ids.iter().copied()).unwrap(), "TASK-0011");
    assert_eq!(next_id("PIPE", std::iter::empty()).unwrap(), "PIPE-0001");
}

proptest! {
    #[test]
    fn test_next_id_is_one_past_the_maximum(suffixes in proptest::collection::vec(1u32..20_000, 0..40)) {
        let ids: Vec<String> = suffixes.iter().map(|n| format!("TASK-{n:04}")).collect();
        let expected = suffixes.iter().max().copied().unwrap_or(0) + 1;

        let next = next_id(TASK_PREFIX, ids.iter().map(String::as_str)).unwrap();

        prop_assert_eq!(next, format!("TASK-{expected:04}"));
    }

    #[test]
    fn test_pipeline_stage_never_ready_before_predecessor_done(
        stage_count in 2usize..6,
        done_prefix in 0usize..6,
    ) {
        let mut fx = fixture();
        let stage_roles: Vec<String> = (0..stage_count).map(|i| format!("role_{i}")).collect();
        let pipeline = TaskGraph::new(&mut fx.state, &fx.catalog, &fx.events, epoch())
            .create_pipeline("P", "brief", &stage_roles)
            .unwrap();

        let done = done_prefix.min(stage_count);
        for id in pipeline.task_ids.iter().take(done) {
            mark(&mut fx.state, id, TaskStatus::Done);
        }

        let next = fx.state.next_queued_task(epoch()).map(|task| task.id.clone());
        prop_assert_eq!(next, pipeline.task_ids.get(done).cloned());
    }
}
