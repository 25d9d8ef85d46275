//! Mock collaborators for exercising the engine without agent CLIs
//!
//! Provides a scripted [`AgentRunner`], an in-memory [`EventSink`], a manually
//! advanced [`Clock`], and builders for contract-conforming agent responses.

use crate::clock::Clock;
use crate::contract::required_artifact_paths;
use crate::events::{EventSink, TeamEvent};
use crate::runner::{AgentRunRequest, AgentRunResult, AgentRunner, RunnerError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Agent runner that replays queued replies and records every request.
///
/// Once the queue is empty it answers with a conforming report for the
/// requested task (see [`ScriptedAgentRunner::conforming`]) or with exit 1.
#[derive(Debug, Default)]
pub struct ScriptedAgentRunner {
    pub replies: Arc<Mutex<VecDeque<AgentRunResult>>>,
    pub requests: Arc<Mutex<Vec<AgentRunRequest>>>,
    pub auth_errors: Vec<String>,
    pub auto_report: bool,
}

impl ScriptedAgentRunner {
    pub fn new(replies: Vec<AgentRunResult>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Default::default()
        }
    }

    /// Every unscripted run returns [`valid_report`] for the request
    pub fn conforming() -> Self {
        Self {
            auto_report: true,
            ..Default::default()
        }
    }

    pub fn with_auth_errors(mut self, errors: Vec<String>) -> Self {
        self.auth_errors = errors;
        self
    }

    pub async fn push_reply(&self, reply: AgentRunResult) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn get_requests(&self) -> Vec<AgentRunRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgentRunner {
    async fn run(&self, request: AgentRunRequest) -> Result<AgentRunResult, RunnerError> {
        let scripted = self.replies.lock().await.pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None if self.auto_report => AgentRunResult::success(
                valid_report(&request.task_id, &request.role, &[]),
                Some(format!("session-{}", request.role)),
            ),
            None => AgentRunResult::failure(1, "no scripted reply", None),
        };
        self.requests.lock().await.push(request);
        Ok(reply)
    }

    async fn auth_check(&self) -> Vec<String> {
        self.auth_errors.clone()
    }
}

/// Event sink keeping every emitted event in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: std::sync::Mutex<Vec<TeamEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, timestamps included
    pub fn records(&self) -> Vec<TeamEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.records()
            .into_iter()
            .map(|record| (record.event, record.payload))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }

    /// Payloads of every event called `name`, in emission order
    pub fn payloads(&self, name: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.payloads(name).len()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &str, payload: Value, at: DateTime<Utc>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(TeamEvent::new(event, payload, at));
        }
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start.trunc_subsecs(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to.trunc_subsecs(0);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Contract footer object for `task_id`/`role`. Empty `artifacts` means the
/// role's required paths, or `docs/notes.md` for roles without any.
pub fn valid_contract(task_id: &str, role: &str, artifacts: &[&str]) -> Value {
    let artifacts: Vec<&str> = if !artifacts.is_empty() {
        artifacts.to_vec()
    } else if required_artifact_paths(role).is_empty() {
        vec!["docs/notes.md"]
    } else {
        required_artifact_paths(role).to_vec()
    };

    json!({
        "task_id": task_id,
        "owner": role,
        "status": "done",
        "acceptance_criteria": ["[x] work delivered"],
        "artifacts": artifacts,
        "risks": [],
        "handoff_to": ["orchestrator"],
        "next_role_action_items": [
            {"role": "orchestrator", "items": ["review the delivered work"]}
        ],
    })
}

/// Markdown report with every required section and a fenced contract footer
pub fn valid_report(task_id: &str, role: &str, artifacts: &[&str]) -> String {
    report_with_footer(&valid_contract(task_id, role, artifacts))
}

/// Markdown report ending in `footer` as a fenced JSON block
pub fn report_with_footer(footer: &Value) -> String {
    let footer = serde_json::to_string_pretty(footer).unwrap_or_else(|_| footer.to_string());
    format!(
        "## Task Meta\nDone.\n\n\
         ## Acceptance Criteria\n- [x] work delivered\n\n\
         ## Artifacts\n- see footer\n\n\
         ## Handoff\nOver to the orchestrator.\n\n\
         ```json\n{footer}\n```\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{extract_contract, validate_task_output};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn request(task_id: &str, role: &str) -> AgentRunRequest {
        AgentRunRequest {
            role: role.to_string(),
            task_id: task_id.to_string(),
            prompt: "do it".to_string(),
            resume_session_id: None,
            backend: "codex".to_string(),
            model: String::new(),
            workdir: PathBuf::from("."),
            timeout: std::time::Duration::from_secs(30),
        }
    }

    #[test]
    fn test_valid_report_passes_validation() {
        for role in ["concept", "narrative", "coder"] {
            let report = valid_report("TASK-0001", role, &[]);
            let contract = extract_contract(&report);
            let errors = validate_task_output(role, "TASK-0001", &report, contract.as_ref());
            assert!(errors.is_empty(), "{role}: {errors:?}");
        }
    }

    #[tokio::test]
    async fn test_scripted_runner_replays_then_falls_back() {
        let runner = ScriptedAgentRunner::new(vec![AgentRunResult::failure(2, "boom", None)]);

        let first = runner.run(request("TASK-0001", "qa")).await.unwrap();
        let second = runner.run(request("TASK-0001", "qa")).await.unwrap();

        assert_eq!(first.exit_code, 2);
        assert_eq!(second.exit_code, 1);
        assert_eq!(runner.request_count().await, 2);
    }

    #[tokio::test]
    async fn test_conforming_runner_answers_for_request() {
        let runner = ScriptedAgentRunner::conforming();
        let reply = runner.run(request("TASK-0007", "coder")).await.unwrap();

        assert!(reply.succeeded());
        assert_eq!(reply.session_id.as_deref(), Some("session-coder"));
        let contract = extract_contract(&reply.message).unwrap();
        assert_eq!(contract["task_id"], "TASK-0007");
    }

    #[test]
    fn test_manual_clock_and_memory_sink() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2025, 1, 1, 1, 30, 0).unwrap());

        let sink = MemoryEventSink::new();
        sink.emit("a", json!({"n": 1}), clock.now());
        sink.emit("b", json!({}), clock.now());
        sink.emit("a", json!({"n": 2}), clock.now());
        assert_eq!(sink.names(), vec!["a", "b", "a"]);
        assert_eq!(sink.records()[0].timestamp, "2025-01-01T01:30:00+00:00");
        assert_eq!(sink.payloads("a")[1]["n"], 2);
        assert_eq!(sink.count("b"), 1);
    }
}
