//! Write-side task graph: enqueueing tasks and expanding pipelines and debates
//!
//! Pipelines become a linear chain of stage tasks. Debates fan N position tasks
//! into one moderator task. Callers persist the state afterwards.

use crate::aggregate::settle_owners;
use crate::catalog::RoleCatalog;
use crate::error::{TeamError, TeamResult};
use crate::events::EventSink;
use crate::state::{
    Debate, DebateStage, OwnerStatus, Pipeline, RuntimeState, Task, TaskMetadata, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map};
use tracing::{debug, info};

const CONTRACT_SCHEMA_NOTE: &str =
    "- Follow output contract schema at team/config/output_contract.schema.json.\n";

/// Mutating view over the runtime document
pub struct TaskGraph<'a> {
    state: &'a mut RuntimeState,
    catalog: &'a RoleCatalog,
    events: &'a dyn EventSink,
    now: DateTime<Utc>,
}

impl<'a> TaskGraph<'a> {
    pub fn new(
        state: &'a mut RuntimeState,
        catalog: &'a RoleCatalog,
        events: &'a dyn EventSink,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state,
            catalog,
            events,
            now,
        }
    }

    /// Append a queued task with the next free id. Unknown roles get an idle record.
    pub fn enqueue_task(
        &mut self,
        role: &str,
        title: &str,
        description: &str,
        metadata: TaskMetadata,
    ) -> TeamResult<Task> {
        let id = self.state.next_task_id()?;
        self.state.ensure_role(role);

        let task = Task {
            id,
            role: role.to_string(),
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            status: TaskStatus::Queued,
            created_at: self.now,
            updated_at: self.now,
            started_at: None,
            finished_at: None,
            session_id: None,
            output_path: None,
            error: None,
            metadata,
            extra: Map::new(),
        };
        self.state.tasks.push(task.clone());

        debug!(task_id = %task.id, role = role, "Task enqueued");
        self.events.emit(
            "task_enqueued",
            json!({
                "task_id": task.id,
                "role": task.role,
                "title": task.title,
                "pipeline_id": task.metadata.pipeline_id,
            }),
            self.now,
        );
        Ok(task)
    }

    /// One stage task per role, each depending on the previous stage
    pub fn create_pipeline(
        &mut self,
        title: &str,
        brief: &str,
        roles: &[String],
    ) -> TeamResult<Pipeline> {
        let roles = clean_roles(roles);
        if roles.is_empty() {
            return Err(TeamError::invalid_input("pipeline needs at least one role"));
        }

        let pipeline_id = self.state.next_pipeline_id()?;
        let stage_count = roles.len();
        let mut task_ids: Vec<String> = Vec::with_capacity(stage_count);

        for (index, role) in roles.iter().enumerate() {
            let stage_index = index + 1;
            let description = pipeline_stage_description(
                &pipeline_id,
                stage_index,
                stage_count,
                role,
                brief,
                &self.catalog.stage_template(role),
            );
            let metadata = TaskMetadata {
                depends_on_task_ids: task_ids.last().cloned().into_iter().collect(),
                pipeline_id: Some(pipeline_id.clone()),
                stage_index: Some(stage_index as u32),
                stage_count: Some(stage_count as u32),
                ..Default::default()
            };
            let stage_title = format!("[{pipeline_id}] {} :: {role}", title.trim());
            let task = self.enqueue_task(role, &stage_title, &description, metadata)?;
            task_ids.push(task.id);
        }

        let pipeline = Pipeline {
            id: pipeline_id,
            title: title.trim().to_string(),
            brief: brief.trim().to_string(),
            roles,
            task_ids,
            status: OwnerStatus::Queued,
            created_at: self.now,
            updated_at: self.now,
            last_error: None,
            extra: Map::new(),
        };
        self.state.pipelines.push(pipeline.clone());

        info!(pipeline_id = %pipeline.id, stages = stage_count, "Pipeline created");
        self.events.emit(
            "pipeline_created",
            json!({
                "pipeline_id": pipeline.id,
                "title": pipeline.title,
                "roles": pipeline.roles,
                "task_ids": pipeline.task_ids,
            }),
            self.now,
        );
        Ok(pipeline)
    }

    /// Independent position tasks plus a moderator task that depends on all of them
    pub fn create_debate(
        &mut self,
        title: &str,
        topic: &str,
        roles: &[String],
        moderator: &str,
    ) -> TeamResult<Debate> {
        let roles = clean_roles(roles);
        if roles.is_empty() {
            return Err(TeamError::invalid_input("debate needs at least one role"));
        }
        let moderator = moderator.trim();
        if moderator.is_empty() {
            return Err(TeamError::invalid_input("debate needs a moderator role"));
        }

        let debate_id = self.state.next_debate_id()?;
        let title = title.trim().to_string();
        let topic = topic.trim().to_string();

        let mut participant_task_ids = Vec::with_capacity(roles.len());
        for role in &roles {
            let metadata = TaskMetadata {
                debate_id: Some(debate_id.clone()),
                debate_stage: Some(DebateStage::Position),
                ..Default::default()
            };
            let task = self.enqueue_task(
                role,
                &format!("[{debate_id}] {title} :: {role}"),
                &debate_position_description(&debate_id, role, &topic),
                metadata,
            )?;
            participant_task_ids.push(task.id);
        }

        let metadata = TaskMetadata {
            depends_on_task_ids: participant_task_ids.clone(),
            debate_id: Some(debate_id.clone()),
            debate_stage: Some(DebateStage::Moderation),
            ..Default::default()
        };
        let moderator_task = self.enqueue_task(
            moderator,
            &format!("[{debate_id}] {title} :: moderator"),
            &debate_moderator_description(&debate_id, moderator, &topic),
            metadata,
        )?;

        let mut task_ids = participant_task_ids.clone();
        task_ids.push(moderator_task.id.clone());

        let debate = Debate {
            id: debate_id,
            title,
            topic,
            roles,
            moderator: moderator.to_string(),
            participant_task_ids,
            moderator_task_id: moderator_task.id,
            task_ids,
            status: OwnerStatus::Queued,
            created_at: self.now,
            updated_at: self.now,
            last_error: None,
            extra: Map::new(),
        };
        self.state.debates.push(debate.clone());

        info!(debate_id = %debate.id, participants = debate.participant_task_ids.len(), "Debate created");
        self.events.emit(
            "debate_created",
            json!({
                "debate_id": debate.id,
                "title": debate.title,
                "roles": debate.roles,
                "moderator": debate.moderator,
                "task_ids": debate.task_ids,
            }),
            self.now,
        );
        Ok(debate)
    }

    /// Fail a queued task by hand. Running and finished tasks are left alone.
    pub fn cancel_task(&mut self, task_id: &str, reason: &str) -> TeamResult<Task> {
        let now = self.now;
        let task = self
            .state
            .task_mut(task_id)
            .ok_or_else(|| TeamError::task_not_found(task_id))?;
        if task.status != TaskStatus::Queued {
            return Err(TeamError::invalid_transition(
                task_id,
                format!("only queued tasks can be cancelled (status is {})", task.status),
            ));
        }

        let reason = match reason.trim() {
            "" => "cancelled by operator",
            trimmed => trimmed,
        };
        task.status = TaskStatus::Failed;
        task.error = Some(format!("Cancelled: {reason}"));
        task.finished_at = Some(now);
        task.updated_at = now;
        task.metadata.retry_at = None;
        let cancelled = task.clone();

        info!(task_id = task_id, reason = reason, "Task cancelled");
        self.events.emit(
            "task_cancelled",
            json!({"task_id": task_id, "reason": reason}),
            now,
        );
        settle_owners(self.state, task_id, self.events, now);
        Ok(cancelled)
    }
}

fn clean_roles(roles: &[String]) -> Vec<String> {
    roles
        .iter()
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty())
        .collect()
}

fn pipeline_stage_description(
    pipeline_id: &str,
    stage_index: usize,
    stage_count: usize,
    role: &str,
    brief: &str,
    template: &str,
) -> String {
    let mut description = format!(
        "Pipeline ID: {pipeline_id}\n\
         Stage: {stage_index}/{stage_count}\n\
         Role: {role}\n\
         Project brief:\n{brief}\n\n\
         Execution notes:\n\
         - Keep output concise and artifact-based.\n\
         - Read handoff context from previous stage outputs if available.\n\
         - Include risks and next handoff in final report.\n\
         {CONTRACT_SCHEMA_NOTE}",
        brief = brief.trim()
    );
    if !template.is_empty() {
        description.push_str(&format!("\nStage template:\n{template}\n"));
    }
    description
}

fn debate_position_description(debate_id: &str, role: &str, topic: &str) -> String {
    format!(
        "Debate ID: {debate_id}\n\
         Role: {role}\n\
         Topic:\n{topic}\n\n\
         Debate instructions:\n\
         - Argue one distinct approach with concrete tradeoffs.\n\
         - Challenge assumptions and mention risks.\n\
         - Give actionable recommendations for the moderator.\n\
         {CONTRACT_SCHEMA_NOTE}"
    )
}

fn debate_moderator_description(debate_id: &str, moderator: &str, topic: &str) -> String {
    format!(
        "Debate ID: {debate_id}\n\
         Moderator: {moderator}\n\
         Topic:\n{topic}\n\n\
         Moderator instructions:\n\
         - Read all participant outputs.\n\
         - Summarize agreements and disagreements.\n\
         - Produce final recommendation with rationale and next tasks.\n\
         {CONTRACT_SCHEMA_NOTE}"
    )
}
