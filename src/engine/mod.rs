//! Team engine
//!
//! [`TeamEngine`] owns the configuration and the collaborators (state store,
//! report files, agent runner, audit log, clock) and exposes the operations the
//! CLI drives: lifecycle, task/pipeline/debate creation, dispatch, runs and
//! status queries. Every operation loads the state document, mutates it in
//! memory, and saves it back in full.

pub mod chain;
pub mod dispatcher;
pub mod lifecycle;
pub mod prompt;
pub mod reports;
pub mod retry;
pub mod runs;

pub use chain::ModelRouter;
pub use dispatcher::DispatchOutcome;
pub use lifecycle::{OwnerCounts, RoleSummary, TaskCounts, TaskReport, TeamSnapshot};
pub use reports::ReportStore;
pub use retry::{AttemptDecision, EntryOutcome, FormatRetryPolicy, Resolution};
pub use runs::{DrainSummary, RunOutcome};

use crate::catalog::RoleCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::TeamConfig;
use crate::error::TeamResult;
use crate::events::{EventSink, JsonlEventLog};
use crate::graph::TaskGraph;
use crate::runner::AgentRunner;
use crate::state::{RuntimeState, StateStore};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

pub struct TeamEngine {
    config: TeamConfig,
    catalog: RoleCatalog,
    router: ModelRouter,
    retry: FormatRetryPolicy,
    store: StateStore,
    reports: ReportStore,
    runner: Arc<dyn AgentRunner>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl TeamEngine {
    /// Engine writing audit events to the configured NDJSON log, on the system clock
    pub fn new(config: TeamConfig, runner: Arc<dyn AgentRunner>) -> Self {
        let catalog = RoleCatalog::from_config(&config);
        let store = StateStore::new(
            config.paths.state_path(),
            catalog.role_ids().to_vec(),
            config.runtime.knobs(),
        );
        let reports = ReportStore::new(config.paths.root.clone(), config.paths.task_output_path());
        let router = ModelRouter::new(config.router.clone(), config.quota.clone());
        let retry = FormatRetryPolicy::new(config.runtime.max_output_format_retries);
        let events: Arc<dyn EventSink> = Arc::new(JsonlEventLog::new(config.paths.events_path()));

        Self {
            config,
            catalog,
            router,
            retry,
            store,
            reports,
            runner,
            events,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current document, created or migrated on first access
    pub fn load_state(&self) -> TeamResult<RuntimeState> {
        Ok(self.store.load(self.now())?)
    }

    fn save_state(&self, state: &mut RuntimeState) -> TeamResult<()> {
        Ok(self.store.save(state, self.now())?)
    }

    fn emit(&self, event: &str, payload: Value) {
        self.events.emit(event, payload, self.now());
    }

    /// Load, apply a graph mutation, save
    fn with_graph<T, F>(&self, mutate: F) -> TeamResult<T>
    where
        F: FnOnce(&mut TaskGraph<'_>) -> TeamResult<T>,
    {
        let mut state = self.load_state()?;
        let now = self.now();
        let result = {
            let mut graph = TaskGraph::new(&mut state, &self.catalog, self.events.as_ref(), now);
            mutate(&mut graph)?
        };
        self.save_state(&mut state)?;
        Ok(result)
    }
}
