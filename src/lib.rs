//! Team Orchestrator
//!
//! Coordinates a fixed roster of AI agent roles working on a shared repository.
//! Work is modelled as tasks with dependencies, grouped into sequential
//! pipelines and fan-in debates. Each task is dispatched to an external agent
//! CLI through a per-role chain of backend/model pairs; responses must carry a
//! structured JSON output contract, and contract failures get one correction
//! round before the next model is tried. When every model in the chain reports
//! quota exhaustion the task is deferred rather than failed.
//!
//! All state lives in a single JSON document rewritten in full after every
//! mutation, with the previous contents kept as a backup. An NDJSON audit log
//! records each transition.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use team_orchestrator::testing::ScriptedAgentRunner;
//! use team_orchestrator::{TeamConfig, TeamEngine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = TeamConfig::default();
//! config.paths.root = "/tmp/team-demo".into();
//!
//! let engine = TeamEngine::new(config, Arc::new(ScriptedAgentRunner::conforming()));
//! engine.start(true).await?;
//!
//! let roles = vec!["concept".to_string(), "coder".to_string()];
//! let pipeline = engine.create_pipeline("Login", "Add a login screen", &roles)?;
//! let outcome = engine.run_pipeline(&pipeline.id, true).await?;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod observability;
pub mod runner;
pub mod state;
pub mod testing;

pub use catalog::RoleCatalog;
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, TeamConfig};
pub use contract::{extract_contract, validate_task_output, OutputContract};
pub use engine::{DispatchOutcome, DrainSummary, RunOutcome, TeamEngine, TeamSnapshot};
pub use error::{TeamError, TeamResult};
pub use events::{EventSink, JsonlEventLog, NullEventSink};
pub use runner::{AgentRunRequest, AgentRunResult, AgentRunner, ProcessAgentRunner};
pub use state::{OwnerStatus, RuntimeState, StateStore, StoreError, Task, TaskStatus, TeamStatus};
