//! `team` command line front end
//!
//! Every subcommand maps onto one [`TeamEngine`] operation; the process exit
//! code is the engine's exit code.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use team_orchestrator::contract::contract_schema;
use team_orchestrator::observability::init_default_logging;
use team_orchestrator::{ProcessAgentRunner, TeamConfig, TeamEngine, TeamResult};
use tracing::error;

/// Role team orchestrator
#[derive(Parser)]
#[command(name = "team")]
#[command(about = "Dispatch role tasks, pipelines and debates to agent CLIs")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "TEAM_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark the team running and recover interrupted tasks
    Start {
        #[arg(long)]
        skip_auth_check: bool,
    },
    /// Mark the team stopped
    Stop,
    /// Resume a stopped team
    Resume {
        #[arg(long)]
        skip_auth_check: bool,
    },
    /// Show team, task and role status
    Status {
        /// Print the full state document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a standalone task
    Enqueue {
        role: String,
        title: String,
        description: String,
    },
    /// Create a sequential pipeline
    Pipeline {
        title: String,
        brief: String,
        /// Comma-separated stage roles
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },
    /// Create a debate with a moderator synthesis
    Debate {
        title: String,
        topic: String,
        /// Comma-separated participant roles
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long)]
        moderator: Option<String>,
    },
    /// Dispatch one task, or the next ready one
    Dispatch { task_id: Option<String> },
    /// Run every stage of a pipeline in order
    RunPipeline {
        pipeline_id: String,
        #[arg(long)]
        continue_on_failure: bool,
    },
    /// Run every task of a debate in order
    RunDebate {
        debate_id: String,
        #[arg(long)]
        continue_on_failure: bool,
    },
    /// Dispatch ready tasks until the queue runs dry
    Drain {
        #[arg(long, default_value_t = 0)]
        max_tasks: usize,
        #[arg(long)]
        continue_on_failure: bool,
    },
    /// List pipelines
    Pipelines,
    /// List debates
    Debates,
    /// Cancel a queued task
    Cancel {
        task_id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Print a completed task's report
    Report { task_id: String },
    /// Print the JSON Schema of the output contract
    ContractSchema,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    let config = match TeamConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let runner = Arc::new(ProcessAgentRunner::new(
        config.runner.clone(),
        config.paths.root.clone(),
    ));
    let engine = TeamEngine::new(config, runner);

    match execute(&engine, cli.command).await {
        Ok(code) => process::exit(code),
        Err(e) if e.is_fatal() => {
            error!("State document is unreadable, restore it from its .last.json backup: {}", e);
            process::exit(2);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

async fn execute(engine: &TeamEngine, command: Commands) -> TeamResult<i32> {
    match command {
        Commands::Start { skip_auth_check } => {
            let code = engine.start(skip_auth_check).await?;
            if code == 0 {
                println!("Team started.");
            } else {
                println!("Auth check failed. Use --skip-auth-check to override.");
            }
            Ok(code)
        }
        Commands::Stop => {
            let code = engine.stop()?;
            println!("Team stopped.");
            Ok(code)
        }
        Commands::Resume { skip_auth_check } => {
            let code = engine.resume(skip_auth_check).await?;
            if code == 0 {
                println!("Team resumed.");
            } else {
                println!("Auth check failed. Use --skip-auth-check to override.");
            }
            Ok(code)
        }
        Commands::Status { json } => {
            if json {
                let state = engine.status_document()?;
                print_json(&state)?;
            } else {
                println!("{}", engine.status()?);
            }
            Ok(0)
        }
        Commands::Enqueue {
            role,
            title,
            description,
        } => {
            let task = engine.enqueue_task(&role, &title, &description)?;
            println!("Enqueued {} for role {}", task.id, task.role);
            Ok(0)
        }
        Commands::Pipeline {
            title,
            brief,
            roles,
        } => {
            let pipeline = engine.create_pipeline(&title, &brief, &roles)?;
            println!("Created {}", pipeline.id);
            println!("Stages: {}", pipeline.roles.join(" -> "));
            println!("Tasks: {}", pipeline.task_ids.join(", "));
            Ok(0)
        }
        Commands::Debate {
            title,
            topic,
            roles,
            moderator,
        } => {
            let debate = engine.create_debate(&title, &topic, &roles, moderator.as_deref())?;
            println!("Created {}", debate.id);
            println!("Participants: {}", debate.roles.join(", "));
            println!("Moderator: {} ({})", debate.moderator, debate.moderator_task_id);
            Ok(0)
        }
        Commands::Dispatch { task_id } => {
            let outcome = engine.dispatch_one(task_id.as_deref()).await?;
            println!("{outcome}");
            Ok(outcome.exit_code())
        }
        Commands::RunPipeline {
            pipeline_id,
            continue_on_failure,
        } => {
            let outcome = engine
                .run_pipeline(&pipeline_id, !continue_on_failure)
                .await?;
            println!("{outcome}");
            Ok(outcome.exit_code())
        }
        Commands::RunDebate {
            debate_id,
            continue_on_failure,
        } => {
            let outcome = engine.run_debate(&debate_id, !continue_on_failure).await?;
            println!("{outcome}");
            Ok(outcome.exit_code())
        }
        Commands::Drain {
            max_tasks,
            continue_on_failure,
        } => {
            let summary = engine.drain_ready(max_tasks, continue_on_failure).await?;
            println!("{summary}");
            Ok(summary.exit_code)
        }
        Commands::Pipelines => {
            let pipelines = engine.pipelines()?;
            if pipelines.is_empty() {
                println!("No pipelines.");
            }
            for pipeline in pipelines {
                println!(
                    "{} [{}] {} :: {}",
                    pipeline.id,
                    pipeline.status,
                    pipeline.title,
                    pipeline.roles.join(" -> ")
                );
            }
            Ok(0)
        }
        Commands::Debates => {
            let debates = engine.debates()?;
            if debates.is_empty() {
                println!("No debates.");
            }
            for debate in debates {
                println!(
                    "{} [{}] {} :: {} | moderator={}",
                    debate.id,
                    debate.status,
                    debate.title,
                    debate.roles.join(", "),
                    debate.moderator
                );
            }
            Ok(0)
        }
        Commands::Cancel { task_id, reason } => {
            let task = engine.cancel_task(&task_id, &reason)?;
            println!("Cancelled {}", task.id);
            Ok(0)
        }
        Commands::Report { task_id } => {
            let report = engine.task_report(&task_id)?;
            println!("{report}");
            Ok(0)
        }
        Commands::ContractSchema => {
            print_json(&contract_schema())?;
            Ok(0)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> TeamResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| team_orchestrator::TeamError::internal(e.to_string()))?;
    println!("{text}");
    Ok(())
}
