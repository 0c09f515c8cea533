//! `nodeflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server on the SQLite store.
//! - `validate` — validate a workflow JSON file.
//! - `run`      — execute a workflow file once, in-process, and print the
//!                result map.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use engine::{ExecutionStatus, MemoryStore, TriggerType, WorkflowDefinition, WorkflowEngine};
use nodes::NodeRegistry;

#[derive(Parser)]
#[command(name = "nodeflow", about = "Node-based workflow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// SQLite database URL.
        #[arg(long, env = "DATABASE_URL", default_value = "sqlite://nodeflow.db")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow file once with the built-in executors and print
    /// the per-node results.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Trigger payload as inline JSON.
        #[arg(long, default_value = "null")]
        payload: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database_url } => {
            let pool = db::create_pool(&database_url, 5)
                .await
                .context("failed to open database")?;
            let store = Arc::new(db::SqliteStore::new(pool));
            let registry = Arc::new(NodeRegistry::with_builtins());
            let engine = Arc::new(WorkflowEngine::new(store, registry));
            api::serve(&bind, engine).await?;
        }

        Command::Validate { path } => {
            let definition = load_definition(&path)?;
            let report = engine::validate(&definition);
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            if report.valid {
                println!("workflow '{}' is valid", definition.name);
            } else {
                for error in &report.errors {
                    eprintln!("error: {error}");
                }
                std::process::exit(1);
            }
        }

        Command::Run { path, payload } => {
            let definition = load_definition(&path)?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("invalid --payload JSON")?;

            let store = Arc::new(MemoryStore::new());
            let registry = Arc::new(NodeRegistry::with_builtins());
            let engine = WorkflowEngine::new(store, registry);

            let workflow = engine.create_workflow(definition).await?;
            let execution = engine
                .execute(workflow.id, TriggerType::Manual, payload, None)
                .await?;
            info!(execution_id = %execution.id, "execution started");

            // Local poll loop; executions left waiting need the server's
            // resume surface, so report and stop.
            let done = loop {
                let snapshot = engine.get_execution(execution.id).await?;
                match snapshot.status {
                    s if s.is_terminal() => break snapshot,
                    ExecutionStatus::Waiting => {
                        bail!(
                            "execution is waiting at node {:?}; wait nodes need `serve` + resume",
                            snapshot.current_step
                        );
                    }
                    _ => tokio::time::sleep(Duration::from_millis(50)).await,
                }
            };

            println!("status: {}", done.status);
            println!("steps:  {}", done.completed_steps.join(" -> "));
            if let Some(error) = &done.error {
                println!("error:  {error}");
            }
            println!("{}", serde_json::to_string_pretty(&done.results)?);
            if done.status != ExecutionStatus::Completed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_definition(path: &PathBuf) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}
