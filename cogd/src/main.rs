//! cogd - CLI entry point
//!
//! The daemon proper is embedded by a host application that supplies the LLM
//! adapter and channel sinks; this binary covers the offline surface: listing
//! persisted tasks, replaying a task log, and crash recovery.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};

use cogd::cli::{Cli, Command};
use cogd::config::Config;
use cogd::persist::{self, TaskPersister};
use cogd::task::{TaskRegistry, TaskState};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();
}

fn state_label(state: Option<TaskState>) -> String {
    match state {
        Some(TaskState::Completed) => "COMPLETED".green().to_string(),
        Some(TaskState::Failed) => "FAILED".red().to_string(),
        Some(other) => other.to_string().yellow().to_string(),
        None => "UNKNOWN".dimmed().to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let registry = Arc::new(tokio::sync::Mutex::new(TaskRegistry::new(config.agent.max_active_tasks)));
    let persister = TaskPersister::new(&config.data_dir, registry);

    match cli.command {
        Command::Tasks => {
            let tasks = persister.list_tasks().await;
            if tasks.is_empty() {
                println!("No persisted tasks under {}", config.data_dir.display());
                return Ok(());
            }
            for (task_id, date) in tasks {
                let state = match persister.resolve_task_path(&task_id).await {
                    Some(path) => persist::read_records(&path)
                        .await
                        .ok()
                        .and_then(|records| persist::terminal_state(&records)),
                    None => None,
                };
                println!("{}  {}  {}", date.dimmed(), state_label(state), task_id);
            }
        }

        Command::Show { task_id } => {
            let path = persister
                .resolve_task_path(&task_id)
                .await
                .ok_or_else(|| eyre::eyre!("task {} not found in index", task_id))?;
            let records = persist::read_records(&path).await?;
            let context = persist::fold(&records)?;
            let state = persist::terminal_state(&records);

            println!("{}  {}", context.id.bold(), state_label(state));
            println!("  type: {}  source: {}", context.task_type, context.source);
            println!("  input: {}", context.input_text);
            println!(
                "  iterations: {}  actions: {}  messages: {}",
                context.iteration,
                context.actions_done.len(),
                context.messages.len()
            );
            if let Some(result) = &context.final_result {
                println!("  result: {}", result);
            }
            if let Some(error) = &context.error {
                println!("  error: {}", error.red());
            }
        }

        Command::Recover => {
            let recovered = persister.recover().await?;
            if recovered.is_empty() {
                println!("Nothing pending; no recovery needed");
            } else {
                for task_id in recovered {
                    println!("{} {}", "force-failed".red(), task_id);
                }
            }
        }
    }

    Ok(())
}
