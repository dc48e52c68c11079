//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cogd - event-driven cognitive task orchestrator
#[derive(Parser)]
#[command(name = "cogd", about = "Inspect and recover the cognitive task log", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// List persisted tasks from the index
    Tasks,

    /// Replay one task's log and print the reconstructed context
    Show {
        /// Task ID to replay
        task_id: String,
    },

    /// Force-fail tasks left pending by a crashed process
    Recover,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tasks() {
        let cli = Cli::parse_from(["cogd", "tasks"]);
        assert!(matches!(cli.command, Command::Tasks));
    }

    #[test]
    fn test_parse_show() {
        let cli = Cli::parse_from(["cogd", "show", "task-abc123"]);
        match cli.command {
            Command::Show { task_id } => assert_eq!(task_id, "task-abc123"),
            _ => panic!("expected show"),
        }
    }

    #[test]
    fn test_parse_config_flag() {
        let cli = Cli::parse_from(["cogd", "--config", "/tmp/cogd.yml", "recover"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cogd.yml")));
        assert!(matches!(cli.command, Command::Recover));
    }
}
