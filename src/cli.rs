//! CLI definitions for ApprovalFlow.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ApprovalFlow CLI.
#[derive(Parser)]
#[command(name = "approvalflow")]
#[command(about = "Human-in-the-loop approval workflow engine")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "approvalflow.toml", global = true, env = "APPROVALFLOW_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the engine, timeout monitor and event subscriber until Ctrl-C (default)
    Run,

    /// Validate the configuration and every workflow definition
    Validate,

    /// Print the status of a workflow instance as JSON (file storage only)
    Status {
        /// Workflow instance id
        instance_id: uuid::Uuid,
    },
}
