//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{PlanCommand, ResetCommand, RunCommand, StatusCommand};
use std::ffi::OsString;

/// Ledger provisioning orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "provision")]
#[command(version)]
#[command(about = "Deploys a DAO to a ledger as a resumable step graph", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the deployment
    Run(RunCommand),

    /// Print the step graph
    Plan(PlanCommand),

    /// Show checkpointed progress
    Status(StatusCommand),

    /// Clear checkpoints and local ledger state
    Reset(ResetCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
