//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Deploy the DAO, resuming from checkpoints
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to deployment YAML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Checkpoint database (defaults to one per network)
    #[arg(long, conflicts_with = "no_checkpoint")]
    pub checkpoint: Option<PathBuf>,

    /// Keep checkpoints in memory only
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Upper bound on steps in flight
    #[arg(long, value_parser = parse_positive)]
    pub max_concurrency: Option<usize>,

    /// Rounds to wait for each confirmation
    #[arg(long)]
    pub confirm_rounds: Option<u64>,

    /// Output the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show the step graph without touching the ledger
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to deployment YAML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List checkpointed steps and their handles
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Path to deployment YAML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Checkpoint database (defaults to one per network)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Forget every checkpoint so the next run starts fresh
#[derive(Debug, Args, Clone)]
pub struct ResetCommand {
    /// Path to deployment YAML file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Checkpoint database (defaults to one per network)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

/// Parse a concurrency bound, rejecting zero
pub fn parse_positive(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("Invalid number '{}': {}", s, e)),
    }
}
