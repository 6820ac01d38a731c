use anyhow::{Context, Result};
use provision::cli::commands::{PlanCommand, ResetCommand, RunCommand, StatusCommand};
use provision::cli::output::*;
use provision::cli::{Cli, Command};
use provision::core::config::DeploymentConfig;
use provision::deploy::dao_graph;
use provision::execution::{ExecutionEngine, SchedulingStrategy, TransactionExecutor};
use provision::ledger::SimulatedLedger;
use provision::persistence::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_deployment(cmd).await?,
        Command::Plan(cmd) => show_plan(cmd)?,
        Command::Status(cmd) => show_status(cmd).await?,
        Command::Reset(cmd) => reset(cmd).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<DeploymentConfig> {
    match path {
        Some(path) => DeploymentConfig::from_file(path)
            .with_context(|| format!("Failed to load deployment config {}", path.display())),
        None => Ok(DeploymentConfig::default()),
    }
}

fn checkpoint_path(config: &DeploymentConfig, explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(|| SqliteCheckpointStore::default_path(&config.network.name))
}

/// Local ledger state lives beside the checkpoints unless configured
fn ledger_state_path(config: &DeploymentConfig, checkpoints: &Path) -> PathBuf {
    config
        .network
        .state_file
        .clone()
        .unwrap_or_else(|| checkpoints.with_extension("ledger.json"))
}

async fn open_store(path: &Path) -> Result<SqliteCheckpointStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteCheckpointStore::new(&path.to_string_lossy()).await
}

fn open_ledger(config: &DeploymentConfig, state_file: Option<&Path>) -> Result<SimulatedLedger> {
    match state_file {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "restoring local ledger state");
            SimulatedLedger::load(path)
        }
        _ => Ok(SimulatedLedger::new().with_account(
            config.accounts.funding.address.clone(),
            config.network.genesis_balance,
        )),
    }
}

async fn run_deployment(cmd: &RunCommand) -> Result<()> {
    let mut config = load_config(cmd.config.as_deref())?;
    if let Some(rounds) = cmd.confirm_rounds {
        config.network.confirm_rounds = rounds;
    }
    config.validate()?;

    let store: Arc<dyn CheckpointStore>;
    let state_file: Option<PathBuf>;
    if cmd.no_checkpoint {
        store = Arc::new(InMemoryCheckpointStore::new());
        state_file = None;
    } else {
        let path = checkpoint_path(&config, cmd.checkpoint.as_ref());
        if !cmd.json {
            println!("{} Checkpoints: {}", INFO, style(path.display()).dim());
        }
        state_file = Some(ledger_state_path(&config, &path));
        store = Arc::new(open_store(&path).await?);
    }

    let ledger = Arc::new(open_ledger(&config, state_file.as_deref())?);
    let executor = TransactionExecutor::new(ledger.clone(), ledger.clone())
        .with_retry_policy(config.retry.policy())
        .with_confirm_rounds(config.network.confirm_rounds);
    let engine = ExecutionEngine::new(
        Arc::new(executor),
        store,
        SchedulingStrategy::bounded(cmd.max_concurrency),
    );

    let pipeline = dao_graph(&config).context("DAO step graph is invalid")?;

    if !cmd.json {
        let progress = create_progress_bar(pipeline.len());
        engine.add_event_handler(move |event| track_event(&progress, &event));
    }

    let result = engine.execute(&pipeline).await;

    if let Some(path) = &state_file {
        ledger.save(path)?;
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            println!("{} {} {}", CROSS, style(&pipeline.name).bold(), style("aborted").red());
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn show_plan(cmd: &PlanCommand) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    let pipeline = dao_graph(&config).context("DAO step graph is invalid")?;

    if cmd.json {
        let layers: Vec<_> = pipeline
            .layers()
            .into_iter()
            .map(|layer| {
                layer
                    .iter()
                    .filter_map(|name| pipeline.step(name))
                    .map(|step| {
                        serde_json::json!({
                            "name": step.name,
                            "dependencies": step.dependencies,
                            "reads": step.reads,
                            "produces": step.produces,
                            "concurrency": step.concurrency,
                            "barrier": step.is_barrier(),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        let data = serde_json::json!({ "pipeline": pipeline.name, "layers": layers });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        print_plan(&pipeline);
    }

    Ok(())
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    let path = checkpoint_path(&config, cmd.checkpoint.as_ref());

    // A status query never creates the database
    let (location, records) = match SqliteCheckpointStore::open_existing(&path).await? {
        Some(store) => (store.location().to_path_buf(), store.list_completed().await?),
        None => (path, Vec::new()),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_checkpoints(&location.to_string_lossy(), &records);
    }

    Ok(())
}

async fn reset(cmd: &ResetCommand) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    let path = checkpoint_path(&config, cmd.checkpoint.as_ref());
    let store = open_store(&path).await?;
    store.clear().await?;
    println!("{} Cleared checkpoints in {}", CHECK, style(path.display()).dim());

    let state_file = ledger_state_path(&config, &path);
    if state_file.exists() {
        std::fs::remove_file(&state_file)
            .with_context(|| format!("Failed to remove {}", state_file.display()))?;
        println!("{} Removed ledger state {}", CHECK, style(state_file.display()).dim());
    }

    Ok(())
}
