//! songweaver: AI song generation daemon.
//!
//! This binary can run in two modes:
//! - One-shot mode: submit a single prompt and print the finished record
//! - Daemon mode: JSON-RPC server over stdio

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use songweaver::cli::Cli;
use songweaver::config::DaemonConfig;
use songweaver::generation::{Orchestrator, OrchestratorSettings};
use songweaver::pipeline::PipelineRegistry;
use songweaver::providers::ProviderRouter;
use songweaver::rpc::{run_server, ServerState};
use songweaver::storage::FsStorage;
use songweaver::store::MemoryJobStore;
use songweaver::types::JobStatus;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_logging(&cli.log_level);

    if !cli.is_daemon_mode() && !cli.is_oneshot_mode() {
        print_usage();
        return Ok(());
    }

    let config = cli.load_config().context("loading configuration")?;
    if let Some(problem) = config.validate() {
        bail!("invalid configuration: {}", problem);
    }
    let orchestrator = Arc::new(build_orchestrator(&config)?);

    if cli.is_daemon_mode() {
        run_daemon_mode(orchestrator, config).await
    } else {
        run_oneshot_mode(&cli, orchestrator).await
    }
}

/// Logs go to stderr; stdout is reserved for JSON-RPC.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(config: &DaemonConfig) -> anyhow::Result<Orchestrator> {
    let router = ProviderRouter::from_config(config).context("building provider routes")?;
    let storage_path = config.effective_storage_path();
    let storage = FsStorage::new(&storage_path)
        .with_context(|| format!("preparing storage at {}", storage_path.display()))?;

    tracing::info!(
        storage = %storage_path.display(),
        pipeline = %router.active_pipeline(),
        max_concurrent = config.generation.max_concurrent,
        timeout_secs = config.generation.timeout_secs,
        "Generation engine configured"
    );
    for backend in router.list_backends() {
        tracing::info!(name = %backend.name, capability = ?backend.capability, "Backend registered");
    }

    Ok(Orchestrator::new(
        Arc::new(MemoryJobStore::new()),
        Arc::new(storage),
        Arc::new(router),
        Arc::new(PipelineRegistry::with_builtins(config.mix_weights())),
        OrchestratorSettings::from_config(config),
    ))
}

/// Runs the daemon mode (JSON-RPC server).
async fn run_daemon_mode(orchestrator: Arc<Orchestrator>, config: DaemonConfig) -> anyhow::Result<()> {
    tracing::info!("Reading JSON-RPC requests from stdin");
    let state = Arc::new(ServerState::new(orchestrator, config));
    run_server(state).await?;
    Ok(())
}

/// Submits one generation, waits for its task to finish and prints the record.
async fn run_oneshot_mode(cli: &Cli, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let Some(params) = cli.generation_params() else {
        bail!("--prompt is required in one-shot mode");
    };

    let job = orchestrator.create_generation(params).await?;
    tracing::info!(token = %job.token, id = job.id, provider = %job.audio_provider, "Generation submitted");

    let mut last_progress = None;
    let job = loop {
        let job = orchestrator.get_by_token(&job.token).await?;
        if job.status.is_terminal() && !orchestrator.is_running(&job.token) {
            break job;
        }
        if last_progress != Some(job.progress) {
            tracing::info!(progress = job.progress, message = %job.progress_message, "Progress");
            last_progress = Some(job.progress);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    orchestrator.shutdown().await;

    if job.status != JobStatus::Completed {
        bail!(
            "generation {}: {}",
            job.status,
            job.error_message.as_deref().unwrap_or("no details")
        );
    }
    Ok(())
}

fn print_usage() {
    eprintln!("songweaver: AI song generation daemon");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  One-shot generation:");
    eprintln!("    songweaver --prompt \"dreamy synthwave at night\" --duration 60 --genre synthwave");
    eprintln!();
    eprintln!("  Daemon mode (JSON-RPC server):");
    eprintln!("    songweaver --daemon --config ~/.config/songweaver/config.toml");
    eprintln!();
    eprintln!("Run 'songweaver --help' for full options.");
}
