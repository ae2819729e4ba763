//! stackd — the StackGrid daemon.
//!
//! Single binary that assembles the StackGrid subsystems:
//! - State store (redb)
//! - Versioned config store
//! - Orchestrator boundary (simulated in standalone mode)
//! - Reconciler with health-gated rolling updates
//! - REST API
//!
//! # Usage
//!
//! ```text
//! stackd standalone --port 8443 --data-dir /var/lib/stackgrid --stack stack.toml
//! stackd validate --stack stack.toml
//! ```

mod stack;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stack_core::StackFile;
use stackgrid_config::ConfigStore;
use stackgrid_orchestrator::SimulatedOrchestrator;
use stackgrid_reconciler::{Reconciler, ReconcilerConfig};
use stackgrid_state::StateStore;

#[derive(Parser)]
#[command(name = "stackd", about = "StackGrid daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (single node, all subsystems in one process).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/stackgrid")]
        data_dir: PathBuf,

        /// Stack file to apply on startup.
        #[arg(long)]
        stack: Option<PathBuf>,
    },

    /// Check a stack file without starting anything.
    Validate {
        /// Path to the stack file.
        #[arg(long)]
        stack: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            stack,
        } => run_standalone(port, data_dir, stack).await,
        Command::Validate { stack } => run_validate(&stack),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stackd=debug,stackgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run_validate(path: &Path) -> anyhow::Result<()> {
    let stack = StackFile::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    let mut problems = stack.problems();
    problems.extend(stack::name_problems(&stack));
    if !problems.is_empty() {
        for problem in &problems {
            warn!("{problem}");
        }
        anyhow::bail!("{} has {} problem(s)", path.display(), problems.len());
    }

    info!(
        stack = stack.name.as_deref().unwrap_or("-"),
        services = stack.services.len(),
        configs = stack.configs.len(),
        "stack file is valid"
    );
    Ok(())
}

async fn run_standalone(port: u16, data_dir: PathBuf, stack_path: Option<PathBuf>) -> anyhow::Result<()> {
    info!("StackGrid daemon starting in standalone mode");

    let stack = match &stack_path {
        Some(path) => Some(
            StackFile::from_file(path).with_context(|| format!("failed to load {}", path.display()))?,
        ),
        None => None,
    };

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let db_path = data_dir.join("stackgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let configs = ConfigStore::new(state.clone());

    let orchestrator = Arc::new(SimulatedOrchestrator::new());
    info!("simulated orchestrator initialized");

    let config = stack
        .as_ref()
        .map(|s| stack::reconciler_config(&s.reconciler))
        .unwrap_or_else(ReconcilerConfig::default);
    info!(
        max_parallel_updates = config.rolling.max_parallel_updates,
        health_timeout_secs = config.gate.timeout.as_secs(),
        "reconciler initialized"
    );
    let reconciler = Reconciler::new(state, configs, orchestrator, config);

    // Pick up passes interrupted by the previous run.
    let resumed = reconciler.resume().await?;
    if resumed > 0 {
        info!(count = resumed, "resumed services");
    }

    if let (Some(stack), Some(path)) = (&stack, &stack_path) {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let deployed = stack::apply(&reconciler, stack, base_dir).await?;
        info!(
            stack = stack.name.as_deref().unwrap_or("-"),
            deployed = deployed.len(),
            "stack applied"
        );
    }

    // ── Start API server ───────────────────────────────────────

    let router = stackgrid_api::build_router(reconciler.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
        })
        .await?;

    // Running passes stop after their current batch.
    reconciler.shutdown().await;

    info!("StackGrid daemon stopped");
    Ok(())
}
