//! Benchmark Sweep Orchestrator
//!
//! Allocates co-scheduled resource groups for a serving workload and a
//! load generator, waits for the server to become healthy, runs one
//! multi-rate sweep against it, and tears the server down on every exit
//! path. The exit code distinguishes the failure classes so calling
//! automation can react to each.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use swp_sched::LocalScheduler;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use swp_orchestrator::config::{Cli, RunConfig};
use swp_orchestrator::driver::{Orchestrator, CONFIG_ERROR_EXIT_CODE};
use swp_orchestrator::server::ProcessRuntime;
use swp_orchestrator::sweep::ProcessLoadGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    // Configuration errors are fatal before any allocation is attempted.
    let config = match RunConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(CONFIG_ERROR_EXIT_CODE);
        }
    };

    info!(
        model_id = %config.model_id,
        tensor_parallel = config.tensor_parallel,
        rates = ?config.rates,
        results_dir = %config.results_dir.display(),
        "Starting benchmark orchestration"
    );

    let scheduler = Arc::new(LocalScheduler::new());
    let runtime = Arc::new(ProcessRuntime::new());
    let loadgen = Arc::new(ProcessLoadGenerator::new(config.benchmark_bin.clone()));

    let orchestrator = Orchestrator::new(scheduler, runtime, loadgen, config);

    // An external signal abandons the pipeline; dropping it tears the
    // server down through the same cleanup path as every other exit.
    let exit_code = tokio::select! {
        outcome = orchestrator.run() => {
            info!(outcome = %outcome, exit_code = outcome.exit_code(), "Orchestration finished");
            outcome.exit_code()
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, tearing down");
            130
        }
    };

    std::process::exit(exit_code)
}
