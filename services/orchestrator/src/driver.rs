//! Orchestration driver.
//!
//! Sequential phase machine:
//!
//! ```text
//! Init -> Allocating -> Starting -> WaitingHealthy -> Sweeping -> TearingDown -> Done
//! ```
//!
//! The orchestrator itself is single-threaded and sequential; the two
//! heavy-weight processes (server, load generator) run in their own
//! resource groups. Once a start succeeds, teardown is unconditional:
//! the pipeline's outcome is captured first and the stop is delivered
//! before the outcome is returned, whatever that outcome is. Teardown
//! failures are logged and never change the reported result.

use std::sync::Arc;
use std::time::Duration;

use swp_sched::{GroupSpec, Scheduler};
use tracing::{error, info};

use crate::config::RunConfig;
use crate::probe::{ProbeOutcome, Prober};
use crate::server::{HealthState, ServerInstance, ServerRuntime};
use crate::sweep::{fetch_server_version, run_metadata, LoadGenerator, SweepParams};

/// Final outcome of one orchestration run. Exactly one is produced per
/// run and it drives the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationResult {
    Completed,
    AllocationFailed,
    ServerUnhealthy,
    SweepFailed,
}

impl OrchestrationResult {
    /// Distinct exit code per failure class, so calling automation can
    /// tell them apart. Code 2 is reserved for configuration errors,
    /// which are rejected before a driver ever exists.
    pub fn exit_code(self) -> i32 {
        match self {
            OrchestrationResult::Completed => 0,
            OrchestrationResult::AllocationFailed => 10,
            OrchestrationResult::ServerUnhealthy => 11,
            OrchestrationResult::SweepFailed => 12,
        }
    }
}

impl std::fmt::Display for OrchestrationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationResult::Completed => write!(f, "completed"),
            OrchestrationResult::AllocationFailed => write!(f, "allocation failed"),
            OrchestrationResult::ServerUnhealthy => write!(f, "server unhealthy"),
            OrchestrationResult::SweepFailed => write!(f, "sweep failed"),
        }
    }
}

/// Exit code for configuration errors, rejected before allocation.
pub const CONFIG_ERROR_EXIT_CODE: i32 = 2;

/// Top-level orchestrator.
pub struct Orchestrator {
    scheduler: Arc<dyn Scheduler>,
    runtime: Arc<dyn ServerRuntime>,
    loadgen: Arc<dyn LoadGenerator>,
    http: reqwest::Client,
    config: RunConfig,
}

impl Orchestrator {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        runtime: Arc<dyn ServerRuntime>,
        loadgen: Arc<dyn LoadGenerator>,
        config: RunConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            scheduler,
            runtime,
            loadgen,
            http,
            config,
        }
    }

    /// Drive one run to its terminal outcome.
    pub async fn run(&self) -> OrchestrationResult {
        // Allocating: one atomic request for both groups.
        let groups = vec![
            GroupSpec::server(self.config.server_gpus),
            GroupSpec::loadgen(),
        ];
        info!(group_count = groups.len(), "Requesting co-scheduled groups");

        let allocation = match self.scheduler.allocate(&groups).await {
            Ok(allocation) => allocation,
            Err(e) => {
                error!(error = %e, "Allocation failed");
                return OrchestrationResult::AllocationFailed;
            }
        };

        let server_handle = match allocation.group("server") {
            Ok(handle) => handle.clone(),
            Err(e) => {
                error!(error = %e, "Allocation is missing the server group");
                return OrchestrationResult::AllocationFailed;
            }
        };

        // Starting: a failed submission leaves nothing to tear down.
        let process = match self.runtime.start(&server_handle, &self.config).await {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "Server start failed");
                return OrchestrationResult::AllocationFailed;
            }
        };
        let mut instance =
            ServerInstance::new(server_handle, Arc::clone(&self.runtime), process);

        // From here on the teardown obligation holds on every path.
        let outcome = self.wait_and_sweep(&mut instance).await;

        // TearingDown: unconditional, exactly once.
        info!(outcome = %outcome, "Tearing down server");
        instance.stop();

        outcome
    }

    /// WaitingHealthy and Sweeping phases, against a started server.
    async fn wait_and_sweep(&self, instance: &mut ServerInstance) -> OrchestrationResult {
        let Some(base_url) = instance.base_url() else {
            error!("Server group has no address");
            instance.transition(HealthState::Failed);
            return OrchestrationResult::ServerUnhealthy;
        };

        let prober = Prober::new(self.config.readiness_timeout, self.config.probe_interval);
        match prober.wait_healthy(&base_url).await {
            ProbeOutcome::Healthy => instance.transition(HealthState::Healthy),
            ProbeOutcome::TimedOut => {
                instance.transition(HealthState::TimedOut);
                return OrchestrationResult::ServerUnhealthy;
            }
        }

        // Sweeping: fold the server's build id into the metadata, then
        // hand the whole rate list to the load generator in one go.
        let version = fetch_server_version(&self.http, &base_url).await;
        let metadata = run_metadata(&self.config.engine, self.config.tensor_parallel, &version);
        let params = SweepParams::from_config(&self.config, base_url, metadata);

        match self.loadgen.run(&params).await {
            Ok(run) => {
                info!(exit_code = run.exit_code, "Sweep finished");
                OrchestrationResult::Completed
            }
            Err(e) => {
                error!(error = %e, "Sweep failed");
                OrchestrationResult::SweepFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let outcomes = [
            OrchestrationResult::Completed,
            OrchestrationResult::AllocationFailed,
            OrchestrationResult::ServerUnhealthy,
            OrchestrationResult::SweepFailed,
        ];
        for (i, a) in outcomes.iter().enumerate() {
            for b in &outcomes[i + 1..] {
                assert_ne!(a.exit_code(), b.exit_code());
            }
        }
        assert_eq!(OrchestrationResult::Completed.exit_code(), 0);
        assert_ne!(CONFIG_ERROR_EXIT_CODE, 0);
    }
}
