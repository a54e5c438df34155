//! Server lifecycle management.
//!
//! The lifecycle manager starts the serving workload in its allocated
//! group and owns the teardown obligation: one graceful termination
//! signal per successful start, on every exit path. `ServerInstance`
//! enforces the exactly-once property by consuming the process handle on
//! the first stop; a second stop is a logged no-op, and an instance
//! dropped with a live process stops it from `Drop`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use swp_sched::AllocationHandle;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{RunConfig, MAX_CONCURRENT_REQUESTS};

/// Server start errors.
///
/// A failed submission leaves nothing to tear down; callers report it as
/// an allocation failure.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("server group has no reserved port")]
    NoPort,

    #[error("failed to spawn server process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Observed health of a server instance. Transitions are forward-only;
/// `Failed` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Failed,
    TimedOut,
}

impl HealthState {
    fn is_terminal(self) -> bool {
        matches!(self, HealthState::Failed | HealthState::TimedOut)
    }
}

/// Handle to a started serving process.
#[derive(Debug)]
pub struct ServerProcess {
    /// Group the process runs in.
    pub group_id: String,

    /// Process-group id the termination signal is sent to.
    pub pgid: Option<i32>,
}

/// Server runtime interface.
///
/// `stop` is fire-and-forget: it delivers the termination signal and
/// never blocks waiting for exit, because the external scheduler
/// reclaims the resource group independently.
#[async_trait]
pub trait ServerRuntime: Send + Sync {
    /// Launch the serving workload in its allocated group.
    async fn start(
        &self,
        handle: &AllocationHandle,
        config: &RunConfig,
    ) -> Result<ServerProcess, StartError>;

    /// Send a graceful termination signal to the process group.
    fn stop(&self, process: &ServerProcess);
}

/// Runtime that spawns the serving binary as a detached local process.
pub struct ProcessRuntime;

impl ProcessRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerRuntime for ProcessRuntime {
    async fn start(
        &self,
        handle: &AllocationHandle,
        config: &RunConfig,
    ) -> Result<ServerProcess, StartError> {
        let port = handle.port.ok_or(StartError::NoPort)?;

        info!(
            group_id = %handle.group_id,
            model_id = %config.model_id,
            tensor_parallel = config.tensor_parallel,
            port,
            "Starting serving workload"
        );

        let mut command = Command::new(&config.server_bin);
        command
            .arg("--model")
            .arg(&config.model_id)
            .arg("--tensor-parallel-size")
            .arg(config.tensor_parallel.to_string())
            .arg("--port")
            .arg(port.to_string())
            .arg("--max-concurrent-requests")
            .arg(MAX_CONCURRENT_REQUESTS.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group, so teardown signals the whole server tree
        // without touching the orchestrator.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pgid = child.id().map(|pid| pid as i32);

        debug!(group_id = %handle.group_id, pgid = ?pgid, "Server process spawned");

        // The child is intentionally not held: the process outlives this
        // call and is reaped by the runtime after teardown.
        Ok(ServerProcess {
            group_id: handle.group_id.clone(),
            pgid,
        })
    }

    fn stop(&self, process: &ServerProcess) {
        let Some(pgid) = process.pgid else {
            warn!(group_id = %process.group_id, "No process group to signal");
            return;
        };

        info!(group_id = %process.group_id, pgid, "Signalling server process group");

        // Best effort. The scheduler is the backstop for reclamation, so
        // a failed signal is logged and never escalated.
        #[cfg(unix)]
        {
            let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
            if rc != 0 {
                warn!(
                    group_id = %process.group_id,
                    pgid,
                    errno = std::io::Error::last_os_error().raw_os_error(),
                    "Failed to deliver SIGTERM to server process group"
                );
            }
        }
    }
}

/// Counting runtime double for tests.
pub struct MockServerRuntime {
    fail_starts: bool,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
}

impl MockServerRuntime {
    /// Create a mock runtime whose starts succeed.
    pub fn new() -> Self {
        Self {
            fail_starts: false,
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
        }
    }

    /// Create a mock runtime that fails all starts.
    pub fn failing() -> Self {
        Self {
            fail_starts: true,
            ..Self::new()
        }
    }

    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockServerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerRuntime for MockServerRuntime {
    async fn start(
        &self,
        handle: &AllocationHandle,
        _config: &RunConfig,
    ) -> Result<ServerProcess, StartError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_starts {
            return Err(StartError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock runtime configured to fail",
            )));
        }
        Ok(ServerProcess {
            group_id: handle.group_id.clone(),
            pgid: None,
        })
    }

    fn stop(&self, _process: &ServerProcess) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A started server plus its observed health state.
///
/// Owned exclusively by the orchestration driver; the sweep only ever
/// reads the address once the instance is `Healthy`.
pub struct ServerInstance {
    handle: AllocationHandle,
    runtime: Arc<dyn ServerRuntime>,
    process: Option<ServerProcess>,
    health: HealthState,
}

impl ServerInstance {
    pub fn new(
        handle: AllocationHandle,
        runtime: Arc<dyn ServerRuntime>,
        process: ServerProcess,
    ) -> Self {
        Self {
            handle,
            runtime,
            process: Some(process),
            health: HealthState::Starting,
        }
    }

    pub fn health(&self) -> HealthState {
        self.health
    }

    /// Base URL of the server's allocated address.
    pub fn base_url(&self) -> Option<String> {
        self.handle.address().map(|addr| format!("http://{addr}"))
    }

    /// Advance the health state. Terminal states never change.
    pub fn transition(&mut self, next: HealthState) {
        if self.health.is_terminal() {
            warn!(
                group_id = %self.handle.group_id,
                current = ?self.health,
                requested = ?next,
                "Ignoring health transition out of terminal state"
            );
            return;
        }
        debug!(
            group_id = %self.handle.group_id,
            from = ?self.health,
            to = ?next,
            "Server health transition"
        );
        self.health = next;
    }

    /// Deliver the teardown signal. Idempotent: the first call consumes
    /// the process handle, later calls are no-ops.
    pub fn stop(&mut self) {
        match self.process.take() {
            Some(process) => self.runtime.stop(&process),
            None => debug!(
                group_id = %self.handle.group_id,
                "Server already stopped, ignoring repeated stop"
            ),
        }
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        if self.process.is_some() {
            warn!(
                group_id = %self.handle.group_id,
                "Server instance dropped without explicit stop, tearing down"
            );
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle() -> AllocationHandle {
        AllocationHandle {
            group_id: "server-0".to_string(),
            host: "127.0.0.1".to_string(),
            port: Some(8500),
        }
    }

    async fn started_instance(runtime: Arc<MockServerRuntime>) -> ServerInstance {
        let config = crate::config::tests::valid_config();
        let handle = test_handle();
        let process = runtime.start(&handle, &config).await.unwrap();
        ServerInstance::new(handle, runtime, process)
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let runtime = Arc::new(MockServerRuntime::new());
        let mut instance = started_instance(Arc::clone(&runtime)).await;

        instance.stop();
        instance.stop();

        assert_eq!(runtime.start_calls(), 1);
        assert_eq!(runtime.stop_calls(), 1);
    }

    #[tokio::test]
    async fn drop_stops_a_live_instance() {
        let runtime = Arc::new(MockServerRuntime::new());
        {
            let _instance = started_instance(Arc::clone(&runtime)).await;
        }
        assert_eq!(runtime.stop_calls(), 1);
    }

    #[tokio::test]
    async fn drop_after_stop_does_not_double_signal() {
        let runtime = Arc::new(MockServerRuntime::new());
        {
            let mut instance = started_instance(Arc::clone(&runtime)).await;
            instance.stop();
        }
        assert_eq!(runtime.stop_calls(), 1);
    }

    #[tokio::test]
    async fn terminal_states_are_sticky() {
        let runtime = Arc::new(MockServerRuntime::new());
        let mut instance = started_instance(runtime).await;

        instance.transition(HealthState::TimedOut);
        instance.transition(HealthState::Healthy);
        assert_eq!(instance.health(), HealthState::TimedOut);
    }

    #[tokio::test]
    async fn failing_runtime_reports_start_error() {
        let runtime = MockServerRuntime::failing();
        let config = crate::config::tests::valid_config();

        let result = runtime.start(&test_handle(), &config).await;
        assert!(result.is_err());
        assert_eq!(runtime.start_calls(), 1);
        assert_eq!(runtime.stop_calls(), 0);
    }

    #[tokio::test]
    async fn base_url_uses_allocated_address() {
        let runtime = Arc::new(MockServerRuntime::new());
        let instance = started_instance(runtime).await;
        assert_eq!(instance.base_url().unwrap(), "http://127.0.0.1:8500");
    }
}
