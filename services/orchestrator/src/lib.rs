//! Benchmark Sweep Orchestrator Library
//!
//! The orchestrator coordinates two independently-scheduled processes
//! around one benchmark run: it allocates co-scheduled resource groups,
//! starts the serving workload, gates on readiness, drives a multi-rate
//! load-generation sweep against it, and guarantees the server is torn
//! down whatever happens.
//!
//! ## Phases
//!
//! ```text
//! Allocating -> Starting -> WaitingHealthy -> Sweeping -> TearingDown
//! ```
//!
//! ## Modules
//!
//! - `config`: typed run configuration, validated before allocation
//! - `server`: server lifecycle (start, health state, exactly-once stop)
//! - `probe`: fixed-interval readiness polling with a hard deadline
//! - `sweep`: load-generator invocation and run metadata
//! - `driver`: the phase machine and outcome-to-exit-code mapping

pub mod config;
pub mod driver;
pub mod probe;
pub mod server;
pub mod sweep;

// Re-export commonly used types
pub use config::{ConfigError, RunConfig};
pub use driver::{Orchestrator, OrchestrationResult};
pub use server::{MockServerRuntime, ProcessRuntime, ServerInstance};
pub use sweep::{MockLoadGenerator, ProcessLoadGenerator};
