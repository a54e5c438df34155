//! Co-scheduled resource group allocation.
//!
//! A benchmark run needs two resource groups that coexist in time: one
//! for the serving workload and one for the load generator. This library
//! models that request as a single atomic allocation. Key concepts:
//!
//! - **Group**: a unit of scheduler-granted compute on which one process
//!   runs (accelerators plus CPU/memory).
//! - **Co-scheduling**: all requested groups are granted together or the
//!   allocation fails; a partial grant is not representable.
//! - **Port reservation**: the server group carries a TCP port drawn from
//!   a reserved range so concurrent runs on a shared host pool avoid
//!   colliding.
//!
//! # Invariants
//!
//! - `Allocation` holds exactly as many handles as groups requested.
//! - Allocation failure is fatal for the run; there is no in-process
//!   retry (resubmission is an operator action).

use thiserror::Error;

mod local;
mod mock;
mod port;

pub use local::LocalScheduler;
pub use mock::MockScheduler;
pub use port::{choose_port, PORT_RANGE_END, PORT_RANGE_START};

/// Allocation errors.
#[derive(Debug, Error)]
pub enum SchedError {
    /// The scheduler could not satisfy the co-scheduled request.
    #[error("scheduler rejected allocation: {0}")]
    Rejected(String),

    /// The scheduler granted fewer groups than requested.
    ///
    /// Treated identically to a rejection by callers; the variant exists
    /// so the condition is visible in logs.
    #[error("incomplete allocation: requested {requested} groups, granted {granted}")]
    Incomplete { requested: usize, granted: usize },

    /// A handle referenced a group the allocation does not contain.
    #[error("unknown group: {0}")]
    UnknownGroup(String),
}

/// One requested resource group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    /// Role name within the allocation ("server", "loadgen").
    pub name: String,

    /// Accelerators requested for this group.
    pub gpus: u32,

    /// CPU cores requested for this group.
    pub cpus: u32,

    /// Memory requested, in MiB.
    pub memory_mb: u64,

    /// Whether this group needs a reserved TCP port.
    pub reserve_port: bool,
}

impl GroupSpec {
    /// Spec for the serving group: carries a reserved port.
    pub fn server(gpus: u32) -> Self {
        Self {
            name: "server".to_string(),
            gpus,
            cpus: 8,
            memory_mb: 64 * 1024,
            reserve_port: true,
        }
    }

    /// Spec for the load-generator group: CPU-only, no port.
    pub fn loadgen() -> Self {
        Self {
            name: "loadgen".to_string(),
            gpus: 0,
            cpus: 8,
            memory_mb: 16 * 1024,
            reserve_port: false,
        }
    }
}

/// Handle to one granted resource group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationHandle {
    /// Scheduler-assigned group identifier.
    pub group_id: String,

    /// Host the group landed on.
    pub host: String,

    /// Reserved TCP port, present when the spec asked for one.
    pub port: Option<u16>,
}

impl AllocationHandle {
    /// Network address for services bound in this group.
    ///
    /// Only meaningful for groups that reserved a port.
    pub fn address(&self) -> Option<String> {
        self.port.map(|p| format!("{}:{}", self.host, p))
    }
}

/// An atomic grant of all requested groups.
///
/// Constructed only through [`Allocation::try_new`], which rejects any
/// grant that does not cover the full request.
#[derive(Debug, Clone)]
pub struct Allocation {
    handles: Vec<AllocationHandle>,
}

impl Allocation {
    /// Build an allocation, verifying the grant covers the request.
    pub fn try_new(
        requested: &[GroupSpec],
        handles: Vec<AllocationHandle>,
    ) -> Result<Self, SchedError> {
        if handles.len() != requested.len() {
            return Err(SchedError::Incomplete {
                requested: requested.len(),
                granted: handles.len(),
            });
        }
        Ok(Self { handles })
    }

    /// Handle for the group with the given role name prefix.
    pub fn group(&self, name: &str) -> Result<&AllocationHandle, SchedError> {
        self.handles
            .iter()
            .find(|h| h.group_id.starts_with(name))
            .ok_or_else(|| SchedError::UnknownGroup(name.to_string()))
    }

    /// All granted handles, in request order.
    pub fn handles(&self) -> &[AllocationHandle] {
        &self.handles
    }
}

/// Scheduler interface.
///
/// Implementations request all groups as one heterogeneous job; a grant
/// that covers only part of the request must be surfaced as
/// [`SchedError::Incomplete`], never as a smaller `Allocation`.
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    /// Request the given groups as a single atomic allocation.
    async fn allocate(&self, groups: &[GroupSpec]) -> Result<Allocation, SchedError>;
}
