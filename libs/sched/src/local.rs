//! Local-host scheduler.
//!
//! Grants every requested group on the local host. Cluster submission
//! syntax lives outside this crate; from the orchestrator's point of
//! view a grant is a grant, and the local scheduler is what a
//! single-node run (or CI) uses.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Mutex;
use tracing::info;

use crate::{choose_port, Allocation, AllocationHandle, GroupSpec, SchedError, Scheduler};

/// Scheduler that places all groups on the local host.
pub struct LocalScheduler {
    host: String,
    rng: Mutex<StdRng>,
}

impl LocalScheduler {
    /// Create a local scheduler with entropy-seeded port selection.
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Create a local scheduler with a fixed port-selection seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Scheduler for LocalScheduler {
    async fn allocate(&self, groups: &[GroupSpec]) -> Result<Allocation, SchedError> {
        let mut handles = Vec::with_capacity(groups.len());

        for (idx, spec) in groups.iter().enumerate() {
            let port = if spec.reserve_port {
                let mut rng = self
                    .rng
                    .lock()
                    .map_err(|_| SchedError::Rejected("port rng poisoned".to_string()))?;
                Some(choose_port(&mut *rng))
            } else {
                None
            };

            let handle = AllocationHandle {
                group_id: format!("{}-{}", spec.name, idx),
                host: self.host.clone(),
                port,
            };
            info!(
                group_id = %handle.group_id,
                host = %handle.host,
                port = ?handle.port,
                gpus = spec.gpus,
                "Granted local group"
            );
            handles.push(handle);
        }

        Allocation::try_new(groups, handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_all_groups_on_localhost() {
        let sched = LocalScheduler::with_seed(7);
        let groups = vec![GroupSpec::server(1), GroupSpec::loadgen()];

        let alloc = sched.allocate(&groups).await.unwrap();
        assert_eq!(alloc.handles().len(), 2);

        let server = alloc.group("server").unwrap();
        assert_eq!(server.host, "127.0.0.1");
        let port = server.port.unwrap();
        assert!((crate::PORT_RANGE_START..=crate::PORT_RANGE_END).contains(&port));

        assert_eq!(alloc.group("loadgen").unwrap().port, None);
    }

    #[tokio::test]
    async fn seeded_schedulers_are_deterministic() {
        let groups = vec![GroupSpec::server(1)];

        let a = LocalScheduler::with_seed(99).allocate(&groups).await.unwrap();
        let b = LocalScheduler::with_seed(99).allocate(&groups).await.unwrap();
        assert_eq!(
            a.group("server").unwrap().port,
            b.group("server").unwrap().port
        );
    }
}
