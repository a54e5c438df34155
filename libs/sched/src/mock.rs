//! Mock scheduler for testing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Allocation, AllocationHandle, GroupSpec, SchedError, Scheduler};

/// How the mock scheduler answers allocation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockBehavior {
    /// Grant everything.
    Grant,
    /// Reject the whole request.
    Reject,
    /// Grant only the first group, simulating a scheduler that silently
    /// drops part of a heterogeneous job.
    Partial,
}

/// Mock scheduler for testing and development.
pub struct MockScheduler {
    behavior: MockBehavior,
    port: u16,
    allocate_calls: AtomicU64,
}

impl MockScheduler {
    /// Create a mock scheduler that grants every request.
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::Grant,
            port: 8500,
            allocate_calls: AtomicU64::new(0),
        }
    }

    /// Create a mock scheduler that grants the given reserved port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::new()
        }
    }

    /// Create a mock scheduler that rejects every request.
    pub fn rejecting() -> Self {
        Self {
            behavior: MockBehavior::Reject,
            ..Self::new()
        }
    }

    /// Create a mock scheduler that grants only the first group.
    pub fn partial() -> Self {
        Self {
            behavior: MockBehavior::Partial,
            ..Self::new()
        }
    }

    /// Number of allocation requests observed.
    pub fn allocate_calls(&self) -> u64 {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    fn handle_for(&self, spec: &GroupSpec, idx: usize) -> AllocationHandle {
        AllocationHandle {
            group_id: format!("{}-{}", spec.name, idx),
            host: "127.0.0.1".to_string(),
            port: spec.reserve_port.then_some(self.port),
        }
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Scheduler for MockScheduler {
    async fn allocate(&self, groups: &[GroupSpec]) -> Result<Allocation, SchedError> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            MockBehavior::Reject => Err(SchedError::Rejected(
                "mock scheduler configured to reject".to_string(),
            )),
            MockBehavior::Partial => {
                let handles = groups
                    .iter()
                    .take(1)
                    .enumerate()
                    .map(|(idx, spec)| self.handle_for(spec, idx))
                    .collect();
                Allocation::try_new(groups, handles)
            }
            MockBehavior::Grant => {
                let handles = groups
                    .iter()
                    .enumerate()
                    .map(|(idx, spec)| self.handle_for(spec, idx))
                    .collect();
                Allocation::try_new(groups, handles)
            }
        }
    }
}
