//! Per-project mutual exclusion for state read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use agentrun_core::ProjectName;

/// One async mutex per project.
///
/// Every read-modify-write of a project's state row (a submission deciding
/// what to do, a worker recording a step or finalizing) holds the project's
/// guard for its whole duration. A project's entry lives only while
/// someone holds or waits for its guard.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<ProjectName, Arc<Mutex<()>>>>,
}

/// Held while a project's state is being read and rewritten.
pub type ProjectGuard = OwnedMutexGuard<()>;

impl ProjectLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `project`.
    pub async fn lock(&self, project: &ProjectName) -> ProjectGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(project.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
