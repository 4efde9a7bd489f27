//! Per-project mutual exclusion.
//!
//! One async mutex per project id. The table itself is guarded by a short
//! synchronous lock that is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Proof that the holder owns the project's lock until dropped.
pub type ProjectGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, project_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop entries nobody holds or waits on so the table stays bounded.
        locks.retain(|id, lock| id == project_id || Arc::strong_count(lock) > 1);
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits until the project's lock is free.
    pub async fn lock(&self, project_id: &str) -> ProjectGuard {
        self.entry(project_id).lock_owned().await
    }

    /// Takes the project's lock only if nobody holds it.
    pub fn try_lock(&self, project_id: &str) -> Option<ProjectGuard> {
        self.entry(project_id).try_lock_owned().ok()
    }

    pub fn is_locked(&self, project_id: &str) -> bool {
        self.entry(project_id).try_lock().is_err()
    }
}
