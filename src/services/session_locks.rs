//! Per-session coordination.
//!
//! Chunk uploads for one `file_hash` take the shared side of a reader/writer
//! lock so they stay concurrent; merges and the reaper take the exclusive side,
//! which turns duplicate merge calls into a queue instead of a race on the
//! session directory.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

pub type SessionReadGuard = OwnedRwLockReadGuard<()>;
pub type SessionWriteGuard = OwnedRwLockWriteGuard<()>;

#[derive(Clone, Default, Debug)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, file_hash: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(file_hash.to_string()).or_default().clone()
    }

    /// Shared access, held while a chunk is written into the session.
    pub async fn read(&self, file_hash: &str) -> SessionReadGuard {
        self.lock_for(file_hash).await.read_owned().await
    }

    /// Exclusive access, held for the whole merge.
    pub async fn write(&self, file_hash: &str) -> SessionWriteGuard {
        self.lock_for(file_hash).await.write_owned().await
    }

    /// Exclusive access without waiting; `None` when the session is busy.
    pub async fn try_write(&self, file_hash: &str) -> Option<SessionWriteGuard> {
        self.lock_for(file_hash).await.try_write_owned().ok()
    }

    /// Forget `file_hash` once nobody holds or waits on its lock.
    ///
    /// Call after dropping the guard.
    pub async fn release(&self, file_hash: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(file_hash)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(file_hash);
        }
    }

    /// Drop map entries nobody holds or waits on. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
