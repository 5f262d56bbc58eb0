use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
#[error("timed out acquiring lock for {0}")]
pub struct LockTimeout(pub Uuid);

/// Per-key async mutex registry with bounded-timeout acquisition. One
/// registry defines one exclusion domain: operations that must be mutually
/// exclusive for the same key (e.g. a doctor's timeline) acquire through
/// the same registry instance.
pub struct LockRegistry {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    wait: Duration,
}

impl LockRegistry {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// Acquire the lock for `key`, waiting at most the registry's bound.
    /// Idle entries are evicted on the way in, keeping the map proportional
    /// to the keys currently held or waited on rather than every key ever
    /// locked.
    pub async fn acquire(&self, key: Uuid) -> Result<OwnedMutexGuard<()>, LockTimeout> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // A strong count of 1 means the map holds the only reference:
            // no guard is out and no waiter is queued on that entry.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key).or_default().clone()
        };
        debug!("Acquiring lock for {}", key);
        timeout(self.wait, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout(key))
    }

    /// Acquire the locks for every key, in sorted order so that concurrent
    /// multi-key acquisitions cannot deadlock. Duplicates are collapsed.
    pub async fn acquire_many(
        &self,
        keys: impl IntoIterator<Item = Uuid>,
    ) -> Result<Vec<OwnedMutexGuard<()>>, LockTimeout> {
        let mut ordered: Vec<Uuid> = keys.into_iter().collect();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }

    /// Number of keys the registry currently tracks.
    pub async fn tracked_keys(&self) -> usize {
        self.locks.lock().await.len()
    }
}
