use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// In-flight downloads keyed by song id. Holding a [`DownloadGuard`] gives
/// exclusive use of the key; later callers wait for it to drop.
#[derive(Debug, Clone, Default)]
pub struct InflightDownloads {
    locks: Arc<Mutex<HashMap<String, KeyLock>>>,
}

pub struct DownloadGuard {
    key: String,
    registry: InflightDownloads,
    _held: OwnedMutexGuard<()>,
}

impl InflightDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_insert(&self, key: &str) -> KeyLock {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_string()).or_default().clone()
    }

    /// Wait until no one else holds `key`, then claim it.
    pub async fn acquire(&self, key: &str) -> DownloadGuard {
        let lock = self.get_or_insert(key);
        let held = lock.lock_owned().await;
        DownloadGuard {
            key: key.to_string(),
            registry: self.clone(),
            _held: held,
        }
    }

    pub fn is_inflight(&self, key: &str) -> bool {
        let map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(key).is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Keys currently claimed or awaited.
    pub fn keys(&self) -> Vec<String> {
        let map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        let mut map = self
            .registry
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Two references left means the map and this guard: nobody is waiting.
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            map.remove(&self.key);
        }
    }
}
