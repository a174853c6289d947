//! Per-key async mutex registry.
//!
//! Providers sharing a [`KeyLocks`] serialize their load→mutate→store windows
//! per cache key. Entries are dropped from the registry once nobody holds or
//! waits on them, so the map stays proportional to in-flight keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Shared registry of per-key locks. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl KeyLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // The map is only touched in short, non-async sections; a poisoned map is
    // still structurally valid.
    fn map(&self) -> MutexGuard<'_, LockMap> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> KeyLockGuard {
        let lock = {
            let mut map = self.map();
            Arc::clone(map.entry(key.to_string()).or_default())
        };

        let guard = lock.lock_owned().await;

        KeyLockGuard {
            key: key.to_string(),
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn prune(&self, key: &str) {
        let mut map = self.map();
        if map.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(key);
        }
    }
}

impl std::fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLocks").field("held", &self.len()).finish()
    }
}

/// Exclusive hold on one key. Released on drop.
pub struct KeyLockGuard {
    key: String,
    locks: KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Release the mutex first so the registry entry's count drops back.
        drop(self.guard.take());
        self.locks.prune(&self.key);
    }
}
