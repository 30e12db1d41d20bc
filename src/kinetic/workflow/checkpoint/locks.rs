// SPDX-License-Identifier: MIT

//! Per-session critical sections shared by every executor on one store

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Weak<AsyncMutex<()>>>;

/// Keyed async locks, one per session key.
///
/// Entries are weak: a key's lock lives only while a run holds or waits for
/// it, and its map entry is removed when the last holder lets go.
#[derive(Clone, Debug, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Exclusive hold on one session key, released on drop
pub struct SessionGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder has `session_key`, then take it
    pub async fn acquire(&self, session_key: &str) -> SessionGuard {
        let lock = {
            let mut map = lock_map(&self.inner);
            match map.get(session_key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    map.insert(session_key.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        SessionGuard {
            key: session_key.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.inner.clone(),
        }
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        lock_map(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // release first so the strong count reflects only remaining waiters
        self.guard.take();
        let mut map = lock_map(&self.locks);
        if map
            .get(&self.key)
            .map_or(false, |weak| weak.strong_count() == 0)
        {
            map.remove(&self.key);
        }
    }
}

fn lock_map(inner: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    // the map holds no invariant a panicking holder could break
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
