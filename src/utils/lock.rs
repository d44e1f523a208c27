// src/utils/lock.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-attempt critical sections.
///
/// `submit` and `regrade` hold the guard for the whole
/// delete-then-recreate sequence so two requests for the same attempt
/// never interleave inside this process. Entries are dropped once no
/// request holds or waits for them.
#[derive(Clone, Default)]
pub struct AttemptLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

/// RAII guard returned by [`AttemptLocks::lock`].
pub struct AttemptGuard {
    attempt_id: i64,
    registry: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl AttemptLocks {
    pub async fn lock(&self, attempt_id: i64) -> AttemptGuard {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(attempt_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = slot.lock_owned().await;

        AttemptGuard {
            attempt_id,
            registry: self.inner.clone(),
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one inside our own guard.
        if let Some(slot) = map.get(&self.attempt_id) {
            if Arc::strong_count(slot) <= 2 {
                map.remove(&self.attempt_id);
            }
        }
    }
}
