//! Process-wide single-flight locks and replay dedup.
//!
//! [`LockRegistry`] hands out named guards: task-level update locks
//! (`task:{id}`) and single-flight guards for admin operations. Acquiring a
//! held key with a zero wait fails fast instead of blocking.
//!
//! [`SeenEvents`] is the bounded LRU the correlator uses to drop replayed
//! upstream events by id.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Notify;
use tokio::time::Instant;

use atelier_core::CoreError;

/// Default capacity of the seen-event LRU.
pub const SEEN_EVENTS_CAPACITY: usize = 8192;

/// Named single-flight lock registry.
#[derive(Default, Debug)]
pub struct LockRegistry {
    held: Mutex<HashSet<String>>,
    released: Notify,
}

impl LockRegistry {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Acquire the named lock, waiting up to `wait`.
    ///
    /// A zero `wait` on a held key fails fast with an internal error; an
    /// expired wait fails with a timeout.
    pub async fn acquire(&self, key: &str, wait: Duration) -> Result<KeyGuard<'_>, CoreError> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
                if held.insert(key.to_string()) {
                    return Ok(KeyGuard {
                        registry: self,
                        key: key.to_string(),
                    });
                }
            }
            if wait.is_zero() {
                return Err(CoreError::Internal(format!(
                    "Operation '{key}' is already running"
                )));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || tokio::time::timeout(remaining, self.released.notified())
                    .await
                    .is_err()
            {
                return Err(CoreError::Timeout(format!(
                    "Could not acquire lock '{key}' within {}ms",
                    wait.as_millis()
                )));
            }
        }
    }
}

/// Guard for a named lock; releases on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    registry: &'a LockRegistry,
    key: String,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
        drop(held);
        self.registry.released.notify_waiters();
    }
}

/// Bounded LRU of already-observed event ids.
pub struct SeenEvents {
    cache: Mutex<LruCache<String, ()>>,
}

impl SeenEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record an id; `true` the first time, `false` on a replay.
    pub fn insert(&self, id: &str) -> bool {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(id.to_string(), ()).is_none()
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::new(SEEN_EVENTS_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
