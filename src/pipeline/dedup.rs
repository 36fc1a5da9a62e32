//! Burst suppression: a key is let through at most once per TTL window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

/// TTL used by the relay for every source.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);

/// Concurrent "recently seen" map.
///
/// A single mutex guards lookup+refresh and the sweep, so a sweep racing an
/// `allow` on the same key can't change the answer: the sweep only drops
/// entries whose age is already `>= ttl`, which `allow` would let through anyway.
pub struct Deduplicator {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` and records `key` unless it was allowed less than `ttl` ago.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub(crate) fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut seen = self.lock();
        if let Some(last) = seen.get(key) {
            if now.saturating_duration_since(*last) < self.ttl {
                return false;
            }
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut seen = self.lock();
        let before = seen.len();
        seen.retain(|_, last| now.saturating_duration_since(*last) < ttl);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // A panic while holding the lock can't leave the map half-updated.
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

/// Spawn the background sweep, running every `2 × ttl`.
pub fn spawn_sweeper(dedup: Arc<Deduplicator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(dedup.ttl() * 2);
        // Skip immediate first tick
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = dedup.sweep();
            if removed > 0 {
                debug!(removed, remaining = dedup.len(), "Dedup sweep");
            }
        }
    })
}
