//! Fixed-window request counting keyed by `(category, identifier)`.
//!
//! Windows live behind the [`RateLimitStore`] trait so the in-memory table can
//! be swapped for a shared store. The in-memory store is a sharded `DashMap`;
//! every check is a single read-modify-write under the key's shard lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub const DEFAULT_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0);
        let secs = (millis + 999) / 1000;
        secs.max(1) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key`, atomically with respect to other
    /// hits on the same key.
    fn hit(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> RateDecision;

    /// Drop windows whose reset time has passed. Returns how many went.
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryWindowStore {
    fn hit(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> RateDecision {
        let fresh = |limit: u32| {
            let count = u32::from(limit > 0);
            RateWindow {
                count,
                reset_at: now + window,
            }
        };

        let state = match self.windows.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let window = fresh(limit);
                vacant.insert(window);
                (window, limit > 0)
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if now >= current.reset_at {
                    *current = fresh(limit);
                    (*current, limit > 0)
                } else if current.count >= limit {
                    (*current, false)
                } else {
                    current.count += 1;
                    (*current, true)
                }
            }
        };

        let (window, allowed) = state;
        RateDecision {
            allowed,
            limit,
            remaining: if allowed {
                limit.saturating_sub(window.count)
            } else {
                0
            },
            reset_at: window.reset_at,
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            window: Duration::seconds(DEFAULT_WINDOW_SECS),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryWindowStore::new()))
    }

    pub fn check(&self, category: &str, identifier: &str, limit: u32) -> RateDecision {
        self.check_at(category, identifier, limit, Utc::now())
    }

    pub fn check_at(
        &self,
        category: &str,
        identifier: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let key = format!("{category}:{identifier}");
        let decision = self.store.hit(&key, limit, self.window, now);
        if !decision.allowed {
            tracing::debug!(
                category = category,
                identifier = identifier,
                limit = limit,
                reset_at = %decision.reset_at,
                "rate limit window exhausted"
            );
        }
        decision
    }

    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        self.store.sweep(now)
    }

    pub fn tracked_windows(&self) -> usize {
        self.store.len()
    }
}
