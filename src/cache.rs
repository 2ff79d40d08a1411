//! TTL cache in front of remote fetches.
//!
//! The lock is never held across the fetch future. Two callers missing the
//! same key at once will both fetch and the later write wins; that is
//! acceptable for calendar data and keeps the cache lock uncontended.

use std::{collections::HashMap, future::Future, sync::Arc, sync::RwLock, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::model::Item;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub items: Vec<Item>,
    pub cached_at: DateTime<Utc>,
    ttl: TimeDelta,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.cached_at <= ttl
    }
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ResponseCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the cached items for `key` while `now - cached_at <= ttl`,
    /// otherwise runs `fetch` and stores its result. Errors are not cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Vec<Item>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Item>, E>>,
    {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let now = self.clock.now();

        if let Some(items) = self.lookup(key, now, ttl) {
            metrics::counter!("remote_cache_hits_total").increment(1);
            debug!(target: "cache", key, count = items.len(), "cache hit");
            return Ok(items);
        }
        metrics::counter!("remote_cache_misses_total").increment(1);
        debug!(target: "cache", key, "cache miss");

        let items = fetch().await?;

        let entry = CacheEntry {
            key: key.to_string(),
            items: items.clone(),
            cached_at: self.clock.now(),
            ttl,
        };
        self.write().insert(key.to_string(), entry);
        Ok(items)
    }

    fn lookup(&self, key: &str, now: DateTime<Utc>, ttl: TimeDelta) -> Option<Vec<Item>> {
        {
            let guard = self.read();
            match guard.get(key) {
                Some(e) if e.is_fresh(now, ttl) => return Some(e.items.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Stale: evict so the map doesn't grow with dead windows.
        let mut guard = self.write();
        if guard.get(key).is_some_and(|e| !e.is_fresh(now, ttl)) {
            guard.remove(key);
        }
        None
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Drops every entry older than the TTL it was stored with.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|_, e| e.is_fresh(now, e.ttl));
        before - guard.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}
