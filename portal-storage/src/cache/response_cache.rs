//! Short-lived memo of upstream responses.
//!
//! Keyed by request identity (the upstream page number in practice). Unlike
//! [`PageCache`](super::PageCache) there is no load coalescing: the refresh
//! job is the only heavy caller and it already runs under a cross-replica
//! lock. Only successful responses are stored.

use portal_core::CacheError;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::lru::LruTtl;
use super::stats::{CacheStats, Counters};

pub struct ResponseCache<K, V> {
    name: &'static str,
    entries: Mutex<LruTtl<K, V>>,
    counters: Counters,
}

impl<K, V> ResponseCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            entries: Mutex::new(LruTtl::new(capacity, ttl)),
            counters: Counters::default(),
        }
    }

    /// Serve a fresh cached response or call `fetch` and remember a success.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.with_entries(|entries| entries.get(&key, Instant::now())) {
            Ok(Some(value)) => {
                self.counters.hit();
                return Ok(value);
            }
            Ok(None) => self.counters.miss(),
            Err(err) => self.bypass(&err),
        }

        let value = fetch().await?;
        let stored = self.with_entries(|entries| entries.insert(key, value.clone(), Instant::now()));
        match stored {
            Ok(()) => self.counters.put(),
            Err(err) => self.bypass(&err),
        }
        Ok(value)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.entries.clear_poison();
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.counters.snapshot();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        stats.entries = entries.len() as u64;
        stats.capacity = entries.capacity() as u64;
        stats.evictions = entries.evictions();
        stats.expirations = entries.expirations();
        stats
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut LruTtl<K, V>) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned { cache: self.name })?;
        f(&mut entries)
    }

    fn bypass(&self, err: &CacheError) {
        self.counters.error();
        warn!(cache = self.name, error = %err, "cache failure, bypassing to upstream");
        self.clear();
    }
}
