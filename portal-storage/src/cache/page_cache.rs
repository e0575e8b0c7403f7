//! Read-through page cache with in-flight load coalescing.
//!
//! On a miss the first caller for a key becomes the leader and runs the
//! loader. Callers arriving while that load is in flight register a oneshot
//! notifier and receive the leader's result, success or error. Errors are
//! broadcast to the waiters of that flight but never stored.
//!
//! [`PageCache::clear`] bumps a generation counter under the entry lock. A
//! leader only writes back if the generation it observed before loading is
//! still current, so loads that straddle a clear cannot repopulate the cache
//! with pre-clear data.
//!
//! Internal failures (a poisoned lock, a corrupted index) never reach the
//! caller. They bump the error counter, reset the cache, and the call falls
//! through to the loader.

use portal_core::CacheError;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lru::LruTtl;
use super::stats::{CacheStats, Counters};

type Notifier<V, E> = oneshot::Sender<Result<V, E>>;

enum Join<V, E> {
    Leader,
    Waiter(oneshot::Receiver<Result<V, E>>),
}

pub struct PageCache<K, V, E> {
    name: &'static str,
    entries: Mutex<LruTtl<K, V>>,
    inflight: Mutex<HashMap<K, Vec<Notifier<V, E>>>>,
    generation: AtomicU64,
    counters: Counters,
}

impl<K, V, E> PageCache<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            entries: Mutex::new(LruTtl::new(capacity, ttl)),
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the cached value for `key`, or run `loader` once across all
    /// concurrent callers for that key.
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.lookup(&key) {
            Ok(Some(value)) => {
                self.counters.hit();
                return Ok(value);
            }
            Ok(None) => self.counters.miss(),
            Err(err) => {
                self.bypass(&err);
                return loader().await;
            }
        }

        if let Join::Waiter(rx) = self.join(&key) {
            return match rx.await {
                Ok(result) => result,
                Err(_) => {
                    debug!(cache = self.name, "in-flight load abandoned, loading directly");
                    loader().await
                }
            };
        }

        let generation = self.generation.load(Ordering::Acquire);
        let flight = Flight {
            cache: self,
            key: Some(key.clone()),
        };

        // A previous leader may have stored the value between our miss and
        // taking the lead.
        if let Ok(Some(value)) = self.lookup(&key) {
            flight.complete(&Ok(value.clone()));
            return Ok(value);
        }

        let result = loader().await;
        if let Ok(value) = &result {
            self.store(key, value.clone(), generation);
        }
        flight.complete(&result);
        result
    }

    /// Drop every entry. Loads already in flight will not write back.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(entries);
        self.entries.clear_poison();
    }

    /// Poison the entry lock the way a panic under it would.
    #[cfg(any(test, feature = "testing"))]
    pub fn poison(&self)
    where
        K: Send,
        V: Send,
    {
        let (name, entries) = (self.name, &self.entries);
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(move || {
                    let _guard = entries.lock();
                    panic!("poisoning {name} cache");
                })
                .join();
        });
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

    fn lookup(&self, key: &K) -> Result<Option<V>, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned { cache: self.name })?;
        entries.get(key, Instant::now())
    }

    fn store(&self, key: K, value: V, generation: u64) {
        let stored = self
            .entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned { cache: self.name })
            .and_then(|mut entries| {
                if self.generation.load(Ordering::Acquire) != generation {
                    return Ok(false);
                }
                entries.insert(key, value, Instant::now()).map(|()| true)
            });

        match stored {
            Ok(true) => self.counters.put(),
            Ok(false) => debug!(cache = self.name, "cache cleared during load, result not stored"),
            Err(err) => self.bypass(&err),
        }
    }

    fn join(&self, key: &K) -> Join<V, E> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        match inflight.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Join::Waiter(rx)
            }
            None => {
                inflight.insert(key.clone(), Vec::new());
                Join::Leader
            }
        }
    }

    fn take_waiters(&self, key: &K) -> Vec<Notifier<V, E>> {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .unwrap_or_default()
    }

    fn bypass(&self, err: &CacheError) {
        self.counters.error();
        warn!(cache = self.name, error = %err, "cache failure, bypassing to loader");
        self.clear();
    }
}

/// Leadership of one in-flight load. Dropping it without completing (the
/// leader was cancelled) closes every waiter's channel.
struct Flight<'a, K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    cache: &'a PageCache<K, V, E>,
    key: Option<K>,
}

impl<K, V, E> Flight<'_, K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn complete(mut self, result: &Result<V, E>) {
        if let Some(key) = self.key.take() {
            for waiter in self.cache.take_waiters(&key) {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

impl<K, V, E> Drop for Flight<'_, K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            drop(self.cache.take_waiters(&key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    type TestCache = PageCache<u32, u32, String>;

    fn cache(ttl_secs: u64) -> TestCache {
        PageCache::new("test", 16, Duration::from_secs(ttl_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_load() {
        let cache = cache(30);
        let counter = AtomicUsize::new(0);
        let loads = &counter;

        let callers = (0..32).map(|_| {
            cache.get_or_load(1, move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(99)
            })
        });
        let results = join_all(callers).await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(99)));
        let stats = cache.stats();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.misses, 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reaches_waiters_and_is_not_cached() {
        let cache = cache(30);
        let counter = AtomicUsize::new(0);
        let loads = &counter;

        let callers = (0..4).map(|_| {
            cache.get_or_load(7, move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>("db down".to_string())
            })
        });
        let results = join_all(callers).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Err("db down".to_string())));

        let retry = cache.get_or_load(7, || async { Ok::<_, String>(5) }).await;
        assert_eq!(retry, Ok(5));
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache(30);
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(1)
        };

        cache.get_or_load(3, load).await.unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        cache.get_or_load(3, load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.get_or_load(3, load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_result() {
        let cache = Arc::new(cache(30));
        let (started_tx, started_rx) = oneshot::channel();
        let (go_tx, go_rx) = oneshot::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_load(1, || async move {
                        let _ = started_tx.send(());
                        let _ = go_rx.await;
                        Ok::<_, String>(1)
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.clear();
        go_tx.send(()).unwrap();
        assert_eq!(leader.await.unwrap(), Ok(1));

        let fresh = cache.get_or_load(1, || async { Ok::<_, String>(2) }).await;
        assert_eq!(fresh, Ok(2));
    }

    #[tokio::test]
    async fn test_waiter_loads_itself_when_leader_is_cancelled() {
        let cache = Arc::new(cache(30));
        let (started_tx, started_rx) = oneshot::channel();

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_load(1, || async move {
                        let _ = started_tx.send(());
                        std::future::pending::<Result<u32, String>>().await
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_load(1, || async { Ok::<_, String>(8) }).await })
        };
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        leader.abort();

        assert_eq!(waiter.await.unwrap(), Ok(8));
    }

    #[tokio::test]
    async fn test_poisoned_cache_falls_through_to_loader() {
        let cache = Arc::new(cache(30));
        cache.get_or_load(1, || async { Ok::<_, String>(1) }).await.unwrap();

        cache.poison();

        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let value = cache
            .get_or_load(1, move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(10)
            })
            .await;

        assert_eq!(value, Ok(10));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().errors, 1);

        // The cache heals itself and serves normally afterwards.
        cache.get_or_load(1, || async { Ok::<_, String>(11) }).await.unwrap();
        let cached = cache.get_or_load(1, || async { Ok::<_, String>(12) }).await;
        assert_eq!(cached, Ok(11));
    }
}
