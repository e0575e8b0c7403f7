//! Retrying, caching, paginating upstream client.

use async_stream::try_stream;
use futures_util::Stream;
use portal_core::{PageFetcher, RawPage, UpstreamError};
use portal_storage::{CacheStats, ResponseCache};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{RetryPolicy, UpstreamConfig};

/// Upstream request counters. Cache hits are read from the response cache.
#[derive(Debug, Default)]
pub struct UpstreamStats {
    calls: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UpstreamSnapshot {
    /// Requests actually sent to the fetcher.
    pub calls: u64,
    pub retries: u64,
    /// Pages that failed for good (fatal or retries exhausted).
    pub failures: u64,
    pub cache_hits: u64,
    pub cache: CacheStats,
}

pub struct UpstreamClient {
    fetcher: Arc<dyn PageFetcher>,
    cache: ResponseCache<u32, RawPage>,
    retry: RetryPolicy,
    stats: UpstreamStats,
}

impl UpstreamClient {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &UpstreamConfig) -> Self {
        Self {
            fetcher,
            cache: ResponseCache::new("upstream", config.cache_max, config.cache_ttl),
            retry: config.retry_policy(),
            stats: UpstreamStats::default(),
        }
    }

    /// Walk pages `1..` until the upstream stops advertising a next page.
    ///
    /// The stream is lazy: a page is requested only when polled. The first
    /// error is yielded and ends the stream; pages already yielded stay valid.
    pub fn pages(&self) -> impl Stream<Item = Result<RawPage, UpstreamError>> + Send + '_ {
        try_stream! {
            let mut page = 1u32;
            loop {
                let raw = self.fetch_page(page).await?;
                let more = raw.has_next();
                yield raw;
                if !more {
                    break;
                }
                page += 1;
            }
        }
    }

    /// One page, served from the response cache when fresh.
    pub async fn fetch_page(&self, page: u32) -> Result<RawPage, UpstreamError> {
        self.cache
            .get_or_fetch(page, || self.fetch_with_retry(page))
            .await
    }

    async fn fetch_with_retry(&self, page: u32) -> Result<RawPage, UpstreamError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.stats.calls.fetch_add(1, Ordering::Relaxed);

            let err = match self.fetcher.fetch_page(page).await {
                Ok(raw) => return Ok(raw),
                Err(err) => err,
            };

            let retry_after = match &err {
                UpstreamError::Transient { retry_after, .. } => *retry_after,
                _ => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(page, error = %err, "upstream page failed");
                    return Err(err);
                }
            };

            if attempt >= self.retry.max_attempts {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(page, attempts = attempt, error = %err, "upstream retries exhausted");
                return Err(UpstreamError::Unavailable {
                    page,
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = self.retry.delay(attempt, retry_after);
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            debug!(
                page,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient upstream failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Reachability check for health reporting.
    pub async fn probe(&self) -> bool {
        self.fetcher.probe().await
    }

    pub fn snapshot(&self) -> UpstreamSnapshot {
        let cache = self.cache.stats();
        UpstreamSnapshot {
            calls: self.stats.calls.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            cache_hits: cache.hits,
            cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{StreamExt, TryStreamExt};
    use portal_test_utils::fixtures::{earth_humans, transient};
    use portal_test_utils::ScriptedFetcher;
    use std::time::Duration;

    fn client(fetcher: &Arc<ScriptedFetcher>) -> UpstreamClient {
        UpstreamClient::new(fetcher.clone(), &UpstreamConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_walks_every_page() {
        let fetcher = Arc::new(ScriptedFetcher::from_records(earth_humans(45), 20));
        let upstream = client(&fetcher);

        let pages: Vec<RawPage> = upstream.pages().try_collect().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|p| p.results.len()).sum::<usize>(), 45);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let fetcher = Arc::new(ScriptedFetcher::from_records(earth_humans(30), 20));
        fetcher.fail_page(2, transient(2), 2);
        let upstream = client(&fetcher);

        let pages: Vec<RawPage> = upstream.pages().try_collect().await.unwrap();
        assert_eq!(pages.len(), 2);

        let stats = upstream.snapshot();
        assert_eq!(stats.calls, 4);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_end_the_stream() {
        let fetcher = Arc::new(ScriptedFetcher::from_records(earth_humans(60), 20));
        fetcher.fail_page(2, transient(2), 10);
        let upstream = client(&fetcher);

        let items: Vec<_> = upstream.pages().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        match &items[1] {
            Err(UpstreamError::Unavailable { page, attempts, .. }) => {
                assert_eq!(*page, 2);
                assert_eq!(*attempts, 5);
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
        // Page 3 is never requested.
        assert_eq!(fetcher.calls(), 1 + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let fetcher = Arc::new(ScriptedFetcher::from_records(earth_humans(10), 20));
        fetcher.fail_page(
            1,
            UpstreamError::Fatal {
                page: 1,
                status: Some(400),
                reason: "Bad Request".to_string(),
            },
            1,
        );
        let upstream = client(&fetcher);

        let pages = upstream.pages();
        futures_util::pin_mut!(pages);
        let first = pages.next().await;
        assert!(matches!(first, Some(Err(UpstreamError::Fatal { .. }))));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let fetcher = Arc::new(ScriptedFetcher::from_records(earth_humans(5), 20));
        fetcher.fail_page(
            1,
            UpstreamError::Transient {
                page: 1,
                reason: "status 429".to_string(),
                retry_after: Some(Duration::from_secs(30)),
            },
            1,
        );
        let upstream = client(&fetcher);

        let started = tokio::time::Instant::now();
        upstream.fetch_page(1).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_responses_are_cached_between_walks() {
        let fetcher = Arc::new(ScriptedFetcher::from_records(earth_humans(30), 20));
        let upstream = client(&fetcher);

        let _: Vec<RawPage> = upstream.pages().try_collect().await.unwrap();
        let _: Vec<RawPage> = upstream.pages().try_collect().await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(upstream.snapshot().cache_hits, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        let _: Vec<RawPage> = upstream.pages().try_collect().await.unwrap();
        assert_eq!(fetcher.calls(), 4);
    }
}
