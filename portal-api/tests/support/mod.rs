#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use portal_api::jobs::RefreshMetrics;
use portal_api::{
    AppState, RecordPageCache, RecordService, RefreshConfig, RefreshCoordinator, UpstreamClient,
    UpstreamConfig,
};
use portal_core::RefreshState;
use portal_test_utils::{AdvisoryLock, InMemoryStore, RecordStore, ScriptedFetcher};

pub mod db;

pub const PAGE_CACHE_TTL: Duration = Duration::from_secs(30);
pub const REFRESH_TTL: Duration = Duration::from_secs(600);

/// One replica wired against in-memory collaborators.
pub struct Replica<S> {
    pub store: Arc<S>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub upstream: Arc<UpstreamClient>,
    pub page_cache: Arc<RecordPageCache>,
    pub refresh: Arc<RefreshState>,
    pub coordinator: Arc<RefreshCoordinator<S>>,
    pub service: Arc<RecordService>,
}

impl<S> Replica<S>
where
    S: RecordStore + AdvisoryLock + 'static,
{
    pub fn new(store: S, fetcher: ScriptedFetcher, config: &RefreshConfig) -> Self {
        let store = Arc::new(store);
        let fetcher = Arc::new(fetcher);
        let upstream = Arc::new(UpstreamClient::new(
            Arc::clone(&fetcher) as Arc<dyn portal_test_utils::PageFetcher>,
            &UpstreamConfig::default(),
        ));
        let page_cache = RecordService::page_cache(64, PAGE_CACHE_TTL);
        let refresh = Arc::new(RefreshState::new(REFRESH_TTL));
        Self::assemble(store, fetcher, upstream, page_cache, refresh, config)
    }

    /// A second coordinator sharing this replica's store, page cache and
    /// refresh state but talking to a different upstream.
    pub fn with_upstream(&self, fetcher: ScriptedFetcher, config: &RefreshConfig) -> Self {
        let fetcher = Arc::new(fetcher);
        let upstream = Arc::new(UpstreamClient::new(
            Arc::clone(&fetcher) as Arc<dyn portal_test_utils::PageFetcher>,
            &UpstreamConfig::default(),
        ));
        Self::assemble(
            Arc::clone(&self.store),
            fetcher,
            upstream,
            Arc::clone(&self.page_cache),
            Arc::clone(&self.refresh),
            config,
        )
    }

    fn assemble(
        store: Arc<S>,
        fetcher: Arc<ScriptedFetcher>,
        upstream: Arc<UpstreamClient>,
        page_cache: Arc<RecordPageCache>,
        refresh: Arc<RefreshState>,
        config: &RefreshConfig,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&upstream),
            Arc::clone(&page_cache),
            Arc::clone(&refresh),
            config,
        ));
        let records: Arc<dyn RecordStore> = store.clone();
        let service = Arc::new(RecordService::new(
            records,
            Arc::clone(&page_cache),
            Arc::clone(&refresh),
        ));
        Self {
            store,
            fetcher,
            upstream,
            page_cache,
            refresh,
            coordinator,
            service,
        }
    }

    pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
        self.coordinator.metrics()
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            records: Arc::clone(&self.service),
            store: self.store.clone(),
            upstream: Arc::clone(&self.upstream),
            refresh: Arc::clone(&self.refresh),
            refresh_metrics: self.coordinator.metrics(),
        }
    }
}

pub fn in_memory(fetcher: ScriptedFetcher) -> Replica<InMemoryStore> {
    Replica::new(InMemoryStore::new(), fetcher, &RefreshConfig::default())
}
