//! Record Service
//!
//! The read path: validate the listing query, serve it from the page cache,
//! fall through to the store on a miss, and translate store failures into
//! client-facing errors.

use chrono::Utc;
use portal_core::{PageKey, PageQuery, PageSlice, Record, RefreshState, RefreshStatus, StoreError};
use portal_storage::{CacheStats, PageCache, RecordStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiResult;

/// Page cache specialised for listing pages.
pub type RecordPageCache = PageCache<PageKey, Arc<PageSlice>, StoreError>;

/// One page of the `/characters` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPage {
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_prev: bool,
    pub has_next: bool,
    #[serde(rename = "results")]
    pub records: Vec<Record>,
}

impl RecordPage {
    pub fn from_slice(slice: &PageSlice, query: &PageQuery) -> Self {
        let total_pages = query.total_pages(slice.total_count);
        Self {
            page: query.page(),
            page_size: query.page_size(),
            total_count: slice.total_count,
            total_pages,
            has_prev: query.page() > 1,
            has_next: u64::from(query.page()) < total_pages,
            records: slice.records.clone(),
        }
    }
}

pub struct RecordService {
    store: Arc<dyn RecordStore>,
    cache: Arc<RecordPageCache>,
    refresh: Arc<RefreshState>,
}

impl RecordService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<RecordPageCache>,
        refresh: Arc<RefreshState>,
    ) -> Self {
        Self {
            store,
            cache,
            refresh,
        }
    }

    /// Build the page cache this service reads through.
    pub fn page_cache(capacity: usize, ttl: Duration) -> Arc<RecordPageCache> {
        Arc::new(PageCache::new("page", capacity, ttl))
    }

    /// Validate raw request parameters and serve the page.
    pub async fn list_records(
        &self,
        sort: &str,
        order: &str,
        page: u32,
        page_size: u32,
    ) -> ApiResult<RecordPage> {
        let query = PageQuery::parse(sort, order, page, page_size)?;
        self.list(&query).await
    }

    pub async fn list(&self, query: &PageQuery) -> ApiResult<RecordPage> {
        let store = &self.store;
        let slice = self
            .cache
            .get_or_load(query.key(), || async move {
                store.query(query).await.map(Arc::new)
            })
            .await?;
        Ok(RecordPage::from_slice(&slice, query))
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.refresh.status(Utc::now())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
