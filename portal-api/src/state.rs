//! Shared application state for Axum routers.

use std::sync::Arc;

use portal_core::RefreshState;
use portal_storage::RecordStore;

use crate::jobs::RefreshMetrics;
use crate::services::RecordService;
use crate::upstream::UpstreamClient;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Read path: page cache in front of the store.
    pub records: Arc<RecordService>,
    /// Direct store handle for health checks, which must bypass the cache.
    pub store: Arc<dyn RecordStore>,
    pub upstream: Arc<UpstreamClient>,
    pub refresh: Arc<RefreshState>,
    pub refresh_metrics: Arc<RefreshMetrics>,
}
