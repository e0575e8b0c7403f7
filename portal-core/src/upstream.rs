//! Upstream page source trait.

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::record::RawPage;

/// A single-page fetch against the upstream character API.
///
/// Implementations perform exactly one request per call; retry, backoff,
/// pagination and response caching are layered on top by the API crate's
/// upstream client.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one 1-based page.
    async fn fetch_page(&self, page: u32) -> Result<RawPage, UpstreamError>;

    /// Cheap reachability check used by health reporting.
    async fn probe(&self) -> bool;
}
