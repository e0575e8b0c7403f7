//! Upstream character API access.
//!
//! [`HttpPageFetcher`] performs single page requests. [`UpstreamClient`]
//! layers the response cache, retry with backoff and pagination on top of
//! any [`PageFetcher`](portal_core::PageFetcher).

mod client;
mod http;
mod retry;

pub use client::{UpstreamClient, UpstreamSnapshot, UpstreamStats};
pub use http::{parse_retry_after, HttpPageFetcher};
pub use retry::RetryPolicy;

use std::time::Duration;

use crate::config::env_or;
use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_UPSTREAM_BASE_URL, DEFAULT_UPSTREAM_CACHE_MAX, DEFAULT_UPSTREAM_CACHE_TTL_SECS,
};

/// Upstream client configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Character listing endpoint; pages are requested as `?page=N`.
    pub base_url: String,

    /// Attempts per page, including the first.
    pub max_retries: u32,

    pub request_timeout: Duration,

    pub probe_timeout: Duration,

    /// Must stay below the refresh interval.
    pub cache_ttl: Duration,

    pub cache_max: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(DEFAULT_UPSTREAM_CACHE_TTL_SECS),
            cache_max: DEFAULT_UPSTREAM_CACHE_MAX,
        }
    }
}

impl UpstreamConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PORTAL_UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_BASE_URL.to_string()),
            max_retries: env_or("PORTAL_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            request_timeout: Duration::from_secs(env_or(
                "PORTAL_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(env_or(
                "PORTAL_UPSTREAM_CACHE_TTL_SECS",
                DEFAULT_UPSTREAM_CACHE_TTL_SECS,
            )),
            cache_max: env_or("PORTAL_UPSTREAM_CACHE_MAX", DEFAULT_UPSTREAM_CACHE_MAX),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}
