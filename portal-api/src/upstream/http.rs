//! reqwest-backed page fetcher.

use async_trait::async_trait;
use portal_core::{PageFetcher, RawPage, UpstreamError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::UpstreamConfig;
use crate::constants::MAX_RETRY_AFTER_SECS;
use crate::error::{ApiError, ApiResult};

/// One GET per page against `{base_url}?page=N`.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    base_url: String,
    probe_timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(config: &UpstreamConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("portal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            probe_timeout: config.probe_timeout,
        })
    }
}

/// `Retry-After` in delta-seconds form, capped at [`MAX_RETRY_AFTER_SECS`].
/// HTTP-date and fractional values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // All digits, so a parse failure can only be overflow.
    let seconds = value.parse::<u64>().unwrap_or(u64::MAX);
    Some(Duration::from_secs(seconds.min(MAX_RETRY_AFTER_SECS)))
}

/// Classify a response status that is not a success.
fn status_error(page: u32, status: StatusCode, headers: &HeaderMap) -> UpstreamError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        UpstreamError::Transient {
            page,
            reason: format!("status {}", status.as_u16()),
            retry_after: parse_retry_after(headers),
        }
    } else {
        UpstreamError::Fatal {
            page,
            status: Some(status.as_u16()),
            reason: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        }
    }
}

/// Classify a transport-level failure.
fn request_error(page: u32, err: &reqwest::Error) -> UpstreamError {
    if err.is_decode() {
        UpstreamError::Fatal {
            page,
            status: err.status().map(|s| s.as_u16()),
            reason: format!("undecodable payload: {}", err),
        }
    } else if err.is_builder() {
        UpstreamError::Fatal {
            page,
            status: None,
            reason: format!("invalid request: {}", err),
        }
    } else {
        // Timeouts, connect failures and broken bodies are all worth retrying.
        UpstreamError::Transient {
            page,
            reason: err.to_string(),
            retry_after: None,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, page: u32) -> Result<RawPage, UpstreamError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("page", page)])
            .send()
            .await
            .map_err(|e| request_error(page, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(page, status, response.headers()));
        }

        let body = response
            .json::<RawPage>()
            .await
            .map_err(|e| request_error(page, &e))?;
        debug!(page, results = body.results.len(), "fetched upstream page");
        Ok(body)
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(&self.base_url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "upstream probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-1"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e10"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let cap = Some(Duration::from_secs(MAX_RETRY_AFTER_SECS));
        let mut headers = HeaderMap::new();

        headers.insert(RETRY_AFTER, HeaderValue::from_static("10000000000"));
        assert_eq!(parse_retry_after(&headers), cap);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("99999999999999999999999"));
        assert_eq!(parse_retry_after(&headers), cap);

        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 60 "));
        assert_eq!(parse_retry_after(&headers), cap);
    }

    #[test]
    fn test_status_classification() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));

        match status_error(3, StatusCode::TOO_MANY_REQUESTS, &headers) {
            UpstreamError::Transient { page, retry_after, .. } => {
                assert_eq!(page, 3);
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("expected transient, got {other:?}"),
        }

        assert!(status_error(1, StatusCode::BAD_GATEWAY, &HeaderMap::new()).is_transient());

        match status_error(9, StatusCode::NOT_FOUND, &HeaderMap::new()) {
            UpstreamError::Fatal { status, .. } => assert_eq!(status, Some(404)),
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn test_fetcher_builds_from_default_config() -> ApiResult<()> {
        let fetcher = HttpPageFetcher::new(&UpstreamConfig::default())?;
        assert!(fetcher.base_url.starts_with("https://"));
        Ok(())
    }
}
