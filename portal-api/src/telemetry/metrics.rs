//! Prometheus Metrics Definitions
//!
//! Request metrics are recorded as they happen by the middleware. Cache,
//! upstream and refresh counters live as atomics inside their components and
//! are copied into the registry when `/metrics` is scraped.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use once_cell::sync::Lazy;
use portal_core::RefreshStatus;
use portal_storage::CacheStats;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, CounterVec, Encoder, Gauge, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::jobs::RefreshSnapshot;
use crate::state::AppState;
use crate::upstream::UpstreamSnapshot;

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<PortalMetrics>> = Lazy::new(PortalMetrics::new);

fn registration(name: &str) -> impl FnOnce(prometheus::Error) -> ApiError + '_ {
    move |e| ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Raise a monotonic counter to `target`. Lower targets are ignored.
fn sync_counter(counter: &IntCounter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

/// Container for all Portal metrics.
#[derive(Clone)]
pub struct PortalMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    pub page_cache_hits_total: IntCounter,
    pub page_cache_misses_total: IntCounter,
    pub page_cache_puts_total: IntCounter,
    pub page_cache_entries: IntGauge,

    /// labels: cache (page, upstream)
    pub cache_errors_total: IntCounterVec,

    /// labels: outcome (call, retry, failure, cache_hit)
    pub upstream_requests_total: IntCounterVec,

    /// labels: outcome (completed, partial, skipped, failed)
    pub refresh_cycles_total: IntCounterVec,

    pub refresh_records_upserted_total: IntCounter,

    /// Seconds since the last successful refresh; -1 before the first one.
    pub last_refresh_age_seconds: Gauge,

    pub db_ok: IntGauge,
    pub upstream_ok: IntGauge,
}

impl PortalMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "portal_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(registration("http_requests_total"))?,

            http_request_duration_seconds: register_histogram_vec!(
                "portal_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(registration("http_request_duration_seconds"))?,

            page_cache_hits_total: register_int_counter!(
                "portal_page_cache_hits_total",
                "Listing pages served from the page cache"
            )
            .map_err(registration("page_cache_hits_total"))?,

            page_cache_misses_total: register_int_counter!(
                "portal_page_cache_misses_total",
                "Listing page lookups that missed the page cache"
            )
            .map_err(registration("page_cache_misses_total"))?,

            page_cache_puts_total: register_int_counter!(
                "portal_page_cache_puts_total",
                "Listing pages stored in the page cache"
            )
            .map_err(registration("page_cache_puts_total"))?,

            page_cache_entries: register_int_gauge!(
                "portal_page_cache_entries",
                "Listing pages currently cached"
            )
            .map_err(registration("page_cache_entries"))?,

            cache_errors_total: register_int_counter_vec!(
                "portal_cache_errors_total",
                "Internal cache failures that fell back to the backing source",
                &["cache"]
            )
            .map_err(registration("cache_errors_total"))?,

            upstream_requests_total: register_int_counter_vec!(
                "portal_upstream_requests_total",
                "Upstream page requests by outcome",
                &["outcome"]
            )
            .map_err(registration("upstream_requests_total"))?,

            refresh_cycles_total: register_int_counter_vec!(
                "portal_refresh_cycles_total",
                "Refresh cycles by outcome",
                &["outcome"]
            )
            .map_err(registration("refresh_cycles_total"))?,

            refresh_records_upserted_total: register_int_counter!(
                "portal_refresh_records_upserted_total",
                "Rows written by refresh cycles"
            )
            .map_err(registration("refresh_records_upserted_total"))?,

            last_refresh_age_seconds: register_gauge!(
                "portal_last_refresh_age_seconds",
                "Seconds since the last successful refresh, -1 if none yet"
            )
            .map_err(registration("last_refresh_age_seconds"))?,

            db_ok: register_int_gauge!("portal_db_ok", "1 if the last store check succeeded")
                .map_err(registration("db_ok"))?,

            upstream_ok: register_int_gauge!(
                "portal_upstream_ok",
                "1 if the last upstream probe succeeded"
            )
            .map_err(registration("upstream_ok"))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn observe_page_cache(&self, stats: &CacheStats) {
        sync_counter(&self.page_cache_hits_total, stats.hits);
        sync_counter(&self.page_cache_misses_total, stats.misses);
        sync_counter(&self.page_cache_puts_total, stats.puts);
        sync_counter(&self.cache_errors_total.with_label_values(&["page"]), stats.errors);
        self.page_cache_entries
            .set(i64::try_from(stats.entries).unwrap_or(i64::MAX));
    }

    pub fn observe_upstream(&self, snapshot: &UpstreamSnapshot) {
        let outcomes = [
            ("call", snapshot.calls),
            ("retry", snapshot.retries),
            ("failure", snapshot.failures),
            ("cache_hit", snapshot.cache_hits),
        ];
        for (outcome, value) in outcomes {
            sync_counter(&self.upstream_requests_total.with_label_values(&[outcome]), value);
        }
        sync_counter(
            &self.cache_errors_total.with_label_values(&["upstream"]),
            snapshot.cache.errors,
        );
    }

    pub fn observe_refresh(&self, snapshot: &RefreshSnapshot, status: &RefreshStatus) {
        let outcomes = [
            ("completed", snapshot.cycles_completed),
            ("partial", snapshot.cycles_partial),
            ("skipped", snapshot.cycles_skipped),
            ("failed", snapshot.cycles_failed),
        ];
        for (outcome, value) in outcomes {
            sync_counter(&self.refresh_cycles_total.with_label_values(&[outcome]), value);
        }
        sync_counter(&self.refresh_records_upserted_total, snapshot.records_upserted);
        self.last_refresh_age_seconds
            .set(status.age_seconds.unwrap_or(-1.0));
    }

    pub fn set_health(&self, db_ok: bool, upstream_ok: bool) {
        self.db_ok.set(i64::from(db_ok));
        self.upstream_ok.set(i64::from(upstream_ok));
    }

    /// Copy every component snapshot held by `state` into the registry.
    pub fn sync(&self, state: &AppState) {
        self.observe_page_cache(&state.records.cache_stats());
        self.observe_upstream(&state.upstream.snapshot());
        self.observe_refresh(
            &state.refresh_metrics.snapshot(),
            &state.refresh.status(Utc::now()),
        );
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match METRICS.as_ref() {
        Ok(metrics) => metrics.sync(&state),
        Err(e) => tracing::warn!(error = %e, "metrics registry unavailable"),
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
