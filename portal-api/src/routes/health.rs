//! Health Check Endpoints
//!
//! - /healthcheck - store and upstream reachability plus refresh freshness
//! - /health/live - process alive check
//!
//! Both always answer 200; callers read `status` to tell ok from degraded.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::telemetry::METRICS;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthcheckResponse {
    pub status: HealthStatus,
    pub db_ok: bool,
    pub upstream_ok: bool,
    /// Zero when the store is unreachable.
    pub character_count: u64,
    /// Seconds since the last successful refresh; null before the first one.
    pub last_refresh_age: Option<f64>,
    pub stale: bool,
    pub refresh_in_progress: bool,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /healthcheck
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthcheckResponse> {
    let (count, upstream_ok) = tokio::join!(state.store.count(), state.upstream.probe());

    let (db_ok, character_count) = match count {
        Ok(count) => (true, count),
        Err(err) => {
            tracing::warn!(error = %err, "healthcheck store probe failed");
            (false, 0)
        }
    };

    let refresh = state.refresh.status(Utc::now());

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.set_health(db_ok, upstream_ok);
    }

    Json(HealthcheckResponse {
        status: if db_ok && upstream_ok {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        },
        db_ok,
        upstream_ok,
        character_count,
        last_refresh_age: refresh.age_seconds,
        stale: refresh.stale,
        refresh_in_progress: refresh.in_progress,
    })
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/health/live", get(liveness))
}
