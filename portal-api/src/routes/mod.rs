//! REST API Routes Module
//!
//! - `GET /characters` - paginated, sorted listing served through the page cache
//! - `GET /healthcheck` - deep health (store, upstream, refresh freshness)
//! - `GET /health/live` - process liveness
//! - `GET /metrics` - Prometheus exposition
//! - `GET /` - redirect to the listing

pub mod characters;
pub mod health;

use axum::{middleware, response::Redirect, routing::get, Router};

use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use characters::create_router as characters_router;
pub use health::create_router as health_router;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/characters") }))
        .route("/metrics", get(metrics_handler))
        .merge(characters_router())
        .merge(health_router())
        .layer(middleware::from_fn(observability_middleware))
        .with_state(state)
}
