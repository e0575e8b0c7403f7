//! Portal API - Caching Read-Through Proxy
//!
//! Serves a paginated character listing from PostgreSQL through an in-process
//! page cache, while a background refresh job keeps the table in sync with the
//! upstream API. Replicas coordinate refreshes with a PostgreSQL advisory lock
//! so only one of them talks to the upstream at a time.

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod upstream;

// Re-export commonly used types
pub use config::{ApiConfig, PortalConfig};
pub use db::{DbConfig, PgLease, PgStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{
    refresh_task, CycleOutcome, PartialRefreshPolicy, RefreshConfig, RefreshCoordinator,
    RefreshMetrics,
};
pub use routes::create_router;
pub use services::{RecordPage, RecordPageCache, RecordService};
pub use state::AppState;
pub use upstream::{HttpPageFetcher, UpstreamClient, UpstreamConfig};
