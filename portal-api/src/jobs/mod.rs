//! Background Jobs for Portal API
//!
//! - `refresh`: keeps the store in sync with the upstream API, one replica
//!   at a time, and seeds an empty store at startup.
//!
//! # Usage
//!
//! ```ignore
//! use portal_api::jobs::{refresh_task, RefreshConfig, RefreshCoordinator};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let coordinator = Arc::new(RefreshCoordinator::new(store, upstream, cache, state, &config));
//! coordinator.seed_if_empty().await;
//! tokio::spawn(refresh_task(coordinator, config, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod refresh;

pub use refresh::{
    refresh_task, CycleOutcome, PartialRefreshPolicy, RefreshConfig, RefreshCoordinator,
    RefreshMetrics, RefreshPhase, RefreshSnapshot,
};
