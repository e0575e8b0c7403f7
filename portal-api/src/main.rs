//! Portal API Server Entry Point
//!
//! Bootstraps configuration, optionally waits for the database, prepares the
//! schema, seeds an empty store, starts the refresh job and serves HTTP until
//! ctrl-c.

use std::sync::Arc;

use portal_api::db::wait_for_store;
use portal_api::telemetry::{init_tracing, TelemetryConfig};
use portal_api::{
    create_router, refresh_task, ApiError, ApiResult, AppState, HttpPageFetcher, PgStore,
    PortalConfig, RecordService, RefreshCoordinator, UpstreamClient,
};
use portal_core::RefreshState;
use portal_storage::RecordStore;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = PortalConfig::from_env()?;

    let store = Arc::new(PgStore::from_config(&config.db)?);
    if config.db.wait_for_db {
        wait_for_store(store.as_ref(), &config.db.wait).await?;
    }
    store.ensure_schema().await?;

    let fetcher = Arc::new(HttpPageFetcher::new(&config.upstream)?);
    let upstream = Arc::new(UpstreamClient::new(fetcher, &config.upstream));
    let page_cache =
        RecordService::page_cache(config.api.page_cache_max, config.api.page_cache_ttl);
    let refresh_state = Arc::new(RefreshState::new(config.refresh.ttl));

    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&upstream),
        Arc::clone(&page_cache),
        Arc::clone(&refresh_state),
        &config.refresh,
    ));

    // A failed seed is logged by the coordinator; the server still starts and
    // serves whatever the store already holds.
    let seed = coordinator.seed_if_empty().await;
    tracing::info!(outcome = %seed, "startup seed finished");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = if config.refresh.enabled {
        Some(tokio::spawn(refresh_task(
            Arc::clone(&coordinator),
            config.refresh.clone(),
            shutdown_rx,
        )))
    } else {
        tracing::info!("refresh worker disabled");
        None
    };

    let records_store: Arc<dyn RecordStore> = store;
    let state = AppState {
        records: Arc::new(RecordService::new(
            Arc::clone(&records_store),
            page_cache,
            Arc::clone(&refresh_state),
        )),
        store: records_store,
        upstream,
        refresh: refresh_state,
        refresh_metrics: coordinator.metrics(),
    };
    let app = create_router(state);

    let addr = config.api.bind_addr();
    tracing::info!(%addr, "Starting Portal API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "refresh task ended abnormally");
        }
    }

    Ok(())
}
