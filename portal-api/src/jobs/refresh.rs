//! Refresh Coordinator
//!
//! One refresh cycle walks every upstream page, keeps the records that pass
//! the ingest filter, upserts them in one transaction and then invalidates
//! the page cache. Cycles are serialized cluster-wide by an advisory lock:
//! a replica that cannot take the lock skips the cycle without touching the
//! upstream.
//!
//! Phases: `Idle -> Acquiring -> Running -> Releasing -> Idle`. A cycle that
//! fails to acquire or to ingest ends in `Failed`, which stays visible until
//! the next cycle starts.
//!
//! Cycle failures are logged and counted here; they never propagate to the
//! scheduler.

use chrono::Utc;
use futures_util::StreamExt;
use portal_core::{filter_records, ConfigError, Record, RefreshState};
use portal_storage::{AdvisoryLock, Lease, LockKey, RecordStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{env_flag, env_or};
use crate::constants::{
    DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_REFRESH_TTL_SECS, REFRESH_LOCK_KEY, SEED_LOCK_KEY,
};
use crate::services::RecordPageCache;
use crate::upstream::UpstreamClient;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// What to do with the records gathered before an upstream page fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialRefreshPolicy {
    /// Upsert what was gathered and log the cycle as incomplete.
    #[default]
    Proceed,
    /// Discard everything; the cycle fails.
    Abort,
}

impl FromStr for PartialRefreshPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "proceed" => Ok(Self::Proceed),
            "abort" => Ok(Self::Abort),
            other => Err(ConfigError::InvalidValue {
                field: "PORTAL_REFRESH_PARTIAL_POLICY".to_string(),
                value: other.to_string(),
                reason: "expected 'proceed' or 'abort'".to_string(),
            }),
        }
    }
}

/// Configuration for the refresh job.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between cycles (default: 5 minutes)
    pub interval: Duration,

    /// Age after which data is reported stale (default: 10 minutes)
    pub ttl: Duration,

    /// Whether this replica runs the periodic job at all (default: true)
    pub enabled: bool,

    pub partial_policy: PartialRefreshPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECS),
            enabled: true,
            partial_policy: PartialRefreshPolicy::default(),
        }
    }
}

impl RefreshConfig {
    /// Create RefreshConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PORTAL_REFRESH_INTERVAL_SECS` (default: 300)
    /// - `PORTAL_REFRESH_TTL_SECS` (default: 600)
    /// - `PORTAL_REFRESH_WORKER_ENABLED` (default: true)
    /// - `PORTAL_REFRESH_PARTIAL_POLICY`: `proceed` or `abort` (default: proceed)
    ///
    /// An unrecognised partial policy is an error rather than a silent default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let partial_policy = match std::env::var("PORTAL_REFRESH_PARTIAL_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => PartialRefreshPolicy::default(),
        };

        Ok(Self {
            interval: Duration::from_secs(env_or(
                "PORTAL_REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )),
            ttl: Duration::from_secs(env_or("PORTAL_REFRESH_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)),
            enabled: env_flag("PORTAL_REFRESH_WORKER_ENABLED", true),
            partial_policy,
        })
    }
}

// ============================================================================
// PHASES AND OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RefreshPhase {
    Idle = 0,
    Acquiring = 1,
    Running = 2,
    Releasing = 3,
    Failed = 4,
}

impl RefreshPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Acquiring,
            2 => Self::Running,
            3 => Self::Releasing,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CycleOutcome {
    /// The lock is held elsewhere, or the seed found a populated store.
    Skipped,
    Completed {
        pages: u32,
        fetched: usize,
        kept: usize,
        upserted: u64,
        /// An upstream page failed and the gathered prefix was kept.
        partial: bool,
    },
    Failed {
        kind: &'static str,
        records_processed: usize,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Completed { partial: false, .. } => "completed",
            Self::Completed { partial: true, .. } => "partial",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Cycle counters, one per outcome.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    pub cycles_completed: AtomicU64,
    pub cycles_partial: AtomicU64,
    pub cycles_skipped: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub records_upserted: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, outcome: &CycleOutcome) {
        let counter = match outcome {
            CycleOutcome::Skipped => &self.cycles_skipped,
            CycleOutcome::Completed { partial: false, .. } => &self.cycles_completed,
            CycleOutcome::Completed { partial: true, .. } => &self.cycles_partial,
            CycleOutcome::Failed { .. } => &self.cycles_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let CycleOutcome::Completed { upserted, .. } = outcome {
            self.records_upserted.fetch_add(*upserted, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_partial: self.cycles_partial.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            records_upserted: self.records_upserted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSnapshot {
    pub cycles_completed: u64,
    pub cycles_partial: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub records_upserted: u64,
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Periodic refresh: always ingest.
    Refresh,
    /// Cold start: ingest only into an empty store.
    Seed,
}

struct Failure {
    kind: &'static str,
    records_processed: usize,
}

/// Clears the in-progress flag on every exit path, cancellation included.
struct InProgress<'a>(&'a RefreshState);

impl<'a> InProgress<'a> {
    fn enter(state: &'a RefreshState) -> Self {
        state.set_in_progress(true);
        Self(state)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.set_in_progress(false);
    }
}

pub struct RefreshCoordinator<S> {
    store: Arc<S>,
    upstream: Arc<UpstreamClient>,
    page_cache: Arc<RecordPageCache>,
    state: Arc<RefreshState>,
    policy: PartialRefreshPolicy,
    phase: AtomicU8,
    metrics: Arc<RefreshMetrics>,
}

impl<S> RefreshCoordinator<S>
where
    S: RecordStore + AdvisoryLock + 'static,
{
    pub fn new(
        store: Arc<S>,
        upstream: Arc<UpstreamClient>,
        page_cache: Arc<RecordPageCache>,
        state: Arc<RefreshState>,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            page_cache,
            state,
            policy: config.partial_policy,
            phase: AtomicU8::new(RefreshPhase::Idle as u8),
            metrics: Arc::new(RefreshMetrics::new()),
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        RefreshPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> Arc<RefreshMetrics> {
        Arc::clone(&self.metrics)
    }

    /// One periodic refresh cycle under the refresh lock.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_locked(REFRESH_LOCK_KEY, Mode::Refresh).await
    }

    /// Ingest under the seed lock, but only into an empty store.
    pub async fn seed_if_empty(&self) -> CycleOutcome {
        self.run_locked(SEED_LOCK_KEY, Mode::Seed).await
    }

    fn set_phase(&self, phase: RefreshPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn finish(&self, outcome: CycleOutcome) -> CycleOutcome {
        self.set_phase(match outcome {
            CycleOutcome::Failed { .. } => RefreshPhase::Failed,
            _ => RefreshPhase::Idle,
        });
        self.metrics.record(&outcome);
        outcome
    }

    async fn run_locked(&self, key: LockKey, mode: Mode) -> CycleOutcome {
        self.set_phase(RefreshPhase::Acquiring);

        let lease = match self.store.try_acquire(key).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(key, ?mode, "refresh lock held by another replica, skipping");
                return self.finish(CycleOutcome::Skipped);
            }
            Err(err) => {
                error!(key, ?mode, kind = err.kind(), error = %err, "failed to acquire refresh lock");
                return self.finish(CycleOutcome::Failed {
                    kind: err.kind(),
                    records_processed: 0,
                });
            }
        };

        self.set_phase(RefreshPhase::Running);
        let result = {
            let _running = InProgress::enter(&self.state);
            self.ingest(mode).await
        };

        self.set_phase(RefreshPhase::Releasing);
        if let Err(err) = lease.release().await {
            warn!(key, error = %err, "failed to release refresh lock");
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                error!(
                    ?mode,
                    kind = failure.kind,
                    records_processed = failure.records_processed,
                    "refresh cycle failed"
                );
                CycleOutcome::Failed {
                    kind: failure.kind,
                    records_processed: failure.records_processed,
                }
            }
        };
        self.finish(outcome)
    }

    async fn ingest(&self, mode: Mode) -> Result<CycleOutcome, Failure> {
        if mode == Mode::Seed {
            let count = self.store.count().await.map_err(|err| {
                warn!(error = %err, "could not count records before seeding");
                Failure {
                    kind: err.kind(),
                    records_processed: 0,
                }
            })?;
            if count > 0 {
                debug!(count, "store already populated, seed skipped");
                return Ok(CycleOutcome::Skipped);
            }
        }

        let mut pages = 0u32;
        let mut fetched = 0usize;
        // Keyed by id: the upstream may shift records between pages mid-walk,
        // and one upsert must not touch the same row twice.
        let mut kept: BTreeMap<i64, Record> = BTreeMap::new();
        let mut upstream_failure = None;

        let stream = self.upstream.pages();
        futures_util::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(page) => {
                    pages += 1;
                    fetched += page.results.len();
                    for record in filter_records(&page.results) {
                        kept.insert(record.id, record);
                    }
                }
                Err(err) => {
                    upstream_failure = Some(err);
                    break;
                }
            }
        }

        let partial = upstream_failure.is_some();
        if let Some(err) = upstream_failure {
            if self.policy == PartialRefreshPolicy::Abort || pages == 0 {
                warn!(
                    page = err.page(),
                    pages,
                    kept = kept.len(),
                    error = %err,
                    "upstream failed mid-refresh, discarding gathered records"
                );
                return Err(Failure {
                    kind: err.kind(),
                    records_processed: kept.len(),
                });
            }
            warn!(
                page = err.page(),
                pages,
                kept = kept.len(),
                error = %err,
                "incomplete refresh, persisting records gathered so far"
            );
        }

        let records: Vec<Record> = kept.into_values().collect();
        let upserted = self.store.upsert(&records).await.map_err(|err| Failure {
            kind: err.kind(),
            records_processed: records.len(),
        })?;

        // Only after the upsert has committed.
        self.page_cache.clear();
        self.state.mark_refreshed(Utc::now());

        info!(
            pages,
            fetched,
            kept = records.len(),
            upserted,
            partial,
            "refresh cycle completed"
        );
        Ok(CycleOutcome::Completed {
            pages,
            fetched,
            kept: records.len(),
            upserted,
            partial,
        })
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run a refresh cycle every `config.interval` until shutdown.
///
/// The first tick fires one interval after start; the startup seed covers
/// the cold path. Missed ticks are skipped rather than bursted.
pub async fn refresh_task<S>(
    coordinator: Arc<RefreshCoordinator<S>>,
    config: RefreshConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshMetrics>
where
    S: RecordStore + AdvisoryLock + 'static,
{
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = config.interval.as_secs(),
        policy = ?config.partial_policy,
        "refresh task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("refresh task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let outcome = coordinator.run_cycle().await;
                debug!(%outcome, "refresh tick finished");
            }
        }
    }

    let metrics = coordinator.metrics();
    let snapshot = metrics.snapshot();
    info!(
        cycles_completed = snapshot.cycles_completed,
        cycles_partial = snapshot.cycles_partial,
        cycles_skipped = snapshot.cycles_skipped,
        cycles_failed = snapshot.cycles_failed,
        records_upserted = snapshot.records_upserted,
        "refresh task completed"
    );
    metrics
}
