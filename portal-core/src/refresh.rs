//! Refresh bookkeeping
//!
//! [`RefreshState`] is the single source of truth for "when did the store
//! last receive upstream data". It is shared by handle between the refresh
//! job (the only writer) and health/metrics readers.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

const NEVER: i64 = i64::MIN;

/// Last-successful-refresh timestamp, in-progress flag and staleness threshold.
#[derive(Debug)]
pub struct RefreshState {
    last_refresh_ms: AtomicI64,
    in_progress: AtomicBool,
    ttl: Duration,
}

impl RefreshState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            last_refresh_ms: AtomicI64::new(NEVER),
            in_progress: AtomicBool::new(false),
            ttl,
        }
    }

    /// Staleness threshold.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        match self.last_refresh_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Record a successful (possibly partial) ingest.
    pub fn mark_refreshed(&self, at: DateTime<Utc>) {
        self.last_refresh_ms
            .store(at.timestamp_millis(), Ordering::Release);
    }

    /// Set the in-progress flag, returning the previous value.
    pub fn set_in_progress(&self, value: bool) -> bool {
        self.in_progress.swap(value, Ordering::AcqRel)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Time since the last refresh, or `None` if there never was one.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_refresh_at()
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Never refreshed, or last refresh older than the threshold.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.age(now) {
            Some(age) => age > self.ttl,
            None => true,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> RefreshStatus {
        RefreshStatus {
            last_refresh_at: self.last_refresh_at(),
            age_seconds: self
                .age(now)
                .map(|age| (age.as_secs_f64() * 100.0).round() / 100.0),
            stale: self.is_stale(now),
            in_progress: self.is_in_progress(),
        }
    }
}

/// Point-in-time view of [`RefreshState`] for health collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<f64>,
    pub stale: bool,
    pub in_progress: bool,
}
