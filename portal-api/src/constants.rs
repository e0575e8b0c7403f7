//! Constants for Portal API
//!
//! Defaults for every environment-driven setting, plus the advisory lock
//! keys shared by all replicas.

// ============================================================================
// ADVISORY LOCKS
// ============================================================================

/// Lock guarding the periodic refresh cycle.
pub const REFRESH_LOCK_KEY: i64 = 0xBEEFED;

/// Lock guarding the cold-start seed.
pub const SEED_LOCK_KEY: i64 = 0xC0FFEE;

// ============================================================================
// UPSTREAM
// ============================================================================

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://rickandmortyapi.com/api/character";

/// Attempts per upstream page, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_UPSTREAM_CACHE_TTL_SECS: u64 = 60;

pub const DEFAULT_UPSTREAM_CACHE_MAX: usize = 64;

/// First retry delay; doubles per attempt.
pub const BACKOFF_BASE_MS: u64 = 500;

pub const BACKOFF_CAP_MS: u64 = 8_000;

/// Upper bound of the random jitter added to each retry delay.
pub const BACKOFF_JITTER_MS: u64 = 250;

/// Longest wait honoured from an upstream `Retry-After` header.
pub const MAX_RETRY_AFTER_SECS: u64 = 60;

// ============================================================================
// PAGE CACHE
// ============================================================================

pub const DEFAULT_PAGE_CACHE_TTL_SECS: u64 = 30;

pub const DEFAULT_PAGE_CACHE_MAX: usize = 256;

// ============================================================================
// REFRESH
// ============================================================================

/// Half the staleness TTL, so one skipped or failed cycle does not yet
/// report the data stale.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

/// Age after which the data is reported stale.
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 600;

// ============================================================================
// HTTP
// ============================================================================

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 8000;

/// `Retry-After` sent with 503 responses.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

// ============================================================================
// DATABASE
// ============================================================================

pub const DEFAULT_DB_POOL_SIZE: usize = 16;

pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 5;

/// Startup wait: pings before giving up on the database.
pub const DB_WAIT_MAX_ATTEMPTS: u32 = 30;

/// Startup wait: first delay between pings; doubles per attempt.
pub const DB_WAIT_BACKOFF_START_MS: u64 = 500;

pub const DB_WAIT_BACKOFF_MAX_MS: u64 = 5_000;

/// Rows per upsert statement.
pub const UPSERT_CHUNK_SIZE: usize = 500;
