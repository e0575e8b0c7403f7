//! PostgreSQL Store Adapter
//!
//! Connection pooling via deadpool-postgres, the `characters` table
//! bootstrap, the [`RecordStore`] implementation and session-scoped advisory
//! locks.
//!
//! Error classification: anything that may succeed on retry (lost
//! connection, pool timeout, admin shutdown, serialization failure, query
//! cancel) becomes [`StoreError::Transient`]; everything else is
//! [`StoreError::Fatal`].

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime, Timeouts,
};
use portal_core::{PageQuery, PageSlice, Record, StoreError, StoreResult};
use portal_storage::{AdvisoryLock, Lease, LockKey, RecordStore};
use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, warn};

use crate::config::{env_flag, env_or};
use crate::constants::{
    DB_WAIT_BACKOFF_MAX_MS, DB_WAIT_BACKOFF_START_MS, DB_WAIT_MAX_ATTEMPTS, DEFAULT_DB_POOL_SIZE,
    DEFAULT_DB_TIMEOUT_SECS, UPSERT_CHUNK_SIZE,
};
use crate::error::{ApiError, ApiResult};
use crate::upstream::RetryPolicy;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Bound on pool wait, connection create and recycle
    pub timeout: Duration,
    /// Poll the server at startup until it answers (default: off)
    pub wait_for_db: bool,
    /// Attempts and backoff for the startup wait
    pub wait: RetryPolicy,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "rickmorty".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
            wait_for_db: false,
            wait: RetryPolicy {
                max_attempts: DB_WAIT_MAX_ATTEMPTS,
                base: Duration::from_millis(DB_WAIT_BACKOFF_START_MS),
                cap: Duration::from_millis(DB_WAIT_BACKOFF_MAX_MS),
                jitter: Duration::ZERO,
            },
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// The startup wait reads `PORTAL_DB_WAIT_FOR_DB`,
    /// `PORTAL_DB_WAIT_MAX_ATTEMPTS` (30), `PORTAL_DB_WAIT_BACKOFF_START_MS`
    /// (500) and `PORTAL_DB_WAIT_BACKOFF_MAX_MS` (5000).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let wait = RetryPolicy {
            max_attempts: env_or("PORTAL_DB_WAIT_MAX_ATTEMPTS", defaults.wait.max_attempts),
            base: Duration::from_millis(env_or(
                "PORTAL_DB_WAIT_BACKOFF_START_MS",
                DB_WAIT_BACKOFF_START_MS,
            )),
            cap: Duration::from_millis(env_or("PORTAL_DB_WAIT_BACKOFF_MAX_MS", DB_WAIT_BACKOFF_MAX_MS)),
            jitter: Duration::ZERO,
        };
        Self {
            host: std::env::var("PORTAL_DB_HOST").unwrap_or(defaults.host),
            port: env_or("PORTAL_DB_PORT", defaults.port),
            dbname: std::env::var("PORTAL_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("PORTAL_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("PORTAL_DB_PASSWORD").unwrap_or(defaults.password),
            max_size: env_or("PORTAL_DB_POOL_SIZE", defaults.max_size),
            timeout: Duration::from_secs(env_or("PORTAL_DB_TIMEOUT_SECS", DEFAULT_DB_TIMEOUT_SECS)),
            wait_for_db: env_flag("PORTAL_DB_WAIT_FOR_DB", false),
            wait,
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// Every pool wait is bounded, so exhaustion surfaces as a transient
    /// error instead of a hung request.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..PoolConfig::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// SQLSTATE codes worth retrying.
fn is_transient_state(state: &SqlState) -> bool {
    let code = state.code();
    // Class 08: connection exception. Class 53: insufficient resources.
    code.starts_with("08")
        || code.starts_with("53")
        || *state == SqlState::ADMIN_SHUTDOWN
        || *state == SqlState::CRASH_SHUTDOWN
        || *state == SqlState::CANNOT_CONNECT_NOW
        || *state == SqlState::T_R_SERIALIZATION_FAILURE
        || *state == SqlState::T_R_DEADLOCK_DETECTED
        || *state == SqlState::QUERY_CANCELED
}

/// Map a driver error onto the store taxonomy.
pub fn classify_pg_error(operation: &str, err: &tokio_postgres::Error) -> StoreError {
    if err.is_closed() {
        return StoreError::transient(operation, "connection closed");
    }
    if let Some(db) = err.as_db_error() {
        return if is_transient_state(db.code()) {
            StoreError::transient(operation, db.message())
        } else {
            StoreError::fatal(operation, format!("{} ({})", db.message(), db.code().code()))
        };
    }
    // No SQLSTATE: an I/O failure talking to the server is retryable,
    // conversion and protocol errors are not.
    let io_failure = err
        .source()
        .is_some_and(|source| source.downcast_ref::<std::io::Error>().is_some());
    if io_failure {
        StoreError::transient(operation, err.to_string())
    } else {
        StoreError::fatal(operation, err.to_string())
    }
}

/// Map a pool checkout error onto the store taxonomy.
pub fn classify_pool_error(err: &PoolError) -> StoreError {
    match err {
        PoolError::Timeout(kind) => {
            StoreError::transient("acquire", format!("pool timeout ({:?})", kind))
        }
        PoolError::Closed => StoreError::transient("acquire", "pool closed"),
        PoolError::Backend(e) => classify_pg_error("acquire", e),
        other => StoreError::fatal("acquire", other.to_string()),
    }
}

// ============================================================================
// STARTUP WAIT
// ============================================================================

/// Ping `store` until it answers, backing off between attempts.
///
/// Only transient failures are retried; a fatal one (bad credentials, missing
/// database) is returned at once. Returns the number of attempts used.
pub async fn wait_for_store<S>(store: &S, policy: &RetryPolicy) -> StoreResult<u32>
where
    S: RecordStore + ?Sized,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match store.ping().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(attempts = attempt, "database is ready");
                }
                return Ok(attempt);
            }
            Err(err) => err,
        };
        if !err.is_transient() || attempt >= policy.max_attempts {
            warn!(attempts = attempt, error = %err, "database not ready, giving up");
            return Err(err);
        }
        let delay = policy.delay(attempt, None);
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "waiting for database"
        );
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS characters (
        id      BIGINT PRIMARY KEY,
        name    TEXT NOT NULL,
        status  TEXT NOT NULL,
        species TEXT NOT NULL,
        origin  TEXT NOT NULL,
        image   TEXT,
        url     TEXT
    );
    CREATE INDEX IF NOT EXISTS characters_name_id_idx ON characters (name, id);
";

const UPSERT: &str = "
    INSERT INTO characters (id, name, status, species, origin, image, url)
    SELECT * FROM UNNEST(
        $1::BIGINT[], $2::TEXT[], $3::TEXT[], $4::TEXT[], $5::TEXT[], $6::TEXT[], $7::TEXT[]
    )
    ON CONFLICT (id) DO UPDATE SET
        name = EXCLUDED.name,
        status = EXCLUDED.status,
        species = EXCLUDED.species,
        origin = EXCLUDED.origin,
        image = EXCLUDED.image,
        url = EXCLUDED.url
";

// ============================================================================
// STORE
// ============================================================================

/// [`RecordStore`] over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create the table and index if they are missing.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        debug!("characters schema ready");
        Ok(())
    }

    async fn connection(&self, operation: &str) -> StoreResult<Object> {
        self.pool.get().await.map_err(|err| match classify_pool_error(&err) {
            StoreError::Transient { reason, .. } => StoreError::transient(operation, reason),
            StoreError::Fatal { reason, .. } => StoreError::fatal(operation, reason),
            other => other,
        })
    }
}

/// One row per id, last occurrence winning. A single `ON CONFLICT` statement
/// cannot affect the same row twice.
fn last_per_id(records: &[Record]) -> Vec<&Record> {
    let mut latest = BTreeMap::new();
    for record in records {
        latest.insert(record.id, record);
    }
    latest.into_values().collect()
}

fn record_from_row(row: &Row) -> StoreResult<Record> {
    let decode = |err: tokio_postgres::Error| StoreError::fatal("decode", err.to_string());
    Ok(Record {
        id: row.try_get("id").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        status: row.try_get("status").map_err(decode)?,
        species: row.try_get("species").map_err(decode)?,
        origin_name: row.try_get("origin").map_err(decode)?,
        image: row.try_get("image").map_err(decode)?,
        url: row.try_get("url").map_err(decode)?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn upsert(&self, records: &[Record]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let pg = |err: tokio_postgres::Error| classify_pg_error("upsert", &err);

        let records = last_per_id(records);
        let mut client = self.connection("upsert").await?;
        let tx = client.transaction().await.map_err(pg)?;
        let mut affected = 0;
        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            let ids: Vec<i64> = chunk.iter().map(|r| r.id).collect();
            let names: Vec<&str> = chunk.iter().map(|r| r.name.as_str()).collect();
            let statuses: Vec<&str> = chunk.iter().map(|r| r.status.as_str()).collect();
            let species: Vec<&str> = chunk.iter().map(|r| r.species.as_str()).collect();
            let origins: Vec<&str> = chunk.iter().map(|r| r.origin_name.as_str()).collect();
            let images: Vec<Option<&str>> = chunk.iter().map(|r| r.image.as_deref()).collect();
            let urls: Vec<Option<&str>> = chunk.iter().map(|r| r.url.as_deref()).collect();

            affected += tx
                .execute(
                    UPSERT,
                    &[&ids, &names, &statuses, &species, &origins, &images, &urls],
                )
                .await
                .map_err(pg)?;
        }
        tx.commit().await.map_err(pg)?;
        Ok(affected)
    }

    async fn query(&self, query: &PageQuery) -> StoreResult<PageSlice> {
        let pg = |err: tokio_postgres::Error| classify_pg_error("query", &err);
        let limit = i64::from(query.page_size());
        let offset = i64::try_from(query.offset())
            .map_err(|_| StoreError::invalid_query("page offset out of range"))?;
        // Sort column and direction come from closed enums, never from input.
        let select = format!(
            "SELECT id, name, status, species, origin, image, url FROM characters \
             ORDER BY {col} {dir}, id {dir} LIMIT $1 OFFSET $2",
            col = query.sort().as_str(),
            dir = query.order().as_str().to_uppercase(),
        );

        let mut client = self.connection("query").await?;
        let tx = client.transaction().await.map_err(pg)?;
        tx.batch_execute("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await
            .map_err(pg)?;
        let total: i64 = tx
            .query_one("SELECT COUNT(*) FROM characters", &[])
            .await
            .map_err(pg)?
            .try_get(0)
            .map_err(pg)?;
        let rows = tx.query(&select, &[&limit, &offset]).await.map_err(pg)?;
        tx.commit().await.map_err(pg)?;

        let records = rows.iter().map(record_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok(PageSlice::new(records, total.max(0) as u64, query))
    }

    async fn count(&self) -> StoreResult<u64> {
        let client = self.connection("count").await?;
        let total: i64 = client
            .query_one("SELECT COUNT(*) FROM characters", &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|err| classify_pg_error("count", &err))?;
        Ok(total.max(0) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        let client = self.connection("ping").await?;
        client
            .simple_query("SELECT 1")
            .await
            .map(drop)
            .map_err(|err| classify_pg_error("ping", &err))
    }
}

// ============================================================================
// ADVISORY LOCKS
// ============================================================================

/// A session-scoped `pg_try_advisory_lock` pinned to one pooled connection.
///
/// The lock lives as long as the session. If the lease is dropped without a
/// successful unlock, the connection is detached from the pool and closed so
/// the server frees the lock when the session ends.
pub struct PgLease {
    key: LockKey,
    conn: Option<Object>,
}

impl PgLease {
    fn discard(conn: Object) {
        drop(Object::take(conn));
    }
}

#[async_trait]
impl Lease for PgLease {
    fn key(&self) -> LockKey {
        self.key
    }

    async fn release(mut self) -> StoreResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let unlocked = conn
            .query_one("SELECT pg_advisory_unlock($1)", &[&self.key])
            .await
            .and_then(|row| row.try_get::<_, bool>(0));
        match unlocked {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(key = self.key, "advisory lock was not held at release");
                Ok(())
            }
            Err(err) => {
                Self::discard(conn);
                Err(classify_pg_error("unlock", &err))
            }
        }
    }
}

impl Drop for PgLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(key = self.key, "lease dropped without release, closing its session");
            Self::discard(conn);
        }
    }
}

#[async_trait]
impl AdvisoryLock for PgStore {
    type Lease = PgLease;

    async fn try_acquire(&self, key: LockKey) -> StoreResult<Option<PgLease>> {
        let conn = self.connection("lock").await?;
        let acquired: bool = conn
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|err| classify_pg_error("lock", &err))?;
        Ok(acquired.then(|| PgLease {
            key,
            conn: Some(conn),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_test_utils::{FlakyStore, InMemoryStore};

    #[test]
    fn test_transient_sql_states() {
        assert!(is_transient_state(&SqlState::CONNECTION_FAILURE));
        assert!(is_transient_state(&SqlState::TOO_MANY_CONNECTIONS));
        assert!(is_transient_state(&SqlState::ADMIN_SHUTDOWN));
        assert!(is_transient_state(&SqlState::T_R_SERIALIZATION_FAILURE));
        assert!(is_transient_state(&SqlState::QUERY_CANCELED));

        assert!(!is_transient_state(&SqlState::UNIQUE_VIOLATION));
        assert!(!is_transient_state(&SqlState::UNDEFINED_TABLE));
        assert!(!is_transient_state(&SqlState::SYNTAX_ERROR));
    }

    #[test]
    fn test_upsert_batch_keeps_last_occurrence_per_id() {
        let mut records = portal_test_utils::fixtures::stored_records(3);
        let mut renamed = records[0].clone();
        renamed.name = "Rick Sanchez".to_string();
        records.push(renamed);

        let rows = last_per_id(&records);
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rows[0].name, "Rick Sanchez");
    }

    #[test]
    fn test_pool_closed_is_transient() {
        assert!(classify_pool_error(&PoolError::Closed).is_transient());
    }

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.dbname, "rickmorty");
        assert_eq!(config.max_size, 16);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    fn wait_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..DbConfig::default().wait
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_store_retries_until_ready() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.fail_pings(Some(StoreError::transient("ping", "connection refused")));

        let started = tokio::time::Instant::now();
        let recover = async {
            tokio::time::sleep(Duration::from_millis(1_200)).await;
            store.fail_pings(None);
        };
        let policy = wait_policy(30);
        let (attempts, ()) = tokio::join!(wait_for_store(&store, &policy), recover);

        // Pings at 0, 0.5 s and 1.5 s; the third succeeds.
        assert_eq!(attempts.unwrap(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert!(started.elapsed() < Duration::from_millis(1_600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_store_is_bounded() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.fail_pings(Some(StoreError::transient("ping", "connection refused")));

        let started = tokio::time::Instant::now();
        let err = wait_for_store(&store, &wait_policy(4)).await.unwrap_err();
        assert!(err.is_transient());
        // 0.5 + 1 + 2 seconds between four attempts.
        assert!(started.elapsed() >= Duration::from_millis(3_500));
        assert!(started.elapsed() < Duration::from_millis(3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_store_gives_up_on_fatal() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.fail_pings(Some(StoreError::fatal("ping", "password authentication failed")));

        let started = tokio::time::Instant::now();
        let err = wait_for_store(&store, &wait_policy(30)).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[test]
    fn test_wait_is_opt_in() {
        let config = DbConfig::default();
        assert!(!config.wait_for_db);
        assert_eq!(config.wait.max_attempts, 30);
        assert_eq!(config.wait.backoff(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() -> ApiResult<()> {
        // No server needed: connections are only opened on checkout.
        let pool = DbConfig::default().create_pool()?;
        assert_eq!(pool.status().max_size, 16);
        Ok(())
    }
}
