use portal_api::{ApiResult, DbConfig, PgStore};

/// PostgreSQL-backed tests run only with `--features db-tests` and `DB_TESTS=1`.
pub fn db_tests_enabled() -> bool {
    std::env::var("DB_TESTS").map(|v| v == "1").unwrap_or(false)
}

pub async fn test_store() -> ApiResult<PgStore> {
    let store = PgStore::from_config(&DbConfig::from_env())?;
    store.ensure_schema().await?;
    Ok(store)
}
