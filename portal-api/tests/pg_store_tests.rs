//! PostgreSQL adapter tests. Require `--features db-tests` and `DB_TESTS=1`.

#![cfg(feature = "db-tests")]

mod support;

use portal_api::ApiResult;
use portal_core::PageQuery;
use portal_test_utils::fixtures::stored_records;
use portal_test_utils::{AdvisoryLock, Lease, RecordStore};
use support::db::{db_tests_enabled, test_store};

const TEST_LOCK_KEY: i64 = 0x7E57;

#[tokio::test]
async fn upsert_twice_leaves_one_row_per_id() -> ApiResult<()> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let store = test_store().await?;
    let records = stored_records(12);

    store.upsert(&records).await?;
    let before = store.count().await?;
    store.upsert(&records).await?;
    assert_eq!(store.count().await?, before);

    let page = store.query(&PageQuery::parse("id", "asc", 1, 5)?).await?;
    assert_eq!(page.records.len(), 5);
    assert!(page.total_count >= 12);
    Ok(())
}

#[tokio::test]
async fn repeated_id_in_one_batch_keeps_last() -> ApiResult<()> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let store = test_store().await?;
    let mut first = stored_records(1).remove(0);
    first.id = 900_001;
    let mut last = first.clone();
    last.name = "Rick Sanchez (batch)".to_string();

    let written = store.upsert(&[first, last]).await?;
    assert_eq!(written, 1);

    let page = store.query(&PageQuery::parse("id", "desc", 1, 1)?).await?;
    assert_eq!(page.records[0].id, 900_001);
    assert_eq!(page.records[0].name, "Rick Sanchez (batch)");
    Ok(())
}

#[tokio::test]
async fn advisory_lock_excludes_a_second_session() -> ApiResult<()> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let store = test_store().await?;

    let lease = store.try_acquire(TEST_LOCK_KEY).await?;
    assert!(lease.is_some());
    assert!(store.try_acquire(TEST_LOCK_KEY).await?.is_none());

    if let Some(lease) = lease {
        lease.release().await?;
    }
    let again = store.try_acquire(TEST_LOCK_KEY).await?;
    assert!(again.is_some());
    if let Some(lease) = again {
        lease.release().await?;
    }
    Ok(())
}

#[tokio::test]
async fn ping_reaches_the_database() -> ApiResult<()> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let store = test_store().await?;
    store.ping().await?;
    Ok(())
}
