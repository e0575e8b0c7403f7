//! Refresh coordinator behaviour across replicas, failures and policies.

mod support;

use std::time::Duration;

use portal_api::constants::{REFRESH_LOCK_KEY, SEED_LOCK_KEY};
use portal_api::jobs::RefreshPhase;
use portal_api::{CycleOutcome, PartialRefreshPolicy, RefreshConfig};
use portal_test_utils::fixtures::{earth_human, earth_humans, stored_records};
use portal_test_utils::{FlakyStore, InMemoryStore, RecordStore, ScriptedFetcher, StoreError, UpstreamError};
use support::{in_memory, Replica};

fn fatal(page: u32) -> UpstreamError {
    UpstreamError::Fatal {
        page,
        status: Some(500),
        reason: "Internal Server Error".to_string(),
    }
}

fn with_policy(policy: PartialRefreshPolicy) -> RefreshConfig {
    RefreshConfig {
        partial_policy: policy,
        ..RefreshConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_invalidates_cached_pages() {
    let first = in_memory(ScriptedFetcher::from_records(earth_humans(3), 20));
    assert!(matches!(
        first.coordinator.run_cycle().await,
        CycleOutcome::Completed { .. }
    ));

    let before = first.service.list_records("id", "asc", 1, 20).await.unwrap();
    assert_eq!(before.records[0].name, "Human 0001");
    assert_eq!(before.total_count, 3);

    let mut renamed = earth_humans(4);
    renamed[0] = earth_human(1, "Rick Sanchez");
    let second = first.with_upstream(
        ScriptedFetcher::from_records(renamed, 20),
        &RefreshConfig::default(),
    );
    assert!(matches!(
        second.coordinator.run_cycle().await,
        CycleOutcome::Completed { .. }
    ));

    let after = first.service.list_records("id", "asc", 1, 20).await.unwrap();
    assert_eq!(after.total_count, 4);
    assert_eq!(after.records[0].name, "Rick Sanchez");
    assert_eq!(first.page_cache.stats().misses, 2);
}

#[tokio::test(start_paused = true)]
async fn only_one_replica_refreshes_at_a_time() {
    let store = InMemoryStore::new();
    let a = Replica::new(
        store.clone(),
        ScriptedFetcher::from_records(earth_humans(10), 20).with_delay(Duration::from_secs(1)),
        &RefreshConfig::default(),
    );
    let b = Replica::new(
        store.clone(),
        ScriptedFetcher::from_records(earth_humans(10), 20).with_delay(Duration::from_secs(1)),
        &RefreshConfig::default(),
    );

    let (outcome_a, outcome_b) = tokio::join!(a.coordinator.run_cycle(), b.coordinator.run_cycle());

    let runs = [(&outcome_a, &a), (&outcome_b, &b)];
    let completed: Vec<_> = runs
        .iter()
        .filter(|(outcome, _)| matches!(outcome, CycleOutcome::Completed { .. }))
        .collect();
    let skipped: Vec<_> = runs
        .iter()
        .filter(|(outcome, _)| **outcome == CycleOutcome::Skipped)
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].1.fetcher.calls(), 0);
    assert_eq!(completed[0].1.fetcher.calls(), 1);
    assert!(!store.locks().is_locked(REFRESH_LOCK_KEY));
}

#[tokio::test(start_paused = true)]
async fn proceed_policy_keeps_pages_gathered_before_a_failure() {
    let fetcher = ScriptedFetcher::from_records(earth_humans(60), 20);
    fetcher.fail_page(3, fatal(3), 1);
    let replica = Replica::new(
        InMemoryStore::new(),
        fetcher,
        &with_policy(PartialRefreshPolicy::Proceed),
    );

    let outcome = replica.coordinator.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Completed {
            pages: 2,
            fetched: 40,
            kept: 40,
            upserted: 40,
            partial: true,
        }
    );
    assert_eq!(replica.store.count().await.unwrap(), 40);
    assert!(replica.refresh.last_refresh_at().is_some());
    assert_eq!(replica.refresh_metrics().snapshot().cycles_partial, 1);
}

#[tokio::test(start_paused = true)]
async fn abort_policy_discards_a_partial_walk() {
    let fetcher = ScriptedFetcher::from_records(earth_humans(60), 20);
    fetcher.fail_page(3, fatal(3), 1);
    let replica = Replica::new(
        InMemoryStore::new(),
        fetcher,
        &with_policy(PartialRefreshPolicy::Abort),
    );

    let outcome = replica.coordinator.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            kind: "fatal",
            records_processed: 40,
        }
    );
    assert_eq!(replica.store.count().await.unwrap(), 0);
    assert!(replica.refresh.last_refresh_at().is_none());
    assert_eq!(replica.coordinator.phase(), RefreshPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn seed_runs_only_against_an_empty_store() {
    let replica = in_memory(ScriptedFetcher::from_records(earth_humans(25), 20));

    assert!(matches!(
        replica.coordinator.seed_if_empty().await,
        CycleOutcome::Completed { upserted: 25, .. }
    ));
    let calls = replica.fetcher.calls();

    assert_eq!(replica.coordinator.seed_if_empty().await, CycleOutcome::Skipped);
    assert_eq!(replica.fetcher.calls(), calls);
    assert!(!replica.store.locks().is_locked(SEED_LOCK_KEY));
}

#[tokio::test(start_paused = true)]
async fn seed_and_refresh_use_separate_locks() {
    let replica = in_memory(ScriptedFetcher::from_records(earth_humans(5), 20));
    let _held = replica.store.locks().try_lock(REFRESH_LOCK_KEY);

    assert!(matches!(
        replica.coordinator.seed_if_empty().await,
        CycleOutcome::Completed { .. }
    ));
    assert_eq!(replica.coordinator.run_cycle().await, CycleOutcome::Skipped);
}

#[tokio::test(start_paused = true)]
async fn failed_upsert_releases_the_lock_and_keeps_the_cache() {
    let store = FlakyStore::new(InMemoryStore::new());
    store.fail_upserts(Some(StoreError::transient("upsert", "connection reset")));
    let replica = Replica::new(
        store,
        ScriptedFetcher::from_records(earth_humans(5), 20),
        &RefreshConfig::default(),
    );
    replica.store.inner().upsert(&stored_records(2)).await.unwrap();
    replica.service.list_records("id", "asc", 1, 20).await.unwrap();

    let outcome = replica.coordinator.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            kind: "transient",
            records_processed: 5,
        }
    );
    assert!(!replica.store.inner().locks().is_locked(REFRESH_LOCK_KEY));
    assert!(!replica.refresh.is_in_progress());
    assert_eq!(replica.page_cache.stats().entries, 1);

    replica.store.fail_upserts(None);
    assert!(matches!(
        replica.coordinator.run_cycle().await,
        CycleOutcome::Completed { upserted: 5, .. }
    ));
    assert_eq!(replica.page_cache.stats().entries, 0);
}
