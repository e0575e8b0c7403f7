//! Property-Based Tests for Refresh Ingest
//!
//! For any upstream payload, a completed refresh followed by a listing
//! returns exactly the records the ingest filter keeps, one row per id, with
//! the last upstream occurrence of an id winning.

mod support;

use std::collections::BTreeMap;

use portal_api::CycleOutcome;
use portal_core::MAX_PAGE_SIZE;
use portal_test_utils::generators::{arb_origin_name, arb_raw_records};
use portal_test_utils::{filter_records, RawRecord, Record, ScriptedFetcher};
use proptest::prelude::*;
use support::in_memory;

fn expected_rows(upstream: &[RawRecord]) -> Vec<Record> {
    let mut rows = BTreeMap::new();
    for record in filter_records(upstream) {
        rows.insert(record.id, record);
    }
    rows.into_values().collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_refresh_persists_exactly_the_filtered_records(
        records in arb_raw_records(60),
        page_size in 1usize..25,
    ) {
        let expected = expected_rows(&records);
        let replica = in_memory(ScriptedFetcher::from_records(records, page_size));

        let rt = runtime();
        rt.block_on(async {
            let outcome = replica.coordinator.run_cycle().await;
            match outcome {
                CycleOutcome::Completed { kept, partial, .. } => {
                    prop_assert_eq!(kept, expected.len());
                    prop_assert!(!partial);
                }
                other => prop_assert!(false, "expected a completed cycle, got {:?}", other),
            }

            let page = replica
                .service
                .list_records("id", "asc", 1, MAX_PAGE_SIZE)
                .await
                .unwrap();
            prop_assert_eq!(page.total_count, expected.len() as u64);
            prop_assert_eq!(page.records, expected);
            Ok(())
        })?;
    }

    #[test]
    fn prop_shifted_records_are_upserted_once(
        records in arb_raw_records(40),
        origin in arb_origin_name(),
        shifted in 0usize..10,
    ) {
        // Records re-served on a later page, as when the upstream shifts
        // rows between pages mid-walk. The later copy wins.
        let mut upstream = records.clone();
        upstream.extend(records.iter().take(shifted).cloned().map(|mut record| {
            record.name = format!("{} (moved)", record.name);
            record.origin.name = origin.clone();
            record
        }));
        let expected = expected_rows(&upstream);
        let replica = in_memory(ScriptedFetcher::from_records(upstream, 7));

        let rt = runtime();
        rt.block_on(async {
            let outcome = replica.coordinator.run_cycle().await;
            prop_assert!(
                matches!(outcome, CycleOutcome::Completed { .. }),
                "expected CycleOutcome::Completed"
            );

            let page = replica
                .service
                .list_records("id", "asc", 1, MAX_PAGE_SIZE)
                .await
                .unwrap();
            prop_assert_eq!(page.records, expected);
            Ok(())
        })?;
    }
}
