//! Portal Test Utilities
//!
//! Shared test infrastructure for the Portal workspace:
//! - A scripted upstream [`PageFetcher`] with failure injection
//! - A fault-injecting wrapper around any record store
//! - Proptest generators for upstream payloads
//! - Fixtures for common record shapes

pub use portal_core::{
    filter_records, keep, PageFetcher, PageInfo, PageQuery, RawOrigin, RawPage, RawRecord,
    Record, SortField, SortOrder, StoreError, StoreResult, UpstreamError,
};
pub use portal_storage::{AdvisoryLock, InMemoryStore, Lease, LockKey, RecordStore};

use async_trait::async_trait;
use portal_core::PageSlice;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// SCRIPTED UPSTREAM
// ============================================================================

/// In-memory upstream that serves fixed pages and replays scripted failures.
///
/// Failures queued for a page are returned, in order, before that page
/// succeeds again.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    pages: Vec<RawPage>,
    failures: Mutex<HashMap<u32, VecDeque<UpstreamError>>>,
    calls: AtomicUsize,
    unreachable: AtomicBool,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new(pages: Vec<RawPage>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Split `records` into upstream pages of `page_size`, linked by `info.next`.
    pub fn from_records(records: Vec<RawRecord>, page_size: usize) -> Self {
        Self::new(fixtures::paginate(records, page_size))
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue `times` failures for `page`.
    pub fn fail_page(&self, page: u32, error: UpstreamError, times: usize) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = failures.entry(page).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Total `fetch_page` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, page: u32) -> Result<RawPage, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&page)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        page.checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
            .cloned()
            .ok_or(UpstreamError::Fatal {
                page,
                status: Some(404),
                reason: "There is nothing here".to_string(),
            })
    }

    async fn probe(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// Wraps a store, counting calls and failing operations on demand.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    query_error: Mutex<Option<StoreError>>,
    upsert_error: Mutex<Option<StoreError>>,
    ping_error: Mutex<Option<StoreError>>,
    queries: AtomicUsize,
    upserts: AtomicUsize,
    query_delay: Option<Duration>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            query_error: Mutex::new(None),
            upsert_error: Mutex::new(None),
            ping_error: Mutex::new(None),
            queries: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
            query_delay: None,
        }
    }

    /// Sleep this long inside every query.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail every query until cleared with `None`.
    pub fn fail_queries(&self, error: Option<StoreError>) {
        *self.query_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Fail every upsert until cleared with `None`.
    pub fn fail_upserts(&self, error: Option<StoreError>) {
        *self.upsert_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Fail every ping until cleared with `None`.
    pub fn fail_pings(&self, error: Option<StoreError>) {
        *self.ping_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

fn injected(slot: &Mutex<Option<StoreError>>) -> StoreResult<()> {
    match slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        Some(error) => Err(error.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl<S: RecordStore> RecordStore for FlakyStore<S> {
    async fn upsert(&self, records: &[Record]) -> StoreResult<u64> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        injected(&self.upsert_error)?;
        self.inner.upsert(records).await
    }

    async fn query(&self, query: &PageQuery) -> StoreResult<PageSlice> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        injected(&self.query_error)?;
        self.inner.query(query).await
    }

    async fn count(&self) -> StoreResult<u64> {
        injected(&self.query_error)?;
        self.inner.count().await
    }

    async fn ping(&self) -> StoreResult<()> {
        injected(&self.ping_error)?;
        self.inner.ping().await
    }
}

#[async_trait]
impl<S: AdvisoryLock> AdvisoryLock for FlakyStore<S> {
    type Lease = S::Lease;

    async fn try_acquire(&self, key: LockKey) -> StoreResult<Option<Self::Lease>> {
        self.inner.try_acquire(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_species() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => Just("Human".to_string()),
            1 => Just("Alien".to_string()),
            1 => Just("Robot".to_string()),
            1 => Just("human".to_string()),
            1 => Just(String::new()),
        ]
    }

    pub fn arb_status() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => Just("Alive".to_string()),
            1 => Just("Dead".to_string()),
            1 => Just("unknown".to_string()),
        ]
    }

    /// Origins clustered around the "Earth (" prefix boundary.
    pub fn arb_origin_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Earth (C-137)".to_string()),
            Just("Earth (Replacement Dimension)".to_string()),
            Just("Earth".to_string()),
            Just("Earth(C-137)".to_string()),
            Just("earth (C-137)".to_string()),
            Just("Citadel of Ricks".to_string()),
            Just(String::new()),
            "[A-Za-z ()-]{0,20}",
        ]
    }

    pub fn arb_raw_record(id: i64) -> impl Strategy<Value = RawRecord> {
        (
            "[A-Za-z .]{1,24}",
            arb_status(),
            arb_species(),
            arb_origin_name(),
        )
            .prop_map(move |(name, status, species, origin)| RawRecord {
                id,
                name,
                status,
                species,
                origin: RawOrigin {
                    name: origin,
                    url: None,
                },
                image: None,
                url: None,
            })
    }

    /// Records with unique ids `1..=n`.
    pub fn arb_raw_records(max: usize) -> impl Strategy<Value = Vec<RawRecord>> {
        (0..=max).prop_flat_map(|n| {
            (1..=n as i64)
                .map(arb_raw_record)
                .collect::<Vec<_>>()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// A raw record that passes the ingest filter.
    pub fn earth_human(id: i64, name: &str) -> RawRecord {
        RawRecord {
            id,
            name: name.to_string(),
            status: "Alive".to_string(),
            species: "Human".to_string(),
            origin: RawOrigin {
                name: "Earth (C-137)".to_string(),
                url: Some("https://rickandmortyapi.com/api/location/1".to_string()),
            },
            image: Some(format!("https://rickandmortyapi.com/api/character/avatar/{id}.jpeg")),
            url: Some(format!("https://rickandmortyapi.com/api/character/{id}")),
        }
    }

    /// A raw record the ingest filter drops.
    pub fn alien(id: i64, name: &str) -> RawRecord {
        RawRecord {
            species: "Alien".to_string(),
            ..earth_human(id, name)
        }
    }

    /// `count` keepers with ids `1..=count` and zero-padded names.
    pub fn earth_humans(count: i64) -> Vec<RawRecord> {
        (1..=count)
            .map(|id| earth_human(id, &format!("Human {id:04}")))
            .collect()
    }

    /// Stored form of [`earth_humans`].
    pub fn stored_records(count: i64) -> Vec<Record> {
        earth_humans(count).iter().map(Record::from_raw).collect()
    }

    /// Chunk records into upstream pages linked by `info.next`.
    pub fn paginate(records: Vec<RawRecord>, page_size: usize) -> Vec<RawPage> {
        let page_size = page_size.max(1);
        let count = records.len() as u64;
        let chunks: Vec<Vec<RawRecord>> = records
            .chunks(page_size)
            .map(<[RawRecord]>::to_vec)
            .collect();
        let pages = chunks.len().max(1) as u32;

        if chunks.is_empty() {
            return vec![RawPage {
                info: PageInfo {
                    count: Some(0),
                    pages: Some(1),
                    next: None,
                    prev: None,
                },
                results: Vec::new(),
            }];
        }

        chunks
            .into_iter()
            .enumerate()
            .map(|(idx, results)| {
                let number = idx as u32 + 1;
                RawPage {
                    info: PageInfo {
                        count: Some(count),
                        pages: Some(pages),
                        next: (number < pages).then(|| page_url(number + 1)),
                        prev: (number > 1).then(|| page_url(number - 1)),
                    },
                    results,
                }
            })
            .collect()
    }

    fn page_url(page: u32) -> String {
        format!("https://rickandmortyapi.com/api/character?page={page}")
    }

    pub fn transient(page: u32) -> UpstreamError {
        UpstreamError::Transient {
            page,
            reason: "status 503".to_string(),
            retry_after: None,
        }
    }
}
