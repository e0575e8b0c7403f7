//! In-memory record store
//!
//! Same ordering, paging and out-of-range semantics as the PostgreSQL
//! adapter, without a database. Clones share state, so two clones model two
//! replicas pointed at one store (including the advisory lock table).

use async_trait::async_trait;
use portal_core::{PageQuery, PageSlice, Record, SortField, SortOrder, StoreResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::lock::{AdvisoryLock, InMemoryLease, LockKey, LockTable};
use crate::store::RecordStore;

#[derive(Debug, Default)]
struct Inner {
    records: RwLock<BTreeMap<i64, Record>>,
    locks: LockTable,
}

/// Shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock table shared by every clone of this store.
    pub fn locks(&self) -> &LockTable {
        &self.inner.locks
    }

    /// Snapshot of one record, for assertions.
    pub async fn get(&self, id: i64) -> Option<Record> {
        self.inner.records.read().await.get(&id).cloned()
    }
}

fn compare(a: &Record, b: &Record, sort: SortField, order: SortOrder) -> Ordering {
    let ascending = match sort {
        SortField::Id => a.id.cmp(&b.id),
        SortField::Name => a.name.cmp(&b.name).then(a.id.cmp(&b.id)),
    };
    match order {
        SortOrder::Asc => ascending,
        SortOrder::Desc => ascending.reverse(),
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn upsert(&self, records: &[Record]) -> StoreResult<u64> {
        let mut stored = self.inner.records.write().await;
        let mut written = BTreeMap::new();
        for record in records {
            written.insert(record.id, record);
        }
        for record in written.values() {
            stored.insert(record.id, (*record).clone());
        }
        Ok(written.len() as u64)
    }

    async fn query(&self, query: &PageQuery) -> StoreResult<PageSlice> {
        let stored = self.inner.records.read().await;
        let total = stored.len() as u64;

        let mut rows: Vec<&Record> = stored.values().collect();
        rows.sort_by(|a, b| compare(a, b, query.sort(), query.order()));

        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let page = rows
            .into_iter()
            .skip(offset)
            .take(query.page_size() as usize)
            .cloned()
            .collect();

        Ok(PageSlice::new(page, total, query))
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.inner.records.read().await.len() as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AdvisoryLock for InMemoryStore {
    type Lease = InMemoryLease;

    async fn try_acquire(&self, key: LockKey) -> StoreResult<Option<InMemoryLease>> {
        Ok(self.inner.locks.try_lock(key))
    }
}
