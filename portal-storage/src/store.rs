//! Record store trait.

use async_trait::async_trait;
use portal_core::{PageQuery, PageSlice, Record, StoreResult};
use std::sync::Arc;

/// Transactional upsert/query interface over the backing store.
///
/// Implementations must classify failures: connection loss, timeouts and
/// pool exhaustion are `StoreError::Transient`; constraint or schema
/// problems are `StoreError::Fatal`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert-or-replace by `id` in a single transaction. A batch may repeat
    /// an id; its last occurrence wins. Returns the number of distinct records
    /// written.
    async fn upsert(&self, records: &[Record]) -> StoreResult<u64>;

    /// Fetch one sorted page plus the total row count.
    ///
    /// Never fails for a page past the end: returns an empty slice with the
    /// true total and `out_of_range` set.
    async fn query(&self, query: &PageQuery) -> StoreResult<PageSlice>;

    /// Total number of stored records.
    async fn count(&self) -> StoreResult<u64>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn upsert(&self, records: &[Record]) -> StoreResult<u64> {
        (**self).upsert(records).await
    }

    async fn query(&self, query: &PageQuery) -> StoreResult<PageSlice> {
        (**self).query(query).await
    }

    async fn count(&self) -> StoreResult<u64> {
        (**self).count().await
    }

    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }
}
