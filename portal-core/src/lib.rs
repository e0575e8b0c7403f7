//! Portal Core - Domain Types and Contracts
//!
//! Shared vocabulary for the Portal character proxy: the persisted
//! [`Record`], the raw upstream payload, the ingest filter, paging queries,
//! the refresh bookkeeping singleton and the error taxonomy used across the
//! storage and API crates.

pub mod error;
pub mod filter;
pub mod query;
pub mod record;
pub mod refresh;
pub mod upstream;

pub use error::{CacheError, ConfigError, QueryError, StoreError, StoreResult, UpstreamError};
pub use filter::{filter_records, keep, EARTH_ORIGIN_PREFIX, REQUIRED_SPECIES, REQUIRED_STATUS};
pub use query::{
    PageKey, PageQuery, PageSlice, SortField, SortOrder, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use record::{PageInfo, RawOrigin, RawPage, RawRecord, Record};
pub use refresh::{RefreshState, RefreshStatus};
pub use upstream::PageFetcher;
