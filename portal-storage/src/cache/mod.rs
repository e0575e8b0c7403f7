//! In-process caches.
//!
//! Both caches are built on [`LruTtl`], a bounded LRU map with lazy TTL
//! expiry. Neither ever serves an expired entry, and neither lets an internal
//! failure reach its caller: a broken cache degrades to a pass-through.
//!
//! - [`PageCache`]: read-through cache for store pages, with in-flight load
//!   coalescing and generation-checked invalidation.
//! - [`ResponseCache`]: memo of successful upstream responses.

mod lru;
mod page_cache;
mod response_cache;
mod stats;

pub use lru::LruTtl;
pub use page_cache::PageCache;
pub use response_cache::ResponseCache;
pub use stats::CacheStats;
