//! Portal Storage - Store Traits, Locks and Caches
//!
//! Defines the storage abstraction the refresh job and read path are written
//! against, an in-memory backend with the same semantics as the PostgreSQL
//! adapter, and the two in-process caches that sit in front of the store and
//! the upstream API.

pub mod cache;
pub mod lock;
pub mod memory;
pub mod store;

pub use cache::{CacheStats, LruTtl, PageCache, ResponseCache};
pub use lock::{AdvisoryLock, InMemoryLease, Lease, LockKey, LockTable};
pub use memory::InMemoryStore;
pub use store::RecordStore;
