//! Bounded LRU map with per-entry TTL.
//!
//! Entries live in a slab (`Vec<Option<Node>>` plus a free list) threaded by
//! prev/next indices into a recency list: head is least recently used, tail
//! is most recently used. A `HashMap` maps keys to slab indices.
//!
//! Expiry is lazy. An entry older than the TTL is dropped on the lookup that
//! observes it, and expired entries are never returned.
//!
//! A dangling index surfaces as [`CacheError::Corrupted`] instead of a panic;
//! callers treat that as a cache failure and reset the map.

use portal_core::CacheError;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotIdx(usize);

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    inserted_at: Instant,
    prev: Option<SlotIdx>,
    next: Option<SlotIdx>,
}

#[derive(Debug)]
pub struct LruTtl<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<SlotIdx>,
    index: HashMap<K, SlotIdx>,
    head: Option<SlotIdx>,
    tail: Option<SlotIdx>,
    capacity: usize,
    ttl: Duration,
    evictions: u64,
    expirations: u64,
}

impl<K, V> LruTtl<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A capacity of zero disables storage entirely.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity.min(1024)),
            head: None,
            tail: None,
            capacity,
            ttl,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries dropped to make room.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Entries dropped because they outlived the TTL.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Look up a fresh entry and mark it most recently used.
    pub fn get(&mut self, key: &K, now: Instant) -> Result<Option<V>, CacheError> {
        let Some(&idx) = self.index.get(key) else {
            return Ok(None);
        };

        if self.is_expired(idx, now)? {
            self.remove_at(idx)?;
            self.expirations += 1;
            return Ok(None);
        }

        self.move_to_back(idx)?;
        Ok(Some(self.node(idx)?.value.clone()))
    }

    /// Insert or replace. Replacing resets the entry's age.
    pub fn insert(&mut self, key: K, value: V, now: Instant) -> Result<(), CacheError> {
        if self.capacity == 0 {
            return Ok(());
        }

        if let Some(&idx) = self.index.get(&key) {
            let node = self.node_mut(idx)?;
            node.value = value;
            node.inserted_at = now;
            return self.move_to_back(idx);
        }

        while self.index.len() >= self.capacity {
            let Some(lru) = self.head else {
                return Err(corrupted("index non-empty but recency list is empty"));
            };
            self.remove_at(lru)?;
            self.evictions += 1;
        }

        let idx = self.alloc(Node {
            key: key.clone(),
            value,
            inserted_at: now,
            prev: None,
            next: None,
        });
        self.index.insert(key, idx);
        self.link_back(idx)
    }

    pub fn remove(&mut self, key: &K) -> Result<Option<V>, CacheError> {
        match self.index.get(key) {
            Some(&idx) => self.remove_at(idx).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Result<Vec<K>, CacheError> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if keys.len() > self.index.len() {
                return Err(corrupted("recency list longer than index"));
            }
            let node = self.node(idx)?;
            keys.push(node.key.clone());
            cursor = node.next;
        }
        Ok(keys)
    }

    // -- Internal helpers --

    fn is_expired(&self, idx: SlotIdx, now: Instant) -> Result<bool, CacheError> {
        let node = self.node(idx)?;
        Ok(now.saturating_duration_since(node.inserted_at) > self.ttl)
    }

    fn alloc(&mut self, node: Node<K, V>) -> SlotIdx {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx.0] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                SlotIdx(self.slots.len() - 1)
            }
        }
    }

    fn remove_at(&mut self, idx: SlotIdx) -> Result<V, CacheError> {
        self.unlink(idx)?;
        let node = self
            .slots
            .get_mut(idx.0)
            .and_then(Option::take)
            .ok_or_else(|| corrupted("remove on vacant slot"))?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Ok(node.value)
    }

    fn unlink(&mut self, idx: SlotIdx) -> Result<(), CacheError> {
        let (prev, next) = {
            let node = self.node(idx)?;
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p)?.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = prev,
            None => self.tail = prev,
        }

        let node = self.node_mut(idx)?;
        node.prev = None;
        node.next = None;
        Ok(())
    }

    fn link_back(&mut self, idx: SlotIdx) -> Result<(), CacheError> {
        let old_tail = self.tail;
        {
            let node = self.node_mut(idx)?;
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => self.node_mut(t)?.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        Ok(())
    }

    fn move_to_back(&mut self, idx: SlotIdx) -> Result<(), CacheError> {
        if self.tail == Some(idx) {
            return Ok(());
        }
        self.unlink(idx)?;
        self.link_back(idx)
    }

    fn node(&self, idx: SlotIdx) -> Result<&Node<K, V>, CacheError> {
        self.slots
            .get(idx.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| corrupted("dangling slot index"))
    }

    fn node_mut(&mut self, idx: SlotIdx) -> Result<&mut Node<K, V>, CacheError> {
        self.slots
            .get_mut(idx.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| corrupted("dangling slot index"))
    }
}

fn corrupted(reason: &str) -> CacheError {
    CacheError::Corrupted {
        reason: reason.to_string(),
    }
}
