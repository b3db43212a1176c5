//! Per-physical-connection LRU statement cache.
//!
//! Lookups take the statement out of the cache, so a cached driver statement
//! is in use by at most one wrapper at a time. Closing a wrapper puts it back.
//! Statements pushed out by the LRU bound are handed back to the caller to be
//! closed.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;

use crate::cache_key::StatementCacheKey;
use crate::driver::DriverStatement;

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct StatementCache {
    cache: LruCache<StatementCacheKey, Box<dyn DriverStatement>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl StatementCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Build a cache of `capacity` statements; 0 disables caching.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(Self::new)
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn contains(&self, key: &StatementCacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Remove and return the statement cached under `key`.
    pub fn take(&mut self, key: &StatementCacheKey) -> Option<Box<dyn DriverStatement>> {
        let taken = self.cache.pop(key);
        if taken.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        taken
    }

    /// Cache `statement` under `key`, returning whatever it displaced.
    pub fn put(
        &mut self,
        key: StatementCacheKey,
        statement: Box<dyn DriverStatement>,
    ) -> Option<Box<dyn DriverStatement>> {
        let displaced = self.cache.push(key, statement).map(|(_, stmt)| stmt);
        if displaced.is_some() {
            self.evictions += 1;
        }
        displaced
    }

    /// Empty the cache, returning the statements for closing.
    pub fn drain(&mut self) -> Vec<Box<dyn DriverStatement>> {
        let mut drained = Vec::with_capacity(self.cache.len());
        while let Some((_, stmt)) = self.cache.pop_lru() {
            drained.push(stmt);
        }
        drained
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.cache.cap().get(),
            len: self.cache.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}
