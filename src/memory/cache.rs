//! Bounded in-process cache of final search rankings, backed by moka.
//!
//! Keys are the full request. Every committed write or prune bumps the store
//! generation; a ranking cached under an older generation counts as a miss.
//! Only ids and scores are cached; entries are re-hydrated on a hit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache;
use serde::Serialize;

use crate::memory::types::{ScopeRef, SearchMode, SearchRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    query: String,
    scopes: Vec<ScopeRef>,
    k: usize,
    min_score_bits: u64,
    mode: SearchMode,
}

impl CacheKey {
    pub fn for_request(req: &SearchRequest) -> Self {
        Self {
            query: req.query.clone(),
            scopes: req.scopes.clone(),
            k: req.k,
            min_score_bits: req.min_score.to_bits(),
            mode: req.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedHit {
    pub id: String,
    pub score: f64,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// `None` until at least one lookup has happened.
    pub fn hit_ratio(&self) -> Option<f64> {
        match self.lookups() {
            0 => None,
            n => Some(self.hits as f64 / n as f64),
        }
    }
}

#[derive(Clone)]
struct Slot {
    generation: u64,
    hits: Arc<Vec<CachedHit>>,
}

pub struct ResultCache {
    enabled: bool,
    slots: Cache<CacheKey, Slot>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// A capacity of `0` disables caching; lookups then always miss and are not counted.
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: capacity > 0,
            slots: Cache::builder().max_capacity(capacity as u64).build(),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Mark every cached ranking stale and drop them.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.slots.invalidate_all();
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<CachedHit>> {
        if !self.enabled {
            return None;
        }
        let current = self.generation();
        let found = match self.slots.get(key) {
            Some(slot) if slot.generation == current => Some(slot.hits.as_ref().clone()),
            Some(_) => {
                self.slots.invalidate(key);
                None
            }
            None => None,
        };

        match found {
            Some(hits) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(hits)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a ranking computed while the store was at `generation`. Dropped
    /// if a write landed in between.
    pub fn insert(&self, key: CacheKey, hits: Vec<CachedHit>, generation: u64) {
        if !self.enabled || generation != self.generation() {
            return;
        }
        self.slots.insert(
            key,
            Slot {
                generation,
                hits: Arc::new(hits),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        self.slots.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.slots.entry_count() as usize,
        }
    }
}
