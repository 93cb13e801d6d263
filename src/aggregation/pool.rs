//! Pooled map registry
//!
//! Collectors, the reducer, the codec, and facet materialization all build
//! and tear down hash maps at a high rate. `MapPool` keeps cleared maps on
//! per-shape free lists so their allocations are reused across documents and
//! queries.
//!
//! The pool is an explicit resource shared as `Arc<MapPool>`; every component
//! that acquires or releases maps receives it at construction.
//!
//! # Release rules
//!
//! - Releasing takes the map by value, so a released map is unreachable.
//! - Nested maps are released recursively with their outer map.
//! - Free lists are bounded; surplus maps and maps that grew past
//!   `max_map_capacity` are dropped instead of retained.
//! - A map that is never released is simply freed by its owner.
//!
//! # Example
//!
//! ```rust
//! use kuba_facet::aggregation::MapPool;
//! use kuba_facet::config::PoolConfig;
//!
//! let pool = MapPool::new(PoolConfig::default());
//!
//! let mut counts = pool.acquire_counts();
//! counts.insert(3_600_000, 12);
//! pool.release_counts(counts);
//!
//! // The next acquire reuses the released allocation
//! let reused = pool.acquire_counts();
//! assert!(reused.is_empty());
//! assert_eq!(pool.stats().hits, 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::cardinality::DistinctCounter;
use super::partial::{FacetType, PartialAggregate};
use crate::config::PoolConfig;
use crate::metrics;
use crate::types::{BucketKey, Count, SliceLabel};

/// Bucket → count
pub type CountMap = HashMap<BucketKey, Count>;
/// Slice → count
pub type SliceCountMap = HashMap<SliceLabel, Count>;
/// Bucket → slice → count
pub type SlicedCountMap = HashMap<BucketKey, SliceCountMap>;
/// Bucket → distinct counter
pub type DistinctMap = HashMap<BucketKey, DistinctCounter>;
/// Slice → distinct counter
pub type SliceDistinctMap = HashMap<SliceLabel, DistinctCounter>;
/// Bucket → slice → distinct counter
pub type SlicedDistinctMap = HashMap<BucketKey, SliceDistinctMap>;

// ============================================================================
// Free Lists
// ============================================================================

/// Bounded stack of cleared maps of one shape
struct FreeList<K, V> {
    maps: Mutex<Vec<HashMap<K, V>>>,
}

impl<K, V> FreeList<K, V> {
    fn new() -> Self {
        Self {
            maps: Mutex::new(Vec::new()),
        }
    }

    fn pop(&self) -> Option<HashMap<K, V>> {
        self.maps.lock().pop()
    }

    /// Push a cleared map; returns false if the list is full
    fn push(&self, map: HashMap<K, V>, max_retained: usize) -> bool {
        let mut maps = self.maps.lock();
        if maps.len() >= max_retained {
            return false;
        }
        maps.push(map);
        true
    }

    fn len(&self) -> usize {
        self.maps.lock().len()
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of pool activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquires served from a free list
    pub hits: u64,
    /// Acquires that allocated a new map
    pub misses: u64,
    /// Maps returned to a free list
    pub releases: u64,
    /// Released maps dropped (list full or capacity too large)
    pub discards: u64,
    /// Maps currently held across all free lists
    pub retained: usize,
}

impl PoolStats {
    /// Fraction of acquires served from the pool
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Map Pool Statistics:")?;
        writeln!(f, "  Hits: {}", self.hits)?;
        writeln!(f, "  Misses: {}", self.misses)?;
        writeln!(f, "  Releases: {}", self.releases)?;
        writeln!(f, "  Discards: {}", self.discards)?;
        writeln!(f, "  Retained: {}", self.retained)?;
        write!(f, "  Hit rate: {:.1}%", self.hit_rate() * 100.0)
    }
}

// ============================================================================
// Map Pool
// ============================================================================

/// Thread-safe registry of reusable aggregation maps
pub struct MapPool {
    config: PoolConfig,

    counts: FreeList<BucketKey, Count>,
    slice_counts: FreeList<SliceLabel, Count>,
    sliced_counts: FreeList<BucketKey, SliceCountMap>,
    distinct: FreeList<BucketKey, DistinctCounter>,
    slice_distinct: FreeList<SliceLabel, DistinctCounter>,
    sliced_distinct: FreeList<BucketKey, SliceDistinctMap>,

    hits: AtomicU64,
    misses: AtomicU64,
    releases: AtomicU64,
    discards: AtomicU64,
}

impl MapPool {
    /// Create an empty pool
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            counts: FreeList::new(),
            slice_counts: FreeList::new(),
            sliced_counts: FreeList::new(),
            distinct: FreeList::new(),
            slice_distinct: FreeList::new(),
            sliced_distinct: FreeList::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            discards: AtomicU64::new(0),
        }
    }

    fn take<K, V>(&self, list: &FreeList<K, V>) -> HashMap<K, V> {
        match list.pop() {
            Some(map) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                map
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                HashMap::new()
            }
        }
    }

    fn give<K, V>(&self, list: &FreeList<K, V>, mut map: HashMap<K, V>) {
        map.clear();
        if map.capacity() > self.config.max_map_capacity
            || !list.push(map, self.config.max_retained_per_shape)
        {
            self.discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Acquire an empty bucket → count map
    pub fn acquire_counts(&self) -> CountMap {
        self.take(&self.counts)
    }

    /// Release a bucket → count map
    pub fn release_counts(&self, map: CountMap) {
        self.give(&self.counts, map);
    }

    /// Acquire an empty slice → count map
    pub fn acquire_slice_counts(&self) -> SliceCountMap {
        self.take(&self.slice_counts)
    }

    /// Release a slice → count map
    pub fn release_slice_counts(&self, map: SliceCountMap) {
        self.give(&self.slice_counts, map);
    }

    /// Acquire an empty bucket → slice → count map
    pub fn acquire_sliced_counts(&self) -> SlicedCountMap {
        self.take(&self.sliced_counts)
    }

    /// Release a bucket → slice → count map and every inner map
    pub fn release_sliced_counts(&self, mut map: SlicedCountMap) {
        for (_, inner) in map.drain() {
            self.release_slice_counts(inner);
        }
        self.give(&self.sliced_counts, map);
    }

    /// Acquire an empty bucket → distinct counter map
    pub fn acquire_distinct(&self) -> DistinctMap {
        self.take(&self.distinct)
    }

    /// Release a bucket → distinct counter map
    pub fn release_distinct(&self, map: DistinctMap) {
        self.give(&self.distinct, map);
    }

    /// Acquire an empty slice → distinct counter map
    pub fn acquire_slice_distinct(&self) -> SliceDistinctMap {
        self.take(&self.slice_distinct)
    }

    /// Release a slice → distinct counter map
    pub fn release_slice_distinct(&self, map: SliceDistinctMap) {
        self.give(&self.slice_distinct, map);
    }

    /// Acquire an empty bucket → slice → distinct counter map
    pub fn acquire_sliced_distinct(&self) -> SlicedDistinctMap {
        self.take(&self.sliced_distinct)
    }

    /// Release a bucket → slice → distinct counter map and every inner map
    pub fn release_sliced_distinct(&self, mut map: SlicedDistinctMap) {
        for (_, inner) in map.drain() {
            self.release_slice_distinct(inner);
        }
        self.give(&self.sliced_distinct, map);
    }

    /// Acquire an empty partial aggregate of the given shape
    pub fn acquire_aggregate(&self, facet_type: FacetType) -> PartialAggregate {
        match facet_type {
            FacetType::Counting => PartialAggregate::Counts(self.acquire_counts()),
            FacetType::Sliced => PartialAggregate::SlicedCounts(self.acquire_sliced_counts()),
            FacetType::Distinct => PartialAggregate::DistinctCounts(self.acquire_distinct()),
            FacetType::SlicedDistinct => {
                PartialAggregate::SlicedDistinctCounts(self.acquire_sliced_distinct())
            }
        }
    }

    /// Release every map owned by a partial aggregate
    pub fn release_aggregate(&self, aggregate: PartialAggregate) {
        match aggregate {
            PartialAggregate::Counts(map) => self.release_counts(map),
            PartialAggregate::SlicedCounts(map) => self.release_sliced_counts(map),
            PartialAggregate::DistinctCounts(map) => self.release_distinct(map),
            PartialAggregate::SlicedDistinctCounts(map) => self.release_sliced_distinct(map),
        }
    }

    /// Snapshot of pool activity
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            retained: self.counts.len()
                + self.slice_counts.len()
                + self.sliced_counts.len()
                + self.distinct.len()
                + self.slice_distinct.len()
                + self.sliced_distinct.len(),
        }
    }

    /// Export the current statistics as Prometheus gauges
    pub fn publish_metrics(&self) {
        metrics::update_pool_stats(&self.stats());
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Default for MapPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for MapPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
