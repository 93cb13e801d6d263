//! Streaming per-document collectors
//!
//! A collector is driven by exactly one worker over one shard. It receives
//! the field values of each matching document, rounds every timestamp to a
//! bucket, and updates its partial aggregate in place. `finish()` consumes
//! the collector and hands the aggregate over, so a finished collector cannot
//! be fed again.
//!
//! # Variants
//!
//! | Variant           | Required fields           | Statistic                  |
//! |-------------------|---------------------------|----------------------------|
//! | `Counting`        | key                       | count per bucket           |
//! | `Sliced`          | key, slice                | count per bucket and slice |
//! | `Distinct`        | key, distinct             | distinct values per bucket |
//! | `SlicedDistinct`  | key, slice, distinct      | distinct per bucket/slice  |
//!
//! With a value field configured, counting variants add the number of value
//! occurrences on the document instead of 1, and documents without any value
//! occurrence contribute nothing.
//!
//! A document missing a required field contributes nothing; it is never an
//! error.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kuba_facet::aggregation::{Collector, CollectorSpec, FacetCollector, MapPool, PartialAggregate};
//! use kuba_facet::types::DocValues;
//!
//! let pool = Arc::new(MapPool::default());
//! let rounding = Arc::new(|t: i64| t);
//! let mut collector = FacetCollector::new(CollectorSpec::counting(), rounding, pool);
//!
//! collector.collect(&DocValues::new(&[100])).unwrap();
//! collector.collect(&DocValues::new(&[100])).unwrap();
//! collector.collect(&DocValues::new(&[200])).unwrap();
//!
//! match collector.finish() {
//!     PartialAggregate::Counts(counts) => {
//!         assert_eq!(counts[&100], 2);
//!         assert_eq!(counts[&200], 1);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use std::sync::Arc;

use super::cardinality::{DistinctCounter, HyperLogLog};
use super::partial::{add_count, FacetType, PartialAggregate};
use super::pool::{CountMap, DistinctMap, MapPool, SlicedCountMap, SlicedDistinctMap};
use crate::error::Result;
use crate::metrics;
use crate::types::{slice_label, DocValues, Rounding};

/// Per-document aggregation over one shard
pub trait Collector {
    /// Fold one matching document into the aggregate
    fn collect(&mut self, doc: &DocValues<'_>) -> Result<()>;

    /// Detach the accumulated aggregate
    fn finish(self) -> PartialAggregate;

    /// Fold a sequence of documents
    fn collect_all<'a, I>(&mut self, docs: I) -> Result<()>
    where
        I: IntoIterator<Item = DocValues<'a>>,
    {
        for doc in docs {
            self.collect(&doc)?;
        }
        Ok(())
    }
}

// ============================================================================
// Collector Spec
// ============================================================================

/// Which fields a facet reads, and how distinct counters are sized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorSpec {
    /// Count value field occurrences instead of documents
    pub count_values: bool,
    /// Split buckets by slice field
    pub sliced: bool,
    /// Count distinct values of the distinct field
    pub distinct: bool,
    /// Largest distinct count tracked exactly
    pub exact_threshold: usize,
    /// Sketch precision once approximate
    pub precision: u8,
}

impl CollectorSpec {
    /// Default exact threshold
    pub const DEFAULT_EXACT_THRESHOLD: usize = 1000;

    /// Plain document counting
    pub fn counting() -> Self {
        Self {
            count_values: false,
            sliced: false,
            distinct: false,
            exact_threshold: Self::DEFAULT_EXACT_THRESHOLD,
            precision: HyperLogLog::precision_for_tolerance(0.01),
        }
    }

    /// Count value field occurrences
    pub fn with_value_field(mut self) -> Self {
        self.count_values = true;
        self
    }

    /// Split by slice field
    pub fn with_slices(mut self) -> Self {
        self.sliced = true;
        self
    }

    /// Count distinct values with the given estimator settings
    pub fn with_distinct(mut self, exact_threshold: usize, tolerance: f64) -> Self {
        self.distinct = true;
        self.exact_threshold = exact_threshold;
        self.precision = HyperLogLog::precision_for_tolerance(tolerance);
        self
    }

    /// Facet shape produced by this spec
    pub fn facet_type(&self) -> FacetType {
        match (self.sliced, self.distinct) {
            (false, false) => FacetType::Counting,
            (true, false) => FacetType::Sliced,
            (false, true) => FacetType::Distinct,
            (true, true) => FacetType::SlicedDistinct,
        }
    }

    fn new_counter(&self) -> DistinctCounter {
        DistinctCounter::new(self.exact_threshold, self.precision)
    }
}

impl Default for CollectorSpec {
    fn default() -> Self {
        Self::counting()
    }
}

// ============================================================================
// Counting
// ============================================================================

/// Counts documents (or value occurrences) per bucket
pub struct CountingCollector {
    rounding: Arc<dyn Rounding>,
    count_values: bool,
    counts: CountMap,
    documents: u64,
}

impl CountingCollector {
    /// Create a collector with a pooled count map
    pub fn new(count_values: bool, rounding: Arc<dyn Rounding>, pool: &MapPool) -> Self {
        Self {
            rounding,
            count_values,
            counts: pool.acquire_counts(),
            documents: 0,
        }
    }
}

impl Collector for CountingCollector {
    fn collect(&mut self, doc: &DocValues<'_>) -> Result<()> {
        if doc.timestamps.is_empty() {
            return Ok(());
        }
        let increment = if self.count_values {
            if doc.values.is_empty() {
                return Ok(());
            }
            doc.values.len() as u64
        } else {
            1
        };

        self.documents += 1;
        for &timestamp in doc.timestamps {
            let bucket = self.rounding.round(timestamp);
            add_count(self.counts.entry(bucket).or_insert(0), bucket, increment)?;
        }
        Ok(())
    }

    fn finish(self) -> PartialAggregate {
        metrics::record_documents_collected(FacetType::Counting, self.documents);
        PartialAggregate::Counts(self.counts)
    }
}

// ============================================================================
// Sliced
// ============================================================================

/// Counts documents (or value occurrences) per bucket and slice
pub struct SlicedCollector {
    rounding: Arc<dyn Rounding>,
    pool: Arc<MapPool>,
    count_values: bool,
    counts: SlicedCountMap,
    documents: u64,
}

impl SlicedCollector {
    /// Create a collector with a pooled outer map
    pub fn new(count_values: bool, rounding: Arc<dyn Rounding>, pool: Arc<MapPool>) -> Self {
        let counts = pool.acquire_sliced_counts();
        Self {
            rounding,
            pool,
            count_values,
            counts,
            documents: 0,
        }
    }
}

impl Collector for SlicedCollector {
    fn collect(&mut self, doc: &DocValues<'_>) -> Result<()> {
        if doc.timestamps.is_empty() || doc.slices.is_empty() {
            return Ok(());
        }
        let increment = if self.count_values {
            if doc.values.is_empty() {
                return Ok(());
            }
            doc.values.len() as u64
        } else {
            1
        };

        self.documents += 1;
        let pool = &self.pool;
        for &timestamp in doc.timestamps {
            let bucket = self.rounding.round(timestamp);
            let slices = self
                .counts
                .entry(bucket)
                .or_insert_with(|| pool.acquire_slice_counts());
            for &slice in doc.slices {
                match slices.get_mut(slice) {
                    Some(count) => add_count(count, bucket, increment)?,
                    None => {
                        let mut count = 0;
                        add_count(&mut count, bucket, increment)?;
                        slices.insert(slice_label(slice), count);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> PartialAggregate {
        metrics::record_documents_collected(FacetType::Sliced, self.documents);
        PartialAggregate::SlicedCounts(self.counts)
    }
}

// ============================================================================
// Distinct
// ============================================================================

/// Counts distinct values of the distinct field per bucket
pub struct DistinctCollector {
    rounding: Arc<dyn Rounding>,
    spec: CollectorSpec,
    counts: DistinctMap,
    documents: u64,
}

impl DistinctCollector {
    /// Create a collector with a pooled counter map
    pub fn new(spec: CollectorSpec, rounding: Arc<dyn Rounding>, pool: &MapPool) -> Self {
        Self {
            rounding,
            spec,
            counts: pool.acquire_distinct(),
            documents: 0,
        }
    }
}

impl Collector for DistinctCollector {
    fn collect(&mut self, doc: &DocValues<'_>) -> Result<()> {
        if doc.timestamps.is_empty() || doc.distinct.is_empty() {
            return Ok(());
        }

        self.documents += 1;
        let spec = &self.spec;
        for &timestamp in doc.timestamps {
            let bucket = self.rounding.round(timestamp);
            let counter = self
                .counts
                .entry(bucket)
                .or_insert_with(|| spec.new_counter());
            for &value in doc.distinct {
                counter.update(value);
            }
        }
        Ok(())
    }

    fn finish(self) -> PartialAggregate {
        metrics::record_documents_collected(FacetType::Distinct, self.documents);
        PartialAggregate::DistinctCounts(self.counts)
    }
}

// ============================================================================
// Sliced Distinct
// ============================================================================

/// Counts distinct values of the distinct field per bucket and slice
pub struct SlicedDistinctCollector {
    rounding: Arc<dyn Rounding>,
    pool: Arc<MapPool>,
    spec: CollectorSpec,
    counts: SlicedDistinctMap,
    documents: u64,
}

impl SlicedDistinctCollector {
    /// Create a collector with a pooled outer map
    pub fn new(spec: CollectorSpec, rounding: Arc<dyn Rounding>, pool: Arc<MapPool>) -> Self {
        let counts = pool.acquire_sliced_distinct();
        Self {
            rounding,
            pool,
            spec,
            counts,
            documents: 0,
        }
    }
}

impl Collector for SlicedDistinctCollector {
    fn collect(&mut self, doc: &DocValues<'_>) -> Result<()> {
        if doc.timestamps.is_empty() || doc.slices.is_empty() || doc.distinct.is_empty() {
            return Ok(());
        }

        self.documents += 1;
        let pool = &self.pool;
        let spec = &self.spec;
        for &timestamp in doc.timestamps {
            let bucket = self.rounding.round(timestamp);
            let slices = self
                .counts
                .entry(bucket)
                .or_insert_with(|| pool.acquire_slice_distinct());
            for &slice in doc.slices {
                if !slices.contains_key(slice) {
                    slices.insert(slice_label(slice), spec.new_counter());
                }
                if let Some(counter) = slices.get_mut(slice) {
                    for &value in doc.distinct {
                        counter.update(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> PartialAggregate {
        metrics::record_documents_collected(FacetType::SlicedDistinct, self.documents);
        PartialAggregate::SlicedDistinctCounts(self.counts)
    }
}

// ============================================================================
// Facet Collector
// ============================================================================

/// Collector variant selected once per query from the configured fields
pub enum FacetCollector {
    /// Plain counts
    Counting(CountingCollector),
    /// Counts per slice
    Sliced(SlicedCollector),
    /// Distinct counts
    Distinct(DistinctCollector),
    /// Distinct counts per slice
    SlicedDistinct(SlicedDistinctCollector),
}

impl FacetCollector {
    /// Build the variant matching `spec`
    pub fn new(spec: CollectorSpec, rounding: Arc<dyn Rounding>, pool: Arc<MapPool>) -> Self {
        match spec.facet_type() {
            FacetType::Counting => FacetCollector::Counting(CountingCollector::new(
                spec.count_values,
                rounding,
                &pool,
            )),
            FacetType::Sliced => {
                FacetCollector::Sliced(SlicedCollector::new(spec.count_values, rounding, pool))
            }
            FacetType::Distinct => {
                FacetCollector::Distinct(DistinctCollector::new(spec, rounding, &pool))
            }
            FacetType::SlicedDistinct => FacetCollector::SlicedDistinct(
                SlicedDistinctCollector::new(spec, rounding, pool),
            ),
        }
    }

    /// Shape of the aggregate this collector produces
    pub fn facet_type(&self) -> FacetType {
        match self {
            FacetCollector::Counting(_) => FacetType::Counting,
            FacetCollector::Sliced(_) => FacetType::Sliced,
            FacetCollector::Distinct(_) => FacetType::Distinct,
            FacetCollector::SlicedDistinct(_) => FacetType::SlicedDistinct,
        }
    }
}

impl Collector for FacetCollector {
    #[inline]
    fn collect(&mut self, doc: &DocValues<'_>) -> Result<()> {
        match self {
            FacetCollector::Counting(c) => c.collect(doc),
            FacetCollector::Sliced(c) => c.collect(doc),
            FacetCollector::Distinct(c) => c.collect(doc),
            FacetCollector::SlicedDistinct(c) => c.collect(doc),
        }
    }

    fn finish(self) -> PartialAggregate {
        match self {
            FacetCollector::Counting(c) => c.finish(),
            FacetCollector::Sliced(c) => c.finish(),
            FacetCollector::Distinct(c) => c.finish(),
            FacetCollector::SlicedDistinct(c) => c.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Arc<dyn Rounding> {
        Arc::new(|t: i64| t)
    }

    fn collector(spec: CollectorSpec) -> FacetCollector {
        FacetCollector::new(spec, identity(), Arc::new(MapPool::default()))
    }

    fn counts(aggregate: PartialAggregate) -> CountMap {
        match aggregate {
            PartialAggregate::Counts(map) => map,
            other => panic!("expected counts, got {}", other.facet_type()),
        }
    }

    fn sliced(aggregate: PartialAggregate) -> SlicedCountMap {
        match aggregate {
            PartialAggregate::SlicedCounts(map) => map,
            other => panic!("expected sliced counts, got {}", other.facet_type()),
        }
    }

    #[test]
    fn test_spec_selects_variant() {
        let base = CollectorSpec::counting();
        assert_eq!(base.facet_type(), FacetType::Counting);
        assert_eq!(base.with_slices().facet_type(), FacetType::Sliced);
        assert_eq!(
            base.with_distinct(10, 0.01).facet_type(),
            FacetType::Distinct
        );
        assert_eq!(
            base.with_slices().with_distinct(10, 0.01).facet_type(),
            FacetType::SlicedDistinct
        );
        assert_eq!(
            collector(base.with_slices()).facet_type(),
            FacetType::Sliced
        );
    }

    #[test]
    fn test_counting_scenario() {
        let mut c = collector(CollectorSpec::counting());
        let a: [&[u8]; 1] = [b"a"];
        let b: [&[u8]; 1] = [b"b"];
        c.collect(&DocValues::new(&[100]).with_values(&a)).unwrap();
        c.collect(&DocValues::new(&[100]).with_values(&b)).unwrap();
        c.collect(&DocValues::new(&[200]).with_values(&a)).unwrap();

        let map = counts(c.finish());
        assert_eq!(map.len(), 2);
        assert_eq!(map[&100], 2);
        assert_eq!(map[&200], 1);
    }

    #[test]
    fn test_counting_multi_valued_timestamps() {
        let mut c = collector(CollectorSpec::counting());
        c.collect(&DocValues::new(&[100, 100, 300])).unwrap();
        let map = counts(c.finish());
        assert_eq!(map[&100], 2);
        assert_eq!(map[&300], 1);
    }

    #[test]
    fn test_counting_with_value_field_counts_occurrences() {
        let mut c = collector(CollectorSpec::counting().with_value_field());
        let values: [&[u8]; 3] = [b"x", b"x", b"y"];
        c.collect(&DocValues::new(&[100, 200]).with_values(&values))
            .unwrap();
        let map = counts(c.finish());
        assert_eq!(map[&100], 3);
        assert_eq!(map[&200], 3);
    }

    #[test]
    fn test_counting_with_value_field_skips_docs_without_values() {
        let mut c = collector(CollectorSpec::counting().with_value_field());
        c.collect(&DocValues::new(&[100])).unwrap();
        assert!(c.finish().is_empty());
    }

    #[test]
    fn test_missing_timestamps_contribute_nothing() {
        for spec in [
            CollectorSpec::counting(),
            CollectorSpec::counting().with_slices(),
            CollectorSpec::counting().with_distinct(10, 0.01),
            CollectorSpec::counting().with_slices().with_distinct(10, 0.01),
        ] {
            let mut c = collector(spec);
            let labels: [&[u8]; 1] = [b"s"];
            c.collect(
                &DocValues::new(&[])
                    .with_values(&labels)
                    .with_slices(&labels)
                    .with_distinct(&labels),
            )
            .unwrap();
            assert!(c.finish().is_empty());
        }
    }

    #[test]
    fn test_sliced_cross_product() {
        let mut c = collector(CollectorSpec::counting().with_slices());
        let slices: [&[u8]; 2] = [b"eu", b"us"];
        c.collect(&DocValues::new(&[100, 200]).with_slices(&slices))
            .unwrap();
        c.collect(&DocValues::new(&[100]).with_slices(&slices[..1]))
            .unwrap();

        let map = sliced(c.finish());
        assert_eq!(map[&100][&b"eu"[..]], 2);
        assert_eq!(map[&100][&b"us"[..]], 1);
        assert_eq!(map[&200][&b"eu"[..]], 1);
        assert_eq!(map[&200][&b"us"[..]], 1);
    }

    #[test]
    fn test_sliced_with_value_field() {
        let mut c = collector(CollectorSpec::counting().with_slices().with_value_field());
        let slices: [&[u8]; 1] = [b"eu"];
        let values: [&[u8]; 2] = [b"v1", b"v2"];
        c.collect(
            &DocValues::new(&[100])
                .with_slices(&slices)
                .with_values(&values),
        )
        .unwrap();
        c.collect(&DocValues::new(&[100]).with_slices(&slices))
            .unwrap();

        let map = sliced(c.finish());
        assert_eq!(map[&100][&b"eu"[..]], 2);
    }

    #[test]
    fn test_sliced_without_slices_contributes_nothing() {
        let mut c = collector(CollectorSpec::counting().with_slices());
        c.collect(&DocValues::new(&[100])).unwrap();
        assert!(c.finish().is_empty());
    }

    #[test]
    fn test_slice_labels_are_copied() {
        let mut c = collector(CollectorSpec::counting().with_slices());
        let mut buffer = b"eu".to_vec();
        {
            let slices: [&[u8]; 1] = [buffer.as_slice()];
            c.collect(&DocValues::new(&[100]).with_slices(&slices))
                .unwrap();
        }
        buffer.copy_from_slice(b"zz");
        let map = sliced(c.finish());
        assert_eq!(map[&100][&b"eu"[..]], 1);
        assert!(!map[&100].contains_key(&b"zz"[..]));
    }

    #[test]
    fn test_distinct_per_bucket() {
        let mut c = collector(CollectorSpec::counting().with_distinct(100, 0.01));
        let ab: [&[u8]; 2] = [b"a", b"b"];
        let a: [&[u8]; 1] = [b"a"];
        c.collect(&DocValues::new(&[100, 200]).with_distinct(&ab))
            .unwrap();
        c.collect(&DocValues::new(&[100]).with_distinct(&a)).unwrap();

        match c.finish() {
            PartialAggregate::DistinctCounts(map) => {
                // Every timestamp sees every distinct value
                assert_eq!(map[&100].count(), 2);
                assert_eq!(map[&200].count(), 2);
                assert!(map[&100].is_exact());
            }
            other => panic!("unexpected shape {}", other.facet_type()),
        }
    }

    #[test]
    fn test_distinct_without_values_contributes_nothing() {
        let mut c = collector(CollectorSpec::counting().with_distinct(100, 0.01));
        c.collect(&DocValues::new(&[100])).unwrap();
        assert!(c.finish().is_empty());
    }

    #[test]
    fn test_sliced_distinct() {
        let spec = CollectorSpec::counting().with_slices().with_distinct(100, 0.01);
        let mut c = collector(spec);
        let slices: [&[u8]; 2] = [b"eu", b"us"];
        let users: [&[u8]; 3] = [b"u1", b"u2", b"u1"];
        c.collect(
            &DocValues::new(&[100])
                .with_slices(&slices)
                .with_distinct(&users),
        )
        .unwrap();

        match c.finish() {
            PartialAggregate::SlicedDistinctCounts(map) => {
                assert_eq!(map[&100].len(), 2);
                assert_eq!(map[&100][&b"eu"[..]].count(), 2);
                assert_eq!(map[&100][&b"us"[..]].count(), 2);
            }
            other => panic!("unexpected shape {}", other.facet_type()),
        }
    }

    #[test]
    fn test_sliced_distinct_empty_fields_create_no_entries() {
        let spec = CollectorSpec::counting().with_slices().with_distinct(100, 0.01);
        let mut c = collector(spec);
        let slices: [&[u8]; 1] = [b"eu"];
        c.collect(&DocValues::new(&[100]).with_slices(&slices))
            .unwrap();
        c.collect(&DocValues::new(&[100]).with_distinct(&slices))
            .unwrap();
        assert!(c.finish().is_empty());
    }

    #[test]
    fn test_collect_all_and_rounding() {
        let pool = Arc::new(MapPool::default());
        let rounding: Arc<dyn Rounding> = Arc::new(|t: i64| t - t % 100);
        let mut c = FacetCollector::new(CollectorSpec::counting(), rounding, pool);
        let timestamps = [[101i64], [150], [299]];
        c.collect_all(timestamps.iter().map(|t| DocValues::new(t)))
            .unwrap();
        let map = counts(c.finish());
        assert_eq!(map[&100], 2);
        assert_eq!(map[&200], 1);
    }

    #[test]
    fn test_collector_reuses_pooled_maps() {
        let pool = Arc::new(MapPool::default());
        let first = FacetCollector::new(CollectorSpec::counting(), identity(), pool.clone());
        pool.release_aggregate(first.finish());
        let _second = FacetCollector::new(CollectorSpec::counting(), identity(), pool.clone());
        assert_eq!(pool.stats().hits, 1);
    }
}
