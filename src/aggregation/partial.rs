//! Partial aggregates
//!
//! A `PartialAggregate` is what one collector produces over one shard. It is
//! one of four shapes, matching the four collector variants. Maps are
//! unordered; buckets are sorted only when a facet is materialized.

use std::fmt;

use super::pool::{CountMap, DistinctMap, SlicedCountMap, SlicedDistinctMap};
use crate::error::{Error, Result};
use crate::types::{BucketKey, Count};

/// The four facet shapes
///
/// Each shape carries the stream type name used to tag it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacetType {
    /// Per-bucket counts
    Counting,
    /// Per-bucket, per-slice counts
    Sliced,
    /// Per-bucket distinct counts
    Distinct,
    /// Per-bucket, per-slice distinct counts
    SlicedDistinct,
}

impl FacetType {
    /// Every facet type, in tag order
    pub const ALL: [FacetType; 4] = [
        FacetType::Counting,
        FacetType::Sliced,
        FacetType::Distinct,
        FacetType::SlicedDistinct,
    ];

    /// Stream type name registered for this shape
    pub fn type_name(&self) -> &'static str {
        match self {
            FacetType::Counting => "counting_date_facet",
            FacetType::Sliced => "sliced_date_facet",
            FacetType::Distinct => "distinct_date_facet",
            FacetType::SlicedDistinct => "sliced_distinct_date_facet",
        }
    }

    /// Look up a shape by its stream type name
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_name() == name)
    }

    /// Whether the shape splits buckets by slice
    pub fn is_sliced(&self) -> bool {
        matches!(self, FacetType::Sliced | FacetType::SlicedDistinct)
    }

    /// Whether the shape counts distinct values
    pub fn is_distinct(&self) -> bool {
        matches!(self, FacetType::Distinct | FacetType::SlicedDistinct)
    }
}

impl fmt::Display for FacetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Accumulator produced by one collector over one shard
#[derive(Debug, Clone, PartialEq)]
pub enum PartialAggregate {
    /// Bucket → count
    Counts(CountMap),
    /// Bucket → slice → count
    SlicedCounts(SlicedCountMap),
    /// Bucket → distinct counter
    DistinctCounts(DistinctMap),
    /// Bucket → slice → distinct counter
    SlicedDistinctCounts(SlicedDistinctMap),
}

impl PartialAggregate {
    /// Shape of this aggregate
    pub fn facet_type(&self) -> FacetType {
        match self {
            PartialAggregate::Counts(_) => FacetType::Counting,
            PartialAggregate::SlicedCounts(_) => FacetType::Sliced,
            PartialAggregate::DistinctCounts(_) => FacetType::Distinct,
            PartialAggregate::SlicedDistinctCounts(_) => FacetType::SlicedDistinct,
        }
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        match self {
            PartialAggregate::Counts(map) => map.len(),
            PartialAggregate::SlicedCounts(map) => map.len(),
            PartialAggregate::DistinctCounts(map) => map.len(),
            PartialAggregate::SlicedDistinctCounts(map) => map.len(),
        }
    }

    /// Whether no bucket has been recorded
    pub fn is_empty(&self) -> bool {
        self.bucket_count() == 0
    }
}

/// Add `increment` to a count slot, failing instead of wrapping
#[inline]
pub(crate) fn add_count(slot: &mut Count, bucket: BucketKey, increment: u64) -> Result<()> {
    let current = *slot;
    match u64::from(current)
        .checked_add(increment)
        .and_then(|sum| Count::try_from(sum).ok())
    {
        Some(sum) => {
            *slot = sum;
            Ok(())
        }
        None => Err(Error::CountOverflow {
            bucket,
            current,
            increment,
        }),
    }
}
