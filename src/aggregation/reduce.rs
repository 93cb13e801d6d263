//! Reduction of per-shard partial aggregates
//!
//! The reducer folds many partial aggregates of one shape into a single
//! aggregate. Counts are summed bucket-wise (and slice-wise), distinct
//! counters are merged. Keys present in only one input are moved into the
//! result without copying.
//!
//! Every input is consumed. Maps emptied by the fold are released to the
//! pool, and on error every remaining input is released before the error is
//! returned.
//!
//! Reduction is commutative: the result does not depend on the order of the
//! inputs, so [`Reducer::reduce_parallel`] may combine them in any order.

use std::sync::Arc;

use rayon::prelude::*;

use super::partial::{add_count, FacetType, PartialAggregate};
use super::pool::{
    CountMap, DistinctMap, MapPool, SliceCountMap, SliceDistinctMap, SlicedCountMap,
    SlicedDistinctMap,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::types::BucketKey;

/// Combines partial aggregates into one
#[derive(Debug, Clone)]
pub struct Reducer {
    pool: Arc<MapPool>,
}

impl Reducer {
    /// Create a reducer releasing into `pool`
    pub fn new(pool: Arc<MapPool>) -> Self {
        Self { pool }
    }

    /// Pool used for acquiring and releasing maps
    pub fn pool(&self) -> &Arc<MapPool> {
        &self.pool
    }

    /// Fold `inputs` into one aggregate of shape `facet_type`
    ///
    /// An empty input list yields an empty aggregate. A single input is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if any input is not of shape `facet_type`
    /// - `CountOverflow` if a summed count does not fit
    /// - `CardinalityMerge` if two sketches have different precisions
    pub fn reduce(
        &self,
        facet_type: FacetType,
        inputs: Vec<PartialAggregate>,
    ) -> Result<PartialAggregate> {
        let input_count = inputs.len();
        if let Err(e) = self.check_shapes(facet_type, &inputs) {
            return Err(self.abort(facet_type, inputs, e));
        }

        let mut iter = inputs.into_iter();
        let mut target = match iter.next() {
            Some(first) => first,
            None => {
                metrics::record_reduction(facet_type, "empty");
                return Ok(self.pool.acquire_aggregate(facet_type));
            }
        };

        while let Some(source) = iter.next() {
            if let Err(e) = self.merge_into(&mut target, source) {
                let mut rest: Vec<PartialAggregate> = iter.collect();
                rest.push(target);
                return Err(self.abort(facet_type, rest, e));
            }
        }

        metrics::record_reduction(facet_type, "ok");
        tracing::debug!(
            facet_type = %facet_type,
            inputs = input_count,
            buckets = target.bucket_count(),
            "Reduced partial aggregates"
        );
        Ok(target)
    }

    /// Fold `inputs` using the rayon thread pool
    ///
    /// Same result and errors as [`Reducer::reduce`].
    pub fn reduce_parallel(
        &self,
        facet_type: FacetType,
        inputs: Vec<PartialAggregate>,
    ) -> Result<PartialAggregate> {
        let input_count = inputs.len();
        if let Err(e) = self.check_shapes(facet_type, &inputs) {
            return Err(self.abort(facet_type, inputs, e));
        }

        let reduced = inputs
            .into_par_iter()
            .map(Ok)
            .try_reduce_with(|mut target, source| {
                match self.merge_into(&mut target, source) {
                    Ok(()) => Ok(target),
                    Err(e) => {
                        self.pool.release_aggregate(target);
                        Err(e)
                    }
                }
            });

        match reduced {
            None => {
                metrics::record_reduction(facet_type, "empty");
                Ok(self.pool.acquire_aggregate(facet_type))
            }
            Some(Ok(target)) => {
                metrics::record_reduction(facet_type, "ok");
                tracing::debug!(
                    facet_type = %facet_type,
                    inputs = input_count,
                    buckets = target.bucket_count(),
                    "Reduced partial aggregates in parallel"
                );
                Ok(target)
            }
            Some(Err(e)) => {
                // Inputs not yet folded were dropped by rayon
                metrics::record_reduction(facet_type, outcome(&e));
                tracing::warn!(facet_type = %facet_type, error = %e, "Parallel reduction failed");
                Err(e)
            }
        }
    }

    fn check_shapes(&self, facet_type: FacetType, inputs: &[PartialAggregate]) -> Result<()> {
        match inputs.iter().find(|a| a.facet_type() != facet_type) {
            Some(bad) => Err(Error::ShapeMismatch {
                expected: facet_type,
                actual: bad.facet_type(),
            }),
            None => Ok(()),
        }
    }

    fn abort(&self, facet_type: FacetType, inputs: Vec<PartialAggregate>, error: Error) -> Error {
        for aggregate in inputs {
            self.pool.release_aggregate(aggregate);
        }
        metrics::record_reduction(facet_type, outcome(&error));
        tracing::warn!(facet_type = %facet_type, error = %error, "Reduction failed");
        error
    }

    /// Merge `source` into `target`, releasing whatever is left of `source`
    fn merge_into(&self, target: &mut PartialAggregate, source: PartialAggregate) -> Result<()> {
        match (target, source) {
            (PartialAggregate::Counts(target), PartialAggregate::Counts(mut source)) => {
                let result = merge_counts(target, &mut source);
                self.pool.release_counts(source);
                result
            }
            (PartialAggregate::SlicedCounts(target), PartialAggregate::SlicedCounts(mut source)) => {
                let result = self.merge_sliced_counts(target, &mut source);
                self.pool.release_sliced_counts(source);
                result
            }
            (PartialAggregate::DistinctCounts(target), PartialAggregate::DistinctCounts(mut source)) => {
                let result = merge_distinct(target, &mut source);
                self.pool.release_distinct(source);
                result
            }
            (
                PartialAggregate::SlicedDistinctCounts(target),
                PartialAggregate::SlicedDistinctCounts(mut source),
            ) => {
                let result = self.merge_sliced_distinct(target, &mut source);
                self.pool.release_sliced_distinct(source);
                result
            }
            (target, source) => {
                let error = Error::ShapeMismatch {
                    expected: target.facet_type(),
                    actual: source.facet_type(),
                };
                self.pool.release_aggregate(source);
                Err(error)
            }
        }
    }

    fn merge_sliced_counts(
        &self,
        target: &mut SlicedCountMap,
        source: &mut SlicedCountMap,
    ) -> Result<()> {
        let mut entries = source.drain();
        while let Some((bucket, mut slices)) = entries.next() {
            match target.get_mut(&bucket) {
                Some(existing) => {
                    let result = merge_slice_counts(existing, &mut slices, bucket);
                    self.pool.release_slice_counts(slices);
                    if let Err(e) = result {
                        for (_, rest) in entries {
                            self.pool.release_slice_counts(rest);
                        }
                        return Err(e);
                    }
                }
                None => {
                    target.insert(bucket, slices);
                }
            }
        }
        Ok(())
    }

    fn merge_sliced_distinct(
        &self,
        target: &mut SlicedDistinctMap,
        source: &mut SlicedDistinctMap,
    ) -> Result<()> {
        let mut entries = source.drain();
        while let Some((bucket, mut slices)) = entries.next() {
            match target.get_mut(&bucket) {
                Some(existing) => {
                    let result = merge_slice_distinct(existing, &mut slices);
                    self.pool.release_slice_distinct(slices);
                    if let Err(e) = result {
                        for (_, rest) in entries {
                            self.pool.release_slice_distinct(rest);
                        }
                        return Err(e);
                    }
                }
                None => {
                    target.insert(bucket, slices);
                }
            }
        }
        Ok(())
    }
}

fn merge_counts(target: &mut CountMap, source: &mut CountMap) -> Result<()> {
    for (bucket, count) in source.drain() {
        match target.get_mut(&bucket) {
            Some(slot) => add_count(slot, bucket, u64::from(count))?,
            None => {
                target.insert(bucket, count);
            }
        }
    }
    Ok(())
}

fn merge_slice_counts(
    target: &mut SliceCountMap,
    source: &mut SliceCountMap,
    bucket: BucketKey,
) -> Result<()> {
    for (label, count) in source.drain() {
        match target.get_mut(&label) {
            Some(slot) => add_count(slot, bucket, u64::from(count))?,
            None => {
                target.insert(label, count);
            }
        }
    }
    Ok(())
}

fn merge_distinct(target: &mut DistinctMap, source: &mut DistinctMap) -> Result<()> {
    for (bucket, counter) in source.drain() {
        match target.get_mut(&bucket) {
            Some(existing) => existing.merge(counter)?,
            None => {
                target.insert(bucket, counter);
            }
        }
    }
    Ok(())
}

fn merge_slice_distinct(target: &mut SliceDistinctMap, source: &mut SliceDistinctMap) -> Result<()> {
    for (label, counter) in source.drain() {
        match target.get_mut(&label) {
            Some(existing) => existing.merge(counter)?,
            None => {
                target.insert(label, counter);
            }
        }
    }
    Ok(())
}

fn outcome(error: &Error) -> &'static str {
    match error {
        Error::ShapeMismatch { .. } => "shape_mismatch",
        Error::CountOverflow { .. } => "overflow",
        Error::CardinalityMerge(_) => "merge_error",
        _ => "error",
    }
}
