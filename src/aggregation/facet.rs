//! Date facets and lazy materialization
//!
//! A [`DateFacet`] wraps the reduced partial aggregate of one named facet.
//! Nothing is sorted or totalled until a result accessor is first called.
//! At that point the aggregate is turned into a sorted list of
//! [`TimePeriod`]s plus a grand total, and its maps are returned to the pool.
//! Later reads return the memoized result.
//!
//! Grand totals:
//!
//! - counting shapes: sum of all bucket counts
//! - distinct shapes: sum of the per-bucket (or per-slice) estimates, not the
//!   distinct count of the union across buckets

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use super::codec;
use super::partial::{FacetType, PartialAggregate};
use super::pool::MapPool;
use super::reduce::Reducer;
use crate::error::{Error, Result};
use crate::types::{BucketKey, SliceLabel};

// ============================================================================
// Result Records
// ============================================================================

/// Statistic for one slice of a time bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceCount {
    /// Slice value
    #[serde(serialize_with = "serialize_label")]
    pub label: SliceLabel,
    /// Count, or distinct estimate
    pub count: u64,
}

/// Statistic for one time bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimePeriod {
    /// Bucket key
    pub time: BucketKey,
    /// Count, or distinct estimate; for sliced shapes the sum over slices
    pub count: u64,
    /// Per-slice statistics sorted by label (sliced shapes only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slices: Vec<SliceCount>,
}

fn serialize_label<S: Serializer>(label: &SliceLabel, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(label))
}

#[derive(Debug)]
struct Materialized {
    periods: Vec<TimePeriod>,
    total: u64,
}

#[derive(Serialize)]
struct FacetView<'a> {
    name: &'a str,
    #[serde(rename = "_type")]
    facet_type: &'static str,
    total: u64,
    entries: &'a [TimePeriod],
}

// ============================================================================
// Date Facet
// ============================================================================

/// Named facet result over one partial aggregate
///
/// Dropping a facet that was never materialized returns its maps to the pool.
pub struct DateFacet {
    name: String,
    facet_type: FacetType,
    pending: Mutex<Option<PartialAggregate>>,
    materialized: OnceLock<Materialized>,
    pool: Arc<MapPool>,
}

impl DateFacet {
    /// Wrap a reduced (or single-shard) aggregate
    pub fn new(name: impl Into<String>, aggregate: PartialAggregate, pool: Arc<MapPool>) -> Self {
        Self {
            name: name.into(),
            facet_type: aggregate.facet_type(),
            pending: Mutex::new(Some(aggregate)),
            materialized: OnceLock::new(),
            pool,
        }
    }

    /// A facet with no buckets
    pub fn empty(name: impl Into<String>, facet_type: FacetType, pool: Arc<MapPool>) -> Self {
        let aggregate = pool.acquire_aggregate(facet_type);
        Self::new(name, aggregate, pool)
    }

    /// Facet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Facet shape
    pub fn facet_type(&self) -> FacetType {
        self.facet_type
    }

    /// Whether the result view has been built
    pub fn is_materialized(&self) -> bool {
        self.materialized.get().is_some()
    }

    /// Buckets sorted ascending by key
    pub fn time_periods(&self) -> &[TimePeriod] {
        &self.materialize().periods
    }

    /// Grand total over all buckets
    pub fn total(&self) -> u64 {
        self.materialize().total
    }

    /// Render the result view as JSON
    pub fn to_json(&self) -> Result<String> {
        let view = FacetView {
            name: &self.name,
            facet_type: self.facet_type.type_name(),
            total: self.total(),
            entries: self.time_periods(),
        };
        Ok(serde_json::to_string(&view)?)
    }

    /// Take back the partial aggregate, e.g. to reduce it further
    ///
    /// # Errors
    ///
    /// Returns `AlreadyMaterialized` once a result accessor has run.
    pub fn into_partial(mut self) -> Result<PartialAggregate> {
        match self.pending.get_mut().take() {
            Some(aggregate) => Ok(aggregate),
            None => Err(Error::AlreadyMaterialized(std::mem::take(&mut self.name))),
        }
    }

    /// Encode the facet for transport to the reducing node
    ///
    /// # Errors
    ///
    /// Returns `AlreadyMaterialized` once a result accessor has run.
    pub fn encode(&self) -> Result<Bytes> {
        match self.pending.lock().as_ref() {
            Some(aggregate) => Ok(codec::encode_facet(&self.name, aggregate)),
            None => Err(Error::AlreadyMaterialized(self.name.clone())),
        }
    }

    /// Decode a facet written by [`DateFacet::encode`]
    pub fn decode(data: &[u8], pool: Arc<MapPool>) -> Result<Self> {
        let (name, aggregate) = codec::decode_facet(data, &pool)?;
        Ok(Self::new(name, aggregate, pool))
    }

    /// Reduce per-shard facets of one shape into a single facet
    ///
    /// The result takes the name of the first facet, or `name` if `facets`
    /// is empty.
    pub fn reduce(
        name: &str,
        facet_type: FacetType,
        facets: Vec<DateFacet>,
        reducer: &Reducer,
    ) -> Result<DateFacet> {
        let name = facets
            .first()
            .map(|f| f.name.clone())
            .unwrap_or_else(|| name.to_string());

        // Facets left in the iterator on error release their own maps on drop
        let mut partials = Vec::with_capacity(facets.len());
        for facet in facets {
            match facet.into_partial() {
                Ok(partial) => partials.push(partial),
                Err(e) => {
                    for partial in partials {
                        reducer.pool().release_aggregate(partial);
                    }
                    return Err(e);
                }
            }
        }

        let aggregate = reducer.reduce(facet_type, partials)?;
        Ok(DateFacet::new(name, aggregate, Arc::clone(reducer.pool())))
    }

    fn materialize(&self) -> &Materialized {
        self.materialized.get_or_init(|| {
            let aggregate = self.pending.lock().take();
            let materialized = match aggregate {
                Some(aggregate) => {
                    let result = build_periods(&aggregate);
                    self.pool.release_aggregate(aggregate);
                    result
                }
                None => Materialized {
                    periods: Vec::new(),
                    total: 0,
                },
            };
            tracing::debug!(
                facet = %self.name,
                facet_type = %self.facet_type,
                buckets = materialized.periods.len(),
                total = materialized.total,
                "Materialized date facet"
            );
            materialized
        })
    }
}

impl Drop for DateFacet {
    fn drop(&mut self) {
        if let Some(aggregate) = self.pending.get_mut().take() {
            self.pool.release_aggregate(aggregate);
        }
    }
}

impl std::fmt::Debug for DateFacet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateFacet")
            .field("name", &self.name)
            .field("facet_type", &self.facet_type)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

fn build_periods(aggregate: &PartialAggregate) -> Materialized {
    let mut periods: Vec<TimePeriod> = match aggregate {
        PartialAggregate::Counts(map) => map
            .iter()
            .map(|(&time, &count)| TimePeriod {
                time,
                count: u64::from(count),
                slices: Vec::new(),
            })
            .collect(),
        PartialAggregate::SlicedCounts(map) => map
            .iter()
            .map(|(&time, slices)| {
                sliced_period(
                    time,
                    slices
                        .iter()
                        .map(|(label, &count)| (label, u64::from(count))),
                )
            })
            .collect(),
        PartialAggregate::DistinctCounts(map) => map
            .iter()
            .map(|(&time, counter)| TimePeriod {
                time,
                count: counter.count(),
                slices: Vec::new(),
            })
            .collect(),
        PartialAggregate::SlicedDistinctCounts(map) => map
            .iter()
            .map(|(&time, slices)| {
                sliced_period(
                    time,
                    slices.iter().map(|(label, counter)| (label, counter.count())),
                )
            })
            .collect(),
    };

    periods.sort_unstable_by_key(|p| p.time);
    let total = periods.iter().map(|p| p.count).sum();
    Materialized { periods, total }
}

fn sliced_period<'a, I>(time: BucketKey, slices: I) -> TimePeriod
where
    I: Iterator<Item = (&'a SliceLabel, u64)>,
{
    let mut slices: Vec<SliceCount> = slices
        .map(|(label, count)| SliceCount {
            label: label.clone(),
            count,
        })
        .collect();
    slices.sort_unstable_by(|a, b| a.label.cmp(&b.label));
    TimePeriod {
        time,
        count: slices.iter().map(|s| s.count).sum(),
        slices,
    }
}
