//! Time-bucketed facet aggregation
//!
//! This module counts matching documents per time bucket, optionally split by
//! a categorical slice field, or counts distinct values of a field per bucket.
//! Each shard produces a mergeable partial aggregate; partials travel to a
//! coordinating node, are reduced into one, and are materialized lazily into
//! a sorted, totalled result.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │          FacetExecutor              │
//! │  config → variant, rounding, pool   │
//! └─────────────────────────────────────┘
//!                  ↓  one per shard
//! ┌─────────────────────────────────────┐
//! │          FacetCollector             │
//! │  DocValues → PartialAggregate       │
//! └─────────────────────────────────────┘
//!                  ↓  codec (optional)
//! ┌─────────────────────────────────────┐
//! │             Reducer                 │
//! │  many partials → one partial        │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │            DateFacet                │
//! │  lazy sorted periods + total        │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - **DistinctCounter**: exact fingerprint set that switches one-way to a
//!   HyperLogLog sketch past a threshold
//! - **MapPool**: per-shape free lists of cleared maps, shared as
//!   `Arc<MapPool>`
//! - **Collectors**: counting, sliced, distinct and sliced-distinct variants
//! - **Reducer**: commutative fold with sequential and rayon variants
//! - **Codec**: varint wire format with a typed facet envelope
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kuba_facet::aggregation::{Collector, FacetExecutor, MapPool};
//! use kuba_facet::config::FacetConfig;
//! use kuba_facet::types::DocValues;
//!
//! let pool = Arc::new(MapPool::default());
//! let executor = FacetExecutor::with_rounding(
//!     &FacetConfig::default(),
//!     Arc::new(|t: i64| t),
//!     pool,
//! )?;
//!
//! let mut shard_a = executor.collector();
//! shard_a.collect(&DocValues::new(&[100]))?;
//! shard_a.collect(&DocValues::new(&[100]))?;
//! let mut shard_b = executor.collector();
//! shard_b.collect(&DocValues::new(&[100]))?;
//! shard_b.collect(&DocValues::new(&[200]))?;
//!
//! let facet = executor.reduce(
//!     "hits",
//!     vec![
//!         executor.build_facet("hits", shard_a),
//!         executor.build_facet("hits", shard_b),
//!     ],
//! )?;
//!
//! assert_eq!(facet.total(), 4);
//! assert_eq!(facet.time_periods()[0].count, 3);
//! # Ok::<(), kuba_facet::Error>(())
//! ```

pub mod cardinality;
pub mod codec;
pub mod collector;
pub mod executor;
pub mod facet;
pub mod partial;
pub mod pool;
pub mod reduce;

pub use cardinality::{fingerprint, DistinctCounter, HyperLogLog};
pub use codec::{decode, decode_facet, encode, encode_facet};
pub use collector::{
    Collector, CollectorSpec, CountingCollector, DistinctCollector, FacetCollector,
    SlicedCollector, SlicedDistinctCollector,
};
pub use executor::FacetExecutor;
pub use facet::{DateFacet, SliceCount, TimePeriod};
pub use partial::{FacetType, PartialAggregate};
pub use pool::{
    CountMap, DistinctMap, MapPool, PoolStats, SliceCountMap, SliceDistinctMap, SlicedCountMap,
    SlicedDistinctMap,
};
pub use reduce::Reducer;
