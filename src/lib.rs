//! Kuba Facet - approximate time-bucketed facet aggregation
//!
//! This library provides date facets for sharded search and analytics:
//! - Per-bucket document counts, optionally split by a slice field
//! - Per-bucket distinct counts with an exact to HyperLogLog switch
//! - Mergeable partial aggregates with a compact wire format
//! - Pooled map reuse across shards and queries
//! - Lazy, memoized materialization of sorted results

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Date facet collectors, reduction, codec and materialization
pub mod aggregation;

// Re-export main types
pub use aggregation::{DateFacet, FacetExecutor, FacetType, MapPool, PartialAggregate};
pub use config::FacetConfig;
pub use error::{Error, Result};
pub use types::{BucketKey, DocValues, IntervalRounding, Rounding};
