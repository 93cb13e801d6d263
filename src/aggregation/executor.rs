//! Per-query facet execution
//!
//! `FacetExecutor` turns a validated [`FacetConfig`] into the pieces a query
//! needs: one collector per shard, the date facet wrapping each shard's
//! result, and the reduction of those facets on the coordinating node.

use std::sync::Arc;

use super::collector::{Collector, CollectorSpec, FacetCollector};
use super::facet::DateFacet;
use super::partial::FacetType;
use super::pool::MapPool;
use super::reduce::Reducer;
use crate::config::{FacetConfig, FieldsConfig};
use crate::error::Result;
use crate::metrics;
use crate::types::Rounding;

/// Builds collectors and facets for one configured date facet
pub struct FacetExecutor {
    fields: FieldsConfig,
    spec: CollectorSpec,
    rounding: Arc<dyn Rounding>,
    reducer: Reducer,
}

impl FacetExecutor {
    /// Create an executor using the configured interval rounding
    pub fn new(config: &FacetConfig, pool: Arc<MapPool>) -> Result<Self> {
        config.validate()?;
        let rounding = Arc::new(config.rounding.build()?);
        Self::with_rounding(config, rounding, pool)
    }

    /// Create an executor with a caller-supplied rounding
    pub fn with_rounding(
        config: &FacetConfig,
        rounding: Arc<dyn Rounding>,
        pool: Arc<MapPool>,
    ) -> Result<Self> {
        config.validate()?;
        if config.monitoring.metrics_enabled {
            metrics::init();
        }

        let fields = config.fields.clone();
        let mut spec = CollectorSpec::counting();
        if fields.value_field.is_some() {
            spec = spec.with_value_field();
        }
        if fields.slice_field.is_some() {
            spec = spec.with_slices();
        }
        if fields.distinct_field.is_some() {
            spec = spec.with_distinct(
                config.estimator.exact_threshold,
                config.estimator.tolerance,
            );
        }

        tracing::debug!(
            key_field = %fields.key_field,
            facet_type = %spec.facet_type(),
            exact_threshold = spec.exact_threshold,
            precision = spec.precision,
            "Created facet executor"
        );

        Ok(Self {
            fields,
            spec,
            rounding,
            reducer: Reducer::new(pool),
        })
    }

    /// Shape of the facets this executor produces
    pub fn facet_type(&self) -> FacetType {
        self.spec.facet_type()
    }

    /// Field selection
    pub fn fields(&self) -> &FieldsConfig {
        &self.fields
    }

    /// Collector settings derived from the configuration
    pub fn spec(&self) -> CollectorSpec {
        self.spec
    }

    /// Shared map pool
    pub fn pool(&self) -> &Arc<MapPool> {
        self.reducer.pool()
    }

    /// Reducer bound to the shared pool
    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    /// New collector for one shard
    pub fn collector(&self) -> FacetCollector {
        FacetCollector::new(
            self.spec,
            Arc::clone(&self.rounding),
            Arc::clone(self.pool()),
        )
    }

    /// Wrap a finished shard collector in a named facet
    pub fn build_facet(&self, name: impl Into<String>, collector: FacetCollector) -> DateFacet {
        DateFacet::new(name, collector.finish(), Arc::clone(self.pool()))
    }

    /// Reduce per-shard facets into the final facet
    pub fn reduce(&self, name: &str, facets: Vec<DateFacet>) -> Result<DateFacet> {
        let facet = DateFacet::reduce(name, self.facet_type(), facets, &self.reducer)?;
        self.pool().publish_metrics();
        Ok(facet)
    }
}

impl std::fmt::Debug for FacetExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacetExecutor")
            .field("fields", &self.fields)
            .field("spec", &self.spec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::DocValues;

    fn executor(config: &FacetConfig) -> FacetExecutor {
        FacetExecutor::new(config, Arc::new(MapPool::default())).unwrap()
    }

    #[test]
    fn test_variant_follows_fields() {
        let mut config = FacetConfig::default();
        assert_eq!(executor(&config).facet_type(), FacetType::Counting);

        config.fields.value_field = Some("bytes".to_string());
        assert_eq!(executor(&config).facet_type(), FacetType::Counting);
        assert!(executor(&config).spec().count_values);

        config.fields.slice_field = Some("region".to_string());
        assert_eq!(executor(&config).facet_type(), FacetType::Sliced);

        config.fields.distinct_field = Some("user".to_string());
        assert_eq!(executor(&config).facet_type(), FacetType::SlicedDistinct);

        config.fields.slice_field = None;
        assert_eq!(executor(&config).facet_type(), FacetType::Distinct);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FacetConfig::default();
        config.estimator.tolerance = 2.0;
        assert!(matches!(
            FacetExecutor::new(&config, Arc::new(MapPool::default())),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_hourly_buckets_end_to_end() {
        let exec = executor(&FacetConfig::default());
        let hour = 3_600_000;

        let mut shard_a = exec.collector();
        shard_a.collect(&DocValues::new(&[10])).unwrap();
        shard_a.collect(&DocValues::new(&[hour + 5])).unwrap();
        let mut shard_b = exec.collector();
        shard_b.collect(&DocValues::new(&[hour - 1])).unwrap();

        let facets = vec![
            exec.build_facet("per_hour", shard_a),
            exec.build_facet("per_hour", shard_b),
        ];
        let facet = exec.reduce("per_hour", facets).unwrap();

        let periods: Vec<(i64, u64)> = facet
            .time_periods()
            .iter()
            .map(|p| (p.time, p.count))
            .collect();
        assert_eq!(periods, vec![(0, 2), (hour, 1)]);
        assert_eq!(facet.total(), 3);
    }

    #[test]
    fn test_custom_rounding() {
        let config = FacetConfig::default();
        let exec = FacetExecutor::with_rounding(
            &config,
            Arc::new(|t: i64| t / 10),
            Arc::new(MapPool::default()),
        )
        .unwrap();
        let mut collector = exec.collector();
        collector.collect(&DocValues::new(&[42])).unwrap();
        let facet = exec.build_facet("tens", collector);
        assert_eq!(facet.time_periods()[0].time, 4);
    }
}
