//! Metrics and telemetry for facet aggregation
//!
//! Prometheus metrics for collection volume, reductions, map pool reuse,
//! estimator mode switches, and decode failures, plus the `tracing`
//! subscriber setup used by embedding services.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder,
};

use crate::aggregation::{FacetType, PoolStats};
use crate::config::MonitoringConfig;
use crate::error::{Error, Result};

lazy_static! {
    // === Collection and Reduction ===

    /// Documents that contributed to a partial aggregate
    pub static ref DOCUMENTS_COLLECTED: CounterVec = register_counter_vec!(
        "facet_documents_collected_total",
        "Documents folded into partial aggregates",
        &["facet_type"]
    ).unwrap();

    /// Reductions by outcome
    pub static ref REDUCTIONS_TOTAL: CounterVec = register_counter_vec!(
        "facet_reductions_total",
        "Partial aggregate reductions",
        &["facet_type", "outcome"]
    ).unwrap();

    /// Distinct counters that switched to approximate mode
    pub static ref ESTIMATOR_CONVERSIONS: Counter = register_counter!(
        "facet_estimator_conversions_total",
        "Distinct counters converted from exact to approximate mode"
    ).unwrap();

    /// Wire decode failures
    pub static ref DECODE_ERRORS: CounterVec = register_counter_vec!(
        "facet_decode_errors_total",
        "Partial aggregate decode failures",
        &["reason"]
    ).unwrap();

    // === Map Pool ===

    /// Cumulative pool operations, as last published
    pub static ref POOL_OPERATIONS: GaugeVec = register_gauge_vec!(
        "facet_pool_operations",
        "Map pool operations since startup",
        &["outcome"]
    ).unwrap();

    /// Maps held on pool free lists
    pub static ref POOL_RETAINED: Gauge = register_gauge!(
        "facet_pool_retained_maps",
        "Cleared maps currently retained by the pool"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    lazy_static::initialize(&DOCUMENTS_COLLECTED);
    lazy_static::initialize(&REDUCTIONS_TOTAL);
    lazy_static::initialize(&ESTIMATOR_CONVERSIONS);
    lazy_static::initialize(&DECODE_ERRORS);
    lazy_static::initialize(&POOL_OPERATIONS);
    lazy_static::initialize(&POOL_RETAINED);

    tracing::info!("Facet metrics initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> std::result::Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record documents folded by one collector
#[inline]
pub fn record_documents_collected(facet_type: FacetType, documents: u64) {
    DOCUMENTS_COLLECTED
        .with_label_values(&[facet_type.type_name()])
        .inc_by(documents as f64);
}

/// Record a reduction
#[inline]
pub fn record_reduction(facet_type: FacetType, outcome: &str) {
    REDUCTIONS_TOTAL
        .with_label_values(&[facet_type.type_name(), outcome])
        .inc();
}

/// Record an exact to approximate switch
#[inline]
pub fn record_estimator_conversion() {
    ESTIMATOR_CONVERSIONS.inc();
}

/// Record a decode failure
#[inline]
pub fn record_decode_error(reason: &str) {
    DECODE_ERRORS.with_label_values(&[reason]).inc();
}

/// Publish a pool statistics snapshot
pub fn update_pool_stats(stats: &PoolStats) {
    POOL_OPERATIONS
        .with_label_values(&["hit"])
        .set(stats.hits as f64);
    POOL_OPERATIONS
        .with_label_values(&["miss"])
        .set(stats.misses as f64);
    POOL_OPERATIONS
        .with_label_values(&["release"])
        .set(stats.releases as f64);
    POOL_OPERATIONS
        .with_label_values(&["discard"])
        .set(stats.discards as f64);
    POOL_RETAINED.set(stats.retained as f64);
}

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns a configuration error if a global subscriber is already set.
pub fn init_tracing(config: &MonitoringConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| Error::Configuration(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reduction() {
        record_reduction(FacetType::Counting, "ok");
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("facet_reductions_total"));
        assert!(metrics.contains("counting_date_facet"));
    }

    #[test]
    fn test_estimator_conversion_counter() {
        let before = ESTIMATOR_CONVERSIONS.get();
        record_estimator_conversion();
        assert!(ESTIMATOR_CONVERSIONS.get() >= before + 1.0);
    }

    #[test]
    fn test_pool_gauges() {
        update_pool_stats(&PoolStats {
            hits: 3,
            misses: 1,
            releases: 2,
            discards: 0,
            retained: 2,
        });
        init();
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("facet_pool_operations"));
        assert!(metrics.contains("facet_pool_retained_maps"));
    }

    #[test]
    fn test_init_tracing_twice_fails_cleanly() {
        let config = MonitoringConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
