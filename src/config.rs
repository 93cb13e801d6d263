//! Configuration management for facet aggregation
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.
//!
//! ```toml
//! [fields]
//! key_field = "timestamp"
//! slice_field = "region"
//! distinct_field = "user_id"
//!
//! [estimator]
//! exact_threshold = 1000
//! tolerance = 0.01
//!
//! [rounding]
//! interval_ms = 3600000
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationError};
use crate::types::IntervalRounding;

/// Largest exact threshold accepted by validation
pub const MAX_EXACT_THRESHOLD: usize = 10_000_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FacetConfig {
    /// Document fields read by the facet
    #[serde(default)]
    pub fields: FieldsConfig,

    /// Distinct counter settings
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Time bucket rounding
    #[serde(default)]
    pub rounding: RoundingConfig,

    /// Map pool limits
    #[serde(default)]
    pub pool: PoolConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Field selection
///
/// Which optional fields are set decides the collector variant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldsConfig {
    /// Timestamp field that defines the buckets
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// Count occurrences of this field instead of documents
    #[serde(default)]
    pub value_field: Option<String>,

    /// Split each bucket by this field's values
    #[serde(default)]
    pub slice_field: Option<String>,

    /// Count distinct values of this field
    #[serde(default)]
    pub distinct_field: Option<String>,
}

/// Distinct counter configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EstimatorConfig {
    /// Largest distinct count tracked exactly
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: usize,

    /// Target relative error once approximate (0 < tolerance < 1)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

/// Bucket rounding configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoundingConfig {
    /// Bucket width in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,

    /// Bucket alignment offset in milliseconds
    #[serde(default)]
    pub offset_ms: i64,
}

/// Map pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Cleared maps kept per map shape
    #[serde(default = "default_max_retained_per_shape")]
    pub max_retained_per_shape: usize,

    /// Released maps with a larger capacity are dropped
    #[serde(default = "default_max_map_capacity")]
    pub max_map_capacity: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_key_field() -> String { "timestamp".to_string() }
fn default_exact_threshold() -> usize { 1000 }
fn default_tolerance() -> f64 { 0.01 }
fn default_interval_ms() -> i64 { 3_600_000 }
fn default_max_retained_per_shape() -> usize { 64 }
fn default_max_map_capacity() -> usize { 65_536 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            key_field: default_key_field(),
            value_field: None,
            slice_field: None,
            distinct_field: None,
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            exact_threshold: default_exact_threshold(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            offset_ms: 0,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained_per_shape: default_max_retained_per_shape(),
            max_map_capacity: default_max_map_capacity(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl RoundingConfig {
    /// Build the interval rounding described by this section
    pub fn build(&self) -> Result<IntervalRounding> {
        Ok(IntervalRounding::new(self.interval_ms, self.offset_ms)?)
    }
}

impl FacetConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Fields
        if let Ok(field) = std::env::var("FACET_KEY_FIELD") {
            self.fields.key_field = field;
        }
        if let Ok(field) = std::env::var("FACET_VALUE_FIELD") {
            self.fields.value_field = non_empty(field);
        }
        if let Ok(field) = std::env::var("FACET_SLICE_FIELD") {
            self.fields.slice_field = non_empty(field);
        }
        if let Ok(field) = std::env::var("FACET_DISTINCT_FIELD") {
            self.fields.distinct_field = non_empty(field);
        }

        // Estimator
        if let Ok(threshold) = std::env::var("FACET_EXACT_THRESHOLD") {
            if let Ok(t) = threshold.parse() {
                self.estimator.exact_threshold = t;
            }
        }
        if let Ok(tolerance) = std::env::var("FACET_TOLERANCE") {
            if let Ok(t) = tolerance.parse() {
                self.estimator.tolerance = t;
            }
        }

        // Rounding
        if let Ok(interval) = std::env::var("FACET_INTERVAL_MS") {
            if let Ok(i) = interval.parse() {
                self.rounding.interval_ms = i;
            }
        }
        if let Ok(offset) = std::env::var("FACET_OFFSET_MS") {
            if let Ok(o) = offset.parse() {
                self.rounding.offset_ms = o;
            }
        }

        // Pool
        if let Ok(retained) = std::env::var("FACET_POOL_MAX_RETAINED") {
            if let Ok(r) = retained.parse() {
                self.pool.max_retained_per_shape = r;
            }
        }
        if let Ok(capacity) = std::env::var("FACET_POOL_MAX_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.pool.max_map_capacity = c;
            }
        }

        // Monitoring
        if let Ok(enabled) = std::env::var("FACET_METRICS_ENABLED") {
            if let Ok(e) = enabled.parse() {
                self.monitoring.metrics_enabled = e;
            }
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.fields.key_field.trim().is_empty() {
            return Err(ValidationError::MissingField("fields.key_field".to_string()).into());
        }

        if self.estimator.exact_threshold > MAX_EXACT_THRESHOLD {
            return Err(ValidationError::OutOfRange {
                field: "estimator.exact_threshold".to_string(),
                value: self.estimator.exact_threshold.to_string(),
                min: "0".to_string(),
                max: MAX_EXACT_THRESHOLD.to_string(),
            }
            .into());
        }

        let tolerance = self.estimator.tolerance;
        if !(tolerance.is_finite() && tolerance > 0.0 && tolerance < 1.0) {
            return Err(ValidationError::OutOfRange {
                field: "estimator.tolerance".to_string(),
                value: tolerance.to_string(),
                min: "0 (exclusive)".to_string(),
                max: "1 (exclusive)".to_string(),
            }
            .into());
        }

        self.rounding.build()?;

        if self.pool.max_map_capacity == 0 {
            return Err(ValidationError::Failed("pool.max_map_capacity must be > 0".to_string()).into());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
