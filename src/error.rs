//! Error types for facet aggregation

use thiserror::Error;

use crate::aggregation::FacetType;
use crate::types::BucketKey;

/// Main error type for the facet engine
#[derive(Error, Debug)]
pub enum Error {
    /// Wire encoding or decoding error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Estimators could not be merged
    #[error("Cardinality merge error: {0}")]
    CardinalityMerge(#[from] CardinalityMergeError),

    /// A bucket count left the representable range
    #[error("Count overflow in bucket {bucket}: {current} + {increment} exceeds u32")]
    CountOverflow {
        /// Bucket whose count overflowed
        bucket: BucketKey,
        /// Count held before the failed addition
        current: u32,
        /// Amount that was being added
        increment: u64,
    },

    /// Partial aggregates of different shapes were combined
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Shape the reduction was asked to produce
        expected: FacetType,
        /// Shape actually found in the input list
        actual: FacetType,
    },

    /// A facet was read after its partial aggregate was consumed
    #[error("Facet '{0}' has already been materialized")]
    AlreadyMaterialized(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Result rendering error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Wire codec errors
///
/// Any decode error means the partial aggregate under construction is
/// discarded by the caller; its maps never go back to the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read
    #[error("Truncated input: needed {needed} more bytes at offset {offset}")]
    Truncated {
        /// Byte offset where the read started
        offset: usize,
        /// Bytes still required
        needed: usize,
    },

    /// Varint did not terminate within 64 bits
    #[error("Varint overflow at offset {0}")]
    VarintOverflow(usize),

    /// Decoded value does not fit the target integer type
    #[error("Value {value} out of range for {target}")]
    OutOfRange {
        /// Decoded raw value
        value: u64,
        /// Name of the target type
        target: &'static str,
    },

    /// Length prefix cannot be satisfied by the remaining input
    #[error("Invalid length {length} at offset {offset}")]
    InvalidLength {
        /// Decoded length
        length: u64,
        /// Byte offset of the length prefix
        offset: usize,
    },

    /// Unknown estimator mode tag
    #[error("Invalid estimator mode tag {0}")]
    InvalidMode(u8),

    /// Sketch precision outside the supported range
    #[error("Invalid sketch precision {0}")]
    InvalidPrecision(u8),

    /// Facet type name not registered
    #[error("Unknown facet type '{0}'")]
    UnknownFacetType(String),

    /// String field was not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A bucket or slice key appeared twice in one map
    #[error("Duplicate key at offset {offset}")]
    DuplicateKey {
        /// Byte offset where the repeated key starts
        offset: usize,
    },

    /// Bytes left over after a complete facet was decoded
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Error when merging cardinality estimators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CardinalityMergeError {
    /// Two sketches of different sizes cannot be combined register-wise
    #[error("Cannot merge sketches with different precision: {self_precision} vs {other_precision}")]
    MismatchedPrecision {
        /// Precision of the receiving estimator
        self_precision: u8,
        /// Precision of the merged-in estimator
        other_precision: u8,
    },
}

/// Validation errors for configuration
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    Failed(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_converts_to_configuration() {
        let err: Error = ValidationError::MissingField("key_field".to_string()).into();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("key_field")));
    }

    #[test]
    fn test_overflow_message() {
        let err = Error::CountOverflow {
            bucket: 3_600_000,
            current: u32::MAX,
            increment: 1,
        };
        assert!(err.to_string().contains("3600000"));
    }
}
