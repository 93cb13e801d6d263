//! Core data types used throughout the facet engine
//!
//! # Key Types
//!
//! - **`BucketKey`**: A rounded timestamp identifying one time bucket
//! - **`Count`**: Per-bucket (or per-slice) occurrence counter
//! - **`SliceLabel`**: Owned copy of a categorical slice value
//! - **`Rounding`**: Maps a raw timestamp to its bucket key
//! - **`DocValues`**: The field values of one matching document
//!
//! # Example
//!
//! ```rust
//! use kuba_facet::types::{DocValues, IntervalRounding, Rounding};
//!
//! let hourly = IntervalRounding::new(3_600_000, 0).unwrap();
//! assert_eq!(hourly.round(7_250_000), 7_200_000);
//!
//! let timestamps = [7_250_000];
//! let slices: [&[u8]; 1] = [b"eu-west"];
//! let doc = DocValues::new(&timestamps).with_slices(&slices);
//! assert_eq!(doc.slices.len(), 1);
//! ```

use bytes::Bytes;

use crate::error::ValidationError;

/// Rounded timestamp identifying a time bucket
pub type BucketKey = i64;

/// Occurrence count stored per bucket
pub type Count = u32;

/// Categorical slice value
///
/// Always an owned copy. Values seen through [`DocValues`] borrow the
/// caller's transient buffers and are copied with [`slice_label`] before
/// being stored in a map.
pub type SliceLabel = Bytes;

/// Copy a borrowed slice value into an owned label
#[inline]
pub fn slice_label(value: &[u8]) -> SliceLabel {
    Bytes::copy_from_slice(value)
}

/// Maps a raw timestamp to the key of the bucket containing it
///
/// Implementations must be pure and deterministic. Interval and timezone
/// semantics belong entirely to the implementation.
pub trait Rounding: Send + Sync {
    /// Round a timestamp to its bucket key
    fn round(&self, timestamp: i64) -> BucketKey;
}

impl<F> Rounding for F
where
    F: Fn(i64) -> BucketKey + Send + Sync,
{
    #[inline]
    fn round(&self, timestamp: i64) -> BucketKey {
        self(timestamp)
    }
}

/// Fixed-width interval rounding
///
/// Floors each timestamp to the start of its interval, where intervals are
/// aligned to `offset`. Uses Euclidean division so timestamps before the
/// epoch land in the correct bucket. Timestamps whose interval starts below
/// `i64::MIN` saturate to `i64::MIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalRounding {
    interval: i64,
    offset: i64,
}

impl IntervalRounding {
    /// Create a rounding with the given interval and alignment offset
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfRange` if `interval` is not positive.
    pub fn new(interval: i64, offset: i64) -> Result<Self, ValidationError> {
        if interval <= 0 {
            return Err(ValidationError::OutOfRange {
                field: "interval".to_string(),
                value: interval.to_string(),
                min: "1".to_string(),
                max: i64::MAX.to_string(),
            });
        }
        Ok(Self {
            interval,
            offset: offset.rem_euclid(interval),
        })
    }

    /// Interval width
    pub fn interval(&self) -> i64 {
        self.interval
    }
}

impl Rounding for IntervalRounding {
    #[inline]
    fn round(&self, timestamp: i64) -> BucketKey {
        let interval = i128::from(self.interval);
        let offset = i128::from(self.offset);
        let bucket = (i128::from(timestamp) - offset).div_euclid(interval) * interval + offset;
        i64::try_from(bucket).unwrap_or(i64::MIN)
    }
}

/// Field values of one matching document
///
/// Every field may carry zero, one, or many values. Byte values borrow the
/// value source's buffers and are only valid for the duration of one
/// `collect` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocValues<'a> {
    /// Raw (unrounded) timestamps of the key field
    pub timestamps: &'a [i64],
    /// Occurrences of the secondary value field
    pub values: &'a [&'a [u8]],
    /// Slice field values
    pub slices: &'a [&'a [u8]],
    /// Distinct-target field values
    pub distinct: &'a [&'a [u8]],
}

impl<'a> DocValues<'a> {
    /// Create a document carrying only key field timestamps
    pub fn new(timestamps: &'a [i64]) -> Self {
        Self {
            timestamps,
            ..Self::default()
        }
    }

    /// Attach secondary value field occurrences
    pub fn with_values(mut self, values: &'a [&'a [u8]]) -> Self {
        self.values = values;
        self
    }

    /// Attach slice field values
    pub fn with_slices(mut self, slices: &'a [&'a [u8]]) -> Self {
        self.slices = slices;
        self
    }

    /// Attach distinct-target field values
    pub fn with_distinct(mut self, distinct: &'a [&'a [u8]]) -> Self {
        self.distinct = distinct;
        self
    }
}
