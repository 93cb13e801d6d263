//! Wire codec for partial aggregates
//!
//! Partial aggregates travel between shards and the reducing node as compact
//! byte payloads. Integers use LEB128 varints; bucket keys are zigzag encoded
//! first so negative timestamps stay short.
//!
//! # Format
//!
//! ```text
//! counts          := varint(n) { zigzag(bucket) varint(count) }*n
//! sliced counts   := varint(n) { zigzag(bucket) varint(m) { bytes(label) varint(count) }*m }*n
//! distinct        := varint(n) { zigzag(bucket) estimator }*n
//! sliced distinct := varint(n) { zigzag(bucket) varint(m) { bytes(label) estimator }*m }*n
//!
//! estimator       := u8(mode) varint(threshold) u8(precision) state
//! state           := varint(k) { u64le(fingerprint) }*k     (mode 0, exact)
//!                  | u8[2^precision] registers              (mode 1, approximate)
//!
//! bytes(x)        := varint(len) x
//! facet           := bytes(type_name) bytes(facet_name) payload
//! ```
//!
//! Entries are written in ascending key order, so equal aggregates encode to
//! identical bytes. An aggregate with zero buckets encodes as the single byte
//! `0x00`.
//!
//! Decoding acquires its maps from the [`MapPool`]. If decoding fails part
//! way, the partially built maps are dropped rather than released.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use bytes::{BufMut, Bytes, BytesMut};

use super::cardinality::{DistinctCounter, HyperLogLog};
use super::partial::{FacetType, PartialAggregate};
use super::pool::{
    CountMap, DistinctMap, MapPool, SliceCountMap, SliceDistinctMap, SlicedCountMap,
    SlicedDistinctMap,
};
use crate::error::{CodecError, Result};
use crate::metrics;
use crate::types::{slice_label, BucketKey, Count};

const MODE_EXACT: u8 = 0;
const MODE_APPROXIMATE: u8 = 1;

/// Longest LEB128 encoding of a u64
const MAX_VARINT_LEN: usize = 10;

// ============================================================================
// Primitive Writer
// ============================================================================

struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    fn write_varint(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn write_zigzag(&mut self, value: i64) {
        self.write_varint(zigzag_encode(value));
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    fn write_estimator(&mut self, counter: &DistinctCounter) {
        match counter.sketch() {
            Some(sketch) => {
                self.buf.put_u8(MODE_APPROXIMATE);
                self.write_varint(counter.exact_threshold() as u64);
                self.buf.put_u8(sketch.precision());
                self.buf.put_slice(sketch.registers());
            }
            None => {
                self.buf.put_u8(MODE_EXACT);
                self.write_varint(counter.exact_threshold() as u64);
                self.buf.put_u8(counter.precision());
                let mut fingerprints: Vec<u64> =
                    counter.fingerprints().into_iter().flatten().copied().collect();
                fingerprints.sort_unstable();
                self.write_varint(fingerprints.len() as u64);
                for fp in fingerprints {
                    self.buf.put_u64_le(fp);
                }
            }
        }
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[inline]
fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}

// ============================================================================
// Primitive Reader
// ============================================================================

struct WireReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, needed: usize) -> std::result::Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed,
            });
        }
        let bytes = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> std::result::Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u64_le(&mut self) -> std::result::Result<u64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn read_varint(&mut self) -> std::result::Result<u64, CodecError> {
        let start = self.offset;
        let mut result: u64 = 0;
        let mut shift = 0u32;

        for (i, &byte) in self.data[start..].iter().enumerate() {
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(CodecError::VarintOverflow(start));
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                self.offset = start + i + 1;
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::VarintOverflow(start));
            }
        }

        Err(CodecError::Truncated {
            offset: self.data.len(),
            needed: 1,
        })
    }

    fn read_zigzag(&mut self) -> std::result::Result<BucketKey, CodecError> {
        Ok(zigzag_decode(self.read_varint()?))
    }

    fn read_count(&mut self) -> std::result::Result<Count, CodecError> {
        let value = self.read_varint()?;
        Count::try_from(value).map_err(|_| CodecError::OutOfRange {
            value,
            target: "count",
        })
    }

    /// Read an entry count, rejecting counts the remaining input cannot hold
    fn read_len(&mut self, min_entry_size: usize) -> std::result::Result<usize, CodecError> {
        let offset = self.offset;
        let length = self.read_varint()?;
        let fits = usize::try_from(length)
            .ok()
            .and_then(|n| n.checked_mul(min_entry_size))
            .map_or(false, |bytes| bytes <= self.remaining());
        if !fits {
            return Err(CodecError::InvalidLength { length, offset });
        }
        Ok(length as usize)
    }

    fn read_bytes(&mut self) -> std::result::Result<&'a [u8], CodecError> {
        let len = self.read_len(1)?;
        self.take(len)
    }

    fn read_str(&mut self, what: &'static str) -> std::result::Result<&'a str, CodecError> {
        std::str::from_utf8(self.read_bytes()?).map_err(|_| CodecError::InvalidUtf8(what))
    }

    fn read_estimator(&mut self) -> std::result::Result<DistinctCounter, CodecError> {
        let mode = self.read_u8()?;
        let threshold = self.read_varint()?;
        let exact_threshold = usize::try_from(threshold).map_err(|_| CodecError::OutOfRange {
            value: threshold,
            target: "exact threshold",
        })?;
        let precision = self.read_u8()?;
        if !(HyperLogLog::MIN_PRECISION..=HyperLogLog::MAX_PRECISION).contains(&precision) {
            return Err(CodecError::InvalidPrecision(precision));
        }

        match mode {
            MODE_EXACT => {
                let count = self.read_len(8)?;
                let mut fingerprints = HashSet::with_capacity(count);
                for _ in 0..count {
                    let offset = self.offset;
                    if !fingerprints.insert(self.read_u64_le()?) {
                        return Err(CodecError::DuplicateKey { offset });
                    }
                }
                Ok(DistinctCounter::from_fingerprints(
                    exact_threshold,
                    precision,
                    fingerprints,
                ))
            }
            MODE_APPROXIMATE => {
                let registers = self.take(1usize << precision)?.to_vec();
                let sketch = HyperLogLog::from_registers(precision, registers)?;
                Ok(DistinctCounter::from_sketch(exact_threshold, sketch))
            }
            other => Err(CodecError::InvalidMode(other)),
        }
    }

    fn finish(&self) -> std::result::Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

// ============================================================================
// Shape Payloads
// ============================================================================

fn sorted<K: Ord, V>(map: &HashMap<K, V>) -> Vec<(&K, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    entries
}

fn write_payload(w: &mut WireWriter, aggregate: &PartialAggregate) {
    match aggregate {
        PartialAggregate::Counts(map) => {
            w.write_varint(map.len() as u64);
            for (&bucket, &count) in sorted(map) {
                w.write_zigzag(bucket);
                w.write_varint(u64::from(count));
            }
        }
        PartialAggregate::SlicedCounts(map) => {
            w.write_varint(map.len() as u64);
            for (&bucket, slices) in sorted(map) {
                w.write_zigzag(bucket);
                w.write_varint(slices.len() as u64);
                for (label, &count) in sorted(slices) {
                    w.write_bytes(label);
                    w.write_varint(u64::from(count));
                }
            }
        }
        PartialAggregate::DistinctCounts(map) => {
            w.write_varint(map.len() as u64);
            for (&bucket, counter) in sorted(map) {
                w.write_zigzag(bucket);
                w.write_estimator(counter);
            }
        }
        PartialAggregate::SlicedDistinctCounts(map) => {
            w.write_varint(map.len() as u64);
            for (&bucket, slices) in sorted(map) {
                w.write_zigzag(bucket);
                w.write_varint(slices.len() as u64);
                for (label, counter) in sorted(slices) {
                    w.write_bytes(label);
                    w.write_estimator(counter);
                }
            }
        }
    }
}

fn insert_unique<K: Eq + Hash, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: V,
    offset: usize,
) -> std::result::Result<(), CodecError> {
    match map.entry(key) {
        Entry::Occupied(_) => Err(CodecError::DuplicateKey { offset }),
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

fn read_counts(r: &mut WireReader<'_>, pool: &MapPool) -> std::result::Result<CountMap, CodecError> {
    let n = r.read_len(2)?;
    let mut map = pool.acquire_counts();
    map.reserve(n);
    for _ in 0..n {
        let offset = r.offset;
        let bucket = r.read_zigzag()?;
        let count = r.read_count()?;
        insert_unique(&mut map, bucket, count, offset)?;
    }
    Ok(map)
}

fn read_slice_counts(
    r: &mut WireReader<'_>,
    pool: &MapPool,
) -> std::result::Result<SliceCountMap, CodecError> {
    let m = r.read_len(2)?;
    let mut map = pool.acquire_slice_counts();
    map.reserve(m);
    for _ in 0..m {
        let offset = r.offset;
        let label = slice_label(r.read_bytes()?);
        let count = r.read_count()?;
        insert_unique(&mut map, label, count, offset)?;
    }
    Ok(map)
}

fn read_sliced_counts(
    r: &mut WireReader<'_>,
    pool: &MapPool,
) -> std::result::Result<SlicedCountMap, CodecError> {
    let n = r.read_len(2)?;
    let mut map = pool.acquire_sliced_counts();
    map.reserve(n);
    for _ in 0..n {
        let offset = r.offset;
        let bucket = r.read_zigzag()?;
        let slices = read_slice_counts(r, pool)?;
        insert_unique(&mut map, bucket, slices, offset)?;
    }
    Ok(map)
}

fn read_distinct(
    r: &mut WireReader<'_>,
    pool: &MapPool,
) -> std::result::Result<DistinctMap, CodecError> {
    let n = r.read_len(4)?;
    let mut map = pool.acquire_distinct();
    map.reserve(n);
    for _ in 0..n {
        let offset = r.offset;
        let bucket = r.read_zigzag()?;
        let counter = r.read_estimator()?;
        insert_unique(&mut map, bucket, counter, offset)?;
    }
    Ok(map)
}

fn read_slice_distinct(
    r: &mut WireReader<'_>,
    pool: &MapPool,
) -> std::result::Result<SliceDistinctMap, CodecError> {
    let m = r.read_len(4)?;
    let mut map = pool.acquire_slice_distinct();
    map.reserve(m);
    for _ in 0..m {
        let offset = r.offset;
        let label = slice_label(r.read_bytes()?);
        let counter = r.read_estimator()?;
        insert_unique(&mut map, label, counter, offset)?;
    }
    Ok(map)
}

fn read_sliced_distinct(
    r: &mut WireReader<'_>,
    pool: &MapPool,
) -> std::result::Result<SlicedDistinctMap, CodecError> {
    let n = r.read_len(2)?;
    let mut map = pool.acquire_sliced_distinct();
    map.reserve(n);
    for _ in 0..n {
        let offset = r.offset;
        let bucket = r.read_zigzag()?;
        let slices = read_slice_distinct(r, pool)?;
        insert_unique(&mut map, bucket, slices, offset)?;
    }
    Ok(map)
}

fn read_payload(
    r: &mut WireReader<'_>,
    facet_type: FacetType,
    pool: &MapPool,
) -> std::result::Result<PartialAggregate, CodecError> {
    Ok(match facet_type {
        FacetType::Counting => PartialAggregate::Counts(read_counts(r, pool)?),
        FacetType::Sliced => PartialAggregate::SlicedCounts(read_sliced_counts(r, pool)?),
        FacetType::Distinct => PartialAggregate::DistinctCounts(read_distinct(r, pool)?),
        FacetType::SlicedDistinct => {
            PartialAggregate::SlicedDistinctCounts(read_sliced_distinct(r, pool)?)
        }
    })
}

fn decode_failed(facet_type: Option<FacetType>, error: CodecError) -> crate::error::Error {
    let reason = match &error {
        CodecError::Truncated { .. } => "truncated",
        CodecError::VarintOverflow(_) => "varint_overflow",
        CodecError::OutOfRange { .. } => "out_of_range",
        CodecError::InvalidLength { .. } => "invalid_length",
        CodecError::InvalidMode(_) => "invalid_mode",
        CodecError::InvalidPrecision(_) => "invalid_precision",
        CodecError::UnknownFacetType(_) => "unknown_type",
        CodecError::InvalidUtf8(_) => "invalid_utf8",
        CodecError::DuplicateKey { .. } => "duplicate_key",
        CodecError::TrailingBytes(_) => "trailing_bytes",
    };
    metrics::record_decode_error(reason);
    tracing::debug!(
        facet_type = facet_type.map(|t| t.type_name()).unwrap_or("unknown"),
        reason,
        error = %error,
        "Failed to decode partial aggregate"
    );
    error.into()
}

// ============================================================================
// Public API
// ============================================================================

/// Encode the shape payload of a partial aggregate
pub fn encode(aggregate: &PartialAggregate) -> Bytes {
    let mut w = WireWriter::with_capacity(1 + aggregate.bucket_count() * 8);
    write_payload(&mut w, aggregate);
    w.finish()
}

/// Decode a shape payload written by [`encode`]
///
/// The whole input must be consumed.
pub fn decode(facet_type: FacetType, data: &[u8], pool: &MapPool) -> Result<PartialAggregate> {
    let mut r = WireReader::new(data);
    let aggregate = read_payload(&mut r, facet_type, pool)
        .and_then(|aggregate| r.finish().map(|()| aggregate))
        .map_err(|e| decode_failed(Some(facet_type), e))?;
    Ok(aggregate)
}

/// Encode a named facet, tagged with its stream type name
pub fn encode_facet(name: &str, aggregate: &PartialAggregate) -> Bytes {
    let facet_type = aggregate.facet_type();
    let mut w = WireWriter::with_capacity(
        facet_type.type_name().len() + name.len() + 3 + aggregate.bucket_count() * 8,
    );
    w.write_bytes(facet_type.type_name().as_bytes());
    w.write_bytes(name.as_bytes());
    write_payload(&mut w, aggregate);
    w.finish()
}

/// Decode a named facet written by [`encode_facet`]
///
/// Returns the facet name and its partial aggregate. The shape is taken from
/// the stream type name.
pub fn decode_facet(data: &[u8], pool: &MapPool) -> Result<(String, PartialAggregate)> {
    let mut r = WireReader::new(data);

    let facet_type = r
        .read_str("type name")
        .and_then(|name| {
            FacetType::from_type_name(name)
                .ok_or_else(|| CodecError::UnknownFacetType(name.to_string()))
        })
        .map_err(|e| decode_failed(None, e))?;

    let decoded = r.read_str("facet name").and_then(|name| {
        let name = name.to_string();
        let aggregate = read_payload(&mut r, facet_type, pool)?;
        r.finish()?;
        Ok((name, aggregate))
    });

    decoded.map_err(|e| decode_failed(Some(facet_type), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn pool() -> MapPool {
        MapPool::default()
    }

    fn codec_error(result: Result<PartialAggregate>) -> CodecError {
        match result {
            Err(Error::Codec(e)) => e,
            Err(other) => panic!("expected codec error, got {other}"),
            Ok(_) => panic!("expected codec error, decode succeeded"),
        }
    }

    fn counter(threshold: usize, precision: u8, values: std::ops::Range<u32>) -> DistinctCounter {
        let mut c = DistinctCounter::new(threshold, precision);
        for v in values {
            c.update(&v.to_le_bytes());
        }
        c
    }

    #[test]
    fn test_zigzag_negative_buckets_are_short() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        for n in [i64::MIN, -3_600_000, -1, 0, 1, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(n)), n);
        }
    }

    #[test]
    fn test_empty_aggregate_is_single_zero_byte() {
        let p = pool();
        for facet_type in FacetType::ALL {
            let empty = p.acquire_aggregate(facet_type);
            let bytes = encode(&empty);
            assert_eq!(&bytes[..], &[0x00]);
            let decoded = decode(facet_type, &bytes, &p).unwrap();
            assert!(decoded.is_empty());
            assert_eq!(decoded.facet_type(), facet_type);
        }
    }

    #[test]
    fn test_counts_layout() {
        let mut map = CountMap::new();
        map.insert(-1, 300);
        let bytes = encode(&PartialAggregate::Counts(map));
        // n=1, zigzag(-1)=1, 300 = 0xAC 0x02
        assert_eq!(&bytes[..], &[0x01, 0x01, 0xAC, 0x02]);
    }

    #[test]
    fn test_counts_round_trip() {
        let p = pool();
        let mut map = CountMap::new();
        map.insert(-7_200_000, 3);
        map.insert(0, 1);
        map.insert(3_600_000, u32::MAX);
        let aggregate = PartialAggregate::Counts(map);
        let decoded = decode(FacetType::Counting, &encode(&aggregate), &p).unwrap();
        assert_eq!(decoded, aggregate);
    }

    #[test]
    fn test_counts_reencode_is_byte_identical() {
        let p = pool();
        let mut map = CountMap::new();
        for bucket in -50..50 {
            map.insert(bucket * 1000, (bucket + 100) as u32);
        }
        let bytes = encode(&PartialAggregate::Counts(map));
        let decoded = decode(FacetType::Counting, &bytes, &p).unwrap();
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn test_sliced_round_trip() {
        let p = pool();
        let mut map = SlicedCountMap::new();
        let mut slices = SliceCountMap::new();
        slices.insert(slice_label(b"eu"), 4);
        slices.insert(slice_label(b""), 1);
        map.insert(100, slices);
        map.insert(200, SliceCountMap::new());
        let aggregate = PartialAggregate::SlicedCounts(map);
        let decoded = decode(FacetType::Sliced, &encode(&aggregate), &p).unwrap();
        assert_eq!(decoded, aggregate);
    }

    #[test]
    fn test_distinct_round_trip_both_modes() {
        let p = pool();
        let mut map = DistinctMap::new();
        map.insert(100, counter(50, 10, 0..20));
        map.insert(200, counter(50, 10, 0..500));
        assert!(map[&100].is_exact());
        assert!(!map[&200].is_exact());

        let aggregate = PartialAggregate::DistinctCounts(map);
        let decoded = decode(FacetType::Distinct, &encode(&aggregate), &p).unwrap();
        assert_eq!(decoded, aggregate);
    }

    #[test]
    fn test_sliced_distinct_round_trip() {
        let p = pool();
        let mut map = SlicedDistinctMap::new();
        let mut slices = SliceDistinctMap::new();
        slices.insert(slice_label(b"a"), counter(10, 8, 0..5));
        slices.insert(slice_label(b"b"), counter(10, 8, 0..40));
        map.insert(-100, slices);
        let aggregate = PartialAggregate::SlicedDistinctCounts(map);
        let decoded = decode(FacetType::SlicedDistinct, &encode(&aggregate), &p).unwrap();
        assert_eq!(decoded, aggregate);
    }

    #[test]
    fn test_truncated_input() {
        let p = pool();
        let mut map = CountMap::new();
        map.insert(1, 300);
        map.insert(2, 300);
        let bytes = encode(&PartialAggregate::Counts(map));
        let err = codec_error(decode(FacetType::Counting, &bytes[..bytes.len() - 1], &p));
        assert!(matches!(err, CodecError::Truncated { .. }));
        assert_eq!(codec_error(decode(FacetType::Counting, &[], &p)), CodecError::Truncated {
            offset: 0,
            needed: 1
        });
    }

    #[test]
    fn test_varint_overflow() {
        let p = pool();
        let bytes = [0xFF; 11];
        assert_eq!(
            codec_error(decode(FacetType::Counting, &bytes, &p)),
            CodecError::VarintOverflow(0)
        );
    }

    #[test]
    fn test_count_out_of_range() {
        let p = pool();
        let mut w = WireWriter::with_capacity(16);
        w.write_varint(1);
        w.write_zigzag(5);
        w.write_varint(u64::from(u32::MAX) + 1);
        let err = codec_error(decode(FacetType::Counting, &w.finish(), &p));
        assert!(matches!(err, CodecError::OutOfRange { target: "count", .. }));
    }

    #[test]
    fn test_implausible_length_rejected_before_allocating() {
        let p = pool();
        let mut w = WireWriter::with_capacity(16);
        w.write_varint(u64::MAX);
        let err = codec_error(decode(FacetType::Counting, &w.finish(), &p));
        assert!(matches!(err, CodecError::InvalidLength { offset: 0, .. }));
    }

    #[test]
    fn test_invalid_estimator_mode_and_precision() {
        let p = pool();
        let mut w = WireWriter::with_capacity(16);
        w.write_varint(1);
        w.write_zigzag(0);
        w.buf.put_u8(7);
        w.write_varint(10);
        w.buf.put_u8(12);
        w.buf.put_slice(&[0; 8]);
        assert_eq!(
            codec_error(decode(FacetType::Distinct, &w.finish(), &p)),
            CodecError::InvalidMode(7)
        );

        let mut w = WireWriter::with_capacity(16);
        w.write_varint(1);
        w.write_zigzag(0);
        w.buf.put_u8(MODE_EXACT);
        w.write_varint(10);
        w.buf.put_u8(30);
        w.write_varint(0);
        assert_eq!(
            codec_error(decode(FacetType::Distinct, &w.finish(), &p)),
            CodecError::InvalidPrecision(30)
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let p = pool();
        assert_eq!(
            codec_error(decode(FacetType::Counting, &[0x00, 0x01], &p)),
            CodecError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let p = pool();
        // Bucket 1 twice: the second count must not overwrite the first
        assert_eq!(
            codec_error(decode(FacetType::Counting, &[2, 2, 5, 2, 7], &p)),
            CodecError::DuplicateKey { offset: 3 }
        );

        let mut w = WireWriter::with_capacity(16);
        w.write_varint(1);
        w.write_zigzag(0);
        w.write_varint(2);
        w.write_bytes(b"a");
        w.write_varint(1);
        w.write_bytes(b"a");
        w.write_varint(2);
        assert_eq!(
            codec_error(decode(FacetType::Sliced, &w.finish(), &p)),
            CodecError::DuplicateKey { offset: 6 }
        );

        let mut w = WireWriter::with_capacity(32);
        w.write_varint(1);
        w.write_zigzag(0);
        w.buf.put_u8(MODE_EXACT);
        w.write_varint(10);
        w.buf.put_u8(12);
        w.write_varint(2);
        w.buf.put_u64_le(7);
        w.buf.put_u64_le(7);
        assert_eq!(
            codec_error(decode(FacetType::Distinct, &w.finish(), &p)),
            CodecError::DuplicateKey { offset: 14 }
        );
    }

    #[test]
    fn test_facet_envelope_round_trip() {
        let p = pool();
        let mut map = CountMap::new();
        map.insert(3_600_000, 9);
        let aggregate = PartialAggregate::Counts(map);

        let bytes = encode_facet("requests", &aggregate);
        let (name, decoded) = decode_facet(&bytes, &p).unwrap();
        assert_eq!(name, "requests");
        assert_eq!(decoded, aggregate);
    }

    #[test]
    fn test_facet_envelope_unknown_type() {
        let p = pool();
        let mut w = WireWriter::with_capacity(32);
        w.write_bytes(b"histogram_facet");
        w.write_bytes(b"x");
        w.write_varint(0);
        match decode_facet(&w.finish(), &p) {
            Err(Error::Codec(CodecError::UnknownFacetType(name))) => {
                assert_eq!(name, "histogram_facet")
            }
            other => panic!("unexpected result {:?}", other.map(|(n, _)| n)),
        }
    }

    #[test]
    fn test_decode_acquires_from_pool() {
        let p = pool();
        p.release_counts(CountMap::new());
        decode(FacetType::Counting, &[0x00], &p).unwrap();
        assert_eq!(p.stats().hits, 1);
    }
}
