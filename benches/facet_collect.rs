//! Facet Collection Benchmarks
//!
//! Benchmarks for per-document collection, shard reduction, and the wire
//! codec, measuring document throughput and the benefit of map pooling.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_facet::aggregation::{
    decode, encode, Collector, CollectorSpec, FacetCollector, FacetType, MapPool,
    PartialAggregate, Reducer,
};
use kuba_facet::types::{DocValues, IntervalRounding, Rounding};

// =============================================================================
// Test Data Generators
// =============================================================================

/// Documents spread over a day, with 8 regions and a growing user population
struct Corpus {
    timestamps: Vec<i64>,
    regions: Vec<Vec<u8>>,
    users: Vec<Vec<u8>>,
}

fn create_corpus(docs: usize) -> Corpus {
    Corpus {
        timestamps: (0..docs).map(|i| (i as i64 * 7_919) % 86_400_000).collect(),
        regions: (0..docs)
            .map(|i| format!("region-{}", i % 8).into_bytes())
            .collect(),
        users: (0..docs)
            .map(|i| format!("user-{}", i % (docs / 4 + 1)).into_bytes())
            .collect(),
    }
}

fn hourly() -> Arc<dyn Rounding> {
    Arc::new(IntervalRounding::new(3_600_000, 0).unwrap())
}

fn spec_for(facet_type: FacetType) -> CollectorSpec {
    let spec = CollectorSpec::counting();
    let spec = if facet_type.is_sliced() { spec.with_slices() } else { spec };
    if facet_type.is_distinct() {
        spec.with_distinct(1000, 0.01)
    } else {
        spec
    }
}

fn collect(corpus: &Corpus, facet_type: FacetType, pool: &Arc<MapPool>) -> PartialAggregate {
    let mut collector = FacetCollector::new(spec_for(facet_type), hourly(), pool.clone());
    for i in 0..corpus.timestamps.len() {
        let ts = [corpus.timestamps[i]];
        let slices: [&[u8]; 1] = [corpus.regions[i].as_slice()];
        let distinct: [&[u8]; 1] = [corpus.users[i].as_slice()];
        collector
            .collect(
                &DocValues::new(&ts)
                    .with_slices(&slices)
                    .with_distinct(&distinct),
            )
            .unwrap();
    }
    collector.finish()
}

// =============================================================================
// Collection Benchmarks
// =============================================================================

fn bench_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");
    let corpus = create_corpus(50_000);
    group.throughput(Throughput::Elements(corpus.timestamps.len() as u64));

    for facet_type in FacetType::ALL {
        let pool = Arc::new(MapPool::default());
        group.bench_with_input(
            BenchmarkId::new("pooled", facet_type.type_name()),
            &corpus,
            |b, corpus| {
                b.iter(|| {
                    let aggregate = collect(corpus, facet_type, &pool);
                    pool.release_aggregate(black_box(aggregate));
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Reduction Benchmarks
// =============================================================================

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");
    let pool = Arc::new(MapPool::default());
    let reducer = Reducer::new(pool.clone());

    for shard_count in [4, 16, 64] {
        let shards: Vec<PartialAggregate> = (0..shard_count)
            .map(|_| collect(&create_corpus(5_000), FacetType::Sliced, &pool))
            .collect();

        group.bench_with_input(
            BenchmarkId::new("sequential", shard_count),
            &shards,
            |b, shards| {
                b.iter(|| {
                    let reduced = reducer.reduce(FacetType::Sliced, shards.clone()).unwrap();
                    pool.release_aggregate(black_box(reduced));
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("parallel", shard_count),
            &shards,
            |b, shards| {
                b.iter(|| {
                    let reduced = reducer
                        .reduce_parallel(FacetType::Sliced, shards.clone())
                        .unwrap();
                    pool.release_aggregate(black_box(reduced));
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Codec Benchmarks
// =============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let pool = Arc::new(MapPool::default());
    let corpus = create_corpus(20_000);

    for facet_type in FacetType::ALL {
        let aggregate = collect(&corpus, facet_type, &pool);
        let bytes = encode(&aggregate);
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_function(BenchmarkId::new("encode", facet_type.type_name()), |b| {
            b.iter(|| black_box(encode(&aggregate)))
        });
        group.bench_function(BenchmarkId::new("decode", facet_type.type_name()), |b| {
            b.iter(|| {
                let decoded = decode(facet_type, &bytes, &pool).unwrap();
                pool.release_aggregate(black_box(decoded));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_collect, bench_reduce, bench_codec);
criterion_main!(benches);
