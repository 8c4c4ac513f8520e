//! Criterion benchmarks for vector-level rank/select and algebra.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use sparsebits::{BitVector, OptMode, SortOrder};

/// Generate a vector with roughly `count` random positions below `size`.
fn generate_vector(size: u64, count: usize, seed: u64) -> BitVector {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ids: Vec<u64> = (0..count).map(|_| rng.gen_range(0..size)).collect();
    let mut bv = BitVector::with_size(size);
    bv.set_ids(&ids, SortOrder::Unknown).unwrap();
    bv
}

fn generate_queries(count: usize, max: u64, seed: u64) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen_range(0..max)).collect()
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");
    let size = 1u64 << 24;
    for count in [10_000usize, 1_000_000] {
        let bv = generate_vector(size, count, 42);
        let rs = bv.build_rs_index();
        let queries = generate_queries(10_000, size, 123);
        group.bench_with_input(
            BenchmarkId::from_parameter(count),
            &(&bv, &rs, &queries),
            |b, (bv, rs, queries)| {
                b.iter(|| {
                    let mut sum = 0u64;
                    for &q in queries.iter() {
                        sum += bv.rank(black_box(q), rs);
                    }
                    sum
                })
            },
        );
    }
    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    let size = 1u64 << 24;
    let bv = generate_vector(size, 500_000, 42);
    let rs = bv.build_rs_index();
    let total = bv.count();
    let ranks = generate_queries(10_000, total, 321)
        .into_iter()
        .map(|r| r + 1)
        .collect::<Vec<u64>>();
    group.bench_function("500k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for &r in ranks.iter() {
                sum += bv.select(black_box(r), &rs).unwrap_or(0);
            }
            sum
        })
    });
    group.finish();
}

fn bench_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("algebra");
    let size = 1u64 << 24;
    let a = generate_vector(size, 200_000, 1);
    let b = generate_vector(size, 200_000, 2);

    group.bench_function("or_with", |bench| {
        bench.iter(|| {
            let mut t = a.clone();
            t.or_with(black_box(&b));
            t.count()
        })
    });
    group.bench_function("assign_and_compress", |bench| {
        bench.iter(|| {
            let mut t = BitVector::new();
            t.assign_and(black_box(&a), black_box(&b), OptMode::Compress);
            t.count()
        })
    });
    group.finish();
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");
    let bv = generate_vector(1 << 24, 100_000, 5);
    group.bench_function("ones_sum", |b| {
        b.iter(|| bv.ones().fold(0u64, |acc, p| acc.wrapping_add(p)))
    });
    group.finish();
}

criterion_group!(benches, bench_rank, bench_select, bench_algebra, bench_iteration);
criterion_main!(benches);
