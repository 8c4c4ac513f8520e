//! Criterion benchmarks for block-level kernels.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use sparsebits::block::{self, BitBlock};
use sparsebits::gap::{GapBlock, DEFAULT_GAP_LEVELS};

/// Generate a block with the requested bit density.
fn generate_block(density: f64, seed: u64) -> Box<BitBlock> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut b = block::new_zero_block();
    let threshold = (density * u64::MAX as f64) as u64;
    for w in b.iter_mut() {
        for bit in 0..64 {
            if rng.gen::<u64>() < threshold {
                *w |= 1 << bit;
            }
        }
    }
    b
}

fn bench_logic_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_logic");
    let a = generate_block(0.2, 42);
    let b = generate_block(0.2, 43);

    group.bench_function("and_into", |bench| {
        let mut dst = block::new_zero_block();
        bench.iter(|| block::and_into(&mut dst, black_box(&a), black_box(&b)))
    });
    group.bench_function("or_into", |bench| {
        let mut dst = block::new_zero_block();
        bench.iter(|| block::or_into(&mut dst, black_box(&a), black_box(&b)))
    });
    group.bench_function("xor_into", |bench| {
        let mut dst = block::new_zero_block();
        bench.iter(|| block::xor_into(&mut dst, black_box(&a), black_box(&b)))
    });
    group.finish();
}

fn bench_count_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_count");
    for density in [0.01, 0.5] {
        let b = generate_block(density, 7);
        group.bench_function(format!("count/{:.0}%", density * 100.0), |bench| {
            bench.iter(|| block::count(black_box(&b)))
        });
        group.bench_function(format!("count_range/{:.0}%", density * 100.0), |bench| {
            bench.iter(|| block::count_range(black_box(&b), 1_000, 60_000))
        });
        group.bench_function(format!("digest/{:.0}%", density * 100.0), |bench| {
            bench.iter(|| block::digest(black_box(&b)))
        });
    }
    group.finish();
}

fn bench_shift(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_shift");
    group.bench_function("shift_r1", |bench| {
        let mut b = generate_block(0.3, 11);
        bench.iter(|| block::shift_r1(black_box(&mut b), false))
    });
    group.finish();
}

fn bench_gap_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("gap");
    let mut rng = ChaCha8Rng::seed_from_u64(99);

    group.bench_function("set_sparse", |bench| {
        bench.iter(|| {
            let mut g = GapBlock::zero(&DEFAULT_GAP_LEVELS);
            for _ in 0..100 {
                g.set(rng.gen_range(0..65_536u32), true);
            }
            g.len()
        })
    });

    let mut g = GapBlock::zero(&DEFAULT_GAP_LEVELS);
    for i in 0..200u32 {
        g.set(i * 300, true);
        g.set(i * 300 + 1, true);
    }
    group.bench_function("count_to", |bench| {
        bench.iter(|| g.count_to(black_box(40_000)))
    });
    group.bench_function("to_bit_block", |bench| {
        let mut dst = block::new_zero_block();
        bench.iter(|| g.to_bit_block(black_box(&mut dst)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_logic_ops,
    bench_count_ops,
    bench_shift,
    bench_gap_codec
);
criterion_main!(benches);
