use composite_benchmarks::{kernels::*, messages::*};
use criterion::{criterion_group, criterion_main, Criterion};

mod common;
mod composite_benchmarks;

criterion_group! {
    name = kernels;
    config = Criterion::default().significance_level(0.1).sample_size(10);
    targets = bench_z_composite, bench_sort_and_blend, bench_accumulate
}

criterion_group! {
    name = messages;
    config = Criterion::default().significance_level(0.1).sample_size(10);
    targets = bench_encode_tiles, bench_decode_tiles
}

criterion_main!(kernels, messages);
