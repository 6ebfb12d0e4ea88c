use criterion::{black_box, Criterion};

use crate::common::*;

pub fn bench_z_composite(c: &mut Criterion) {
    let src = gradient_tile(0.3);
    let base = gradient_tile(0.6);
    c.bench_function("z_composite", |b| {
        b.iter(|| {
            let mut dst = base.clone();
            kernels::z_composite(black_box(&src), &mut dst);
            dst
        })
    });
}

pub fn bench_sort_and_blend(c: &mut Criterion) {
    let tiles: Vec<Tile> = (0..8).map(|i| gradient_tile(i as f32 * 0.7)).collect();
    c.bench_function("sort_and_blend 8 fragments", |b| {
        b.iter(|| {
            let mut frags: Vec<_> = tiles.iter().map(|t| (t.min_depth(), t)).collect();
            kernels::sort_and_blend(black_box(&mut frags))
        })
    });
}

pub fn bench_accumulate(c: &mut Criterion) {
    let tile = gradient_tile(0.5);
    let mut final_ = Tile::at(vector![0, 0], FB_SIZE, 0);
    let mut accum = final_.clone();
    let mut variance = final_.clone();
    let params = params();
    c.bench_function("accumulate and convert", |b| {
        b.iter(|| {
            let err = kernels::accumulate(
                black_box(&tile),
                kernels::AccumTiles {
                    final_: &mut final_,
                    accum: &mut accum,
                    variance: &mut variance,
                },
                &params,
            );
            (err, kernels::convert(&final_, params.format))
        })
    });
}
