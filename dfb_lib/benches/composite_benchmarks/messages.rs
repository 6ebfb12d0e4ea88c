use criterion::{black_box, Criterion};
use dfb_lib::work::{self, Work, WriteTileMessage};

use crate::common::*;

const BATCH: usize = 16;

fn batch() -> Vec<Work> {
    (0..BATCH)
        .map(|i| Work::WriteTile(WriteTileMessage::new(gradient_tile(i as f32))))
        .collect()
}

pub fn bench_encode_tiles(c: &mut Criterion) {
    let batch = batch();
    let mut buf = SerialBuffer::default();
    c.bench_function("encode 16 tiles", |b| {
        b.iter(|| {
            buf.clear();
            for w in &batch {
                work::encode(&mut buf, black_box(w));
            }
            buf.index()
        })
    });
}

pub fn bench_decode_tiles(c: &mut Criterion) {
    let mut buf = SerialBuffer::default();
    for w in &batch() {
        work::encode(&mut buf, w);
    }
    c.bench_function("decode 16 tiles", |b| {
        b.iter(|| {
            buf.set_index(0);
            work::decode_buffer(&mut buf, BATCH).unwrap()
        })
    });
}
