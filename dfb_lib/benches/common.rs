pub use dfb_lib::{
    color,
    fb::{kernels, ColorBufferFormat, FrameParams},
    serial::SerialBuffer,
    tile::Tile,
};
pub use nalgebra::{vector, Vector2};

pub const FB_SIZE: Vector2<usize> = vector![512, 512];

/// Tile with a depth ramp and colors varying per pixel
pub fn gradient_tile(seed: f32) -> Tile {
    let mut tile = Tile::at(vector![0, 0], FB_SIZE, 1);
    for i in tile.valid_indices().collect::<Vec<_>>() {
        let t = (i as f32 * 0.618 + seed).fract();
        tile.set_color(i, color::premultiplied(t, 1.0 - t, 0.5, 0.5 + 0.5 * t));
        tile.z[i] = seed + t;
    }
    tile
}

pub fn params() -> FrameParams {
    FrameParams {
        format: ColorBufferFormat::Rgba8,
        has_accum: true,
        has_variance: true,
        num_workers: 8,
    }
}
