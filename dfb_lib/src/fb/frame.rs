use nalgebra::Vector2;

use crate::{
    color::RGBA,
    common::PixelBox,
    tile::{Tile, TileColor, TILE_SIZE},
};

use super::{kernels::unpack_rgba8, ColorBufferFormat};

/// Row-major pixel storage of the assembled image
#[derive(Debug, Clone, PartialEq)]
pub enum ColorBuffer {
    Rgba8(Vec<u32>),
    Rgba32F(Vec<RGBA>),
}

/// Whole image assembled on the master from finished tiles
#[derive(Debug, Clone)]
pub struct FrameImage {
    size: Vector2<usize>,
    buffer: ColorBuffer,
}

impl FrameImage {
    /// `None` for formats without a color buffer
    pub fn new(size: Vector2<usize>, format: ColorBufferFormat) -> Option<FrameImage> {
        let pixels = size.x * size.y;
        let buffer = match format {
            ColorBufferFormat::None => return None,
            ColorBufferFormat::Rgba8 | ColorBufferFormat::Srgba => {
                ColorBuffer::Rgba8(vec![0; pixels])
            }
            ColorBufferFormat::Rgba32F => ColorBuffer::Rgba32F(vec![RGBA::zeros(); pixels]),
        };
        Some(FrameImage { size, buffer })
    }

    pub fn size(&self) -> Vector2<usize> {
        self.size
    }

    pub fn color_buffer(&self) -> &ColorBuffer {
        &self.buffer
    }

    /// Copy the valid part of a tile starting at pixel `begin`
    pub fn write_tile(&mut self, begin: Vector2<usize>, color: &TileColor) {
        let region = PixelBox::tile_at(begin, TILE_SIZE, self.size);
        let width = self.size.x;
        match (&mut self.buffer, color) {
            (ColorBuffer::Rgba8(dst), TileColor::Rgba8(src)) => {
                copy_rows(dst, width, &region, src)
            }
            (ColorBuffer::Rgba32F(dst), TileColor::Rgba32F(src)) => {
                copy_rows(dst, width, &region, src)
            }
            _ => (),
        }
    }

    /// 8 bit RGB triplets, alpha dropped
    pub fn to_rgb8(&self) -> Vec<u8> {
        match &self.buffer {
            ColorBuffer::Rgba8(px) => px
                .iter()
                .flat_map(|&p| {
                    let [r, g, b, _] = unpack_rgba8(p);
                    [r, g, b]
                })
                .collect(),
            ColorBuffer::Rgba32F(px) => px
                .iter()
                .flat_map(|c| {
                    let q = |v: f32| (255.0 * v.clamp(0.0, 1.0)) as u8;
                    [q(c.x), q(c.y), q(c.z)]
                })
                .collect(),
        }
    }
}

fn copy_rows<T: Copy>(dst: &mut [T], width: usize, region: &PixelBox, src: &[T]) {
    let w = region.width();
    for (row, y) in region.y.clone().enumerate() {
        let from = Tile::index(0, row);
        let to = y * width + region.x.start;
        dst[to..to + w].copy_from_slice(&src[from..from + w]);
    }
}
