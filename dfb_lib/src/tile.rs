use nalgebra::{Vector2, Vector3};

use crate::{
    color::{self, RGBA},
    common::PixelBox,
};

/// Side of a square tile in pixels
pub const TILE_SIZE: usize = 64;
/// Number of pixels stored by every tile, regardless of its clipped region
pub const TILE_PIXELS: usize = TILE_SIZE * TILE_SIZE;

/// Block of `TILE_SIZE`x`TILE_SIZE` pixels rendered by one worker.
///
/// Channel arrays always hold `TILE_PIXELS` entries in row-major order with a stride
/// of `TILE_SIZE`. Only the pixels inside `region` are meaningful, the region may be
/// clipped at the framebuffer edge.
///
/// Colors are premultiplied by alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Screen region covered by this tile
    pub region: PixelBox,
    /// Size of the whole framebuffer
    pub fb_size: Vector2<usize>,
    pub r: Vec<f32>,
    pub g: Vec<f32>,
    pub b: Vec<f32>,
    pub a: Vec<f32>,
    pub z: Vec<f32>,
    pub normal: Vec<Vector3<f32>>,
    pub albedo: Vec<Vector3<f32>>,
    /// Sequence number of this partial contribution
    pub generation: i32,
    /// Number of contributions in the next generation this tile announces
    pub children: i32,
    /// Accumulation (frame) counter
    pub accum_id: i32,
}

impl Tile {
    /// Construct cleared tile: black, transparent, infinitely far.
    pub fn new(region: PixelBox, fb_size: Vector2<usize>, accum_id: i32) -> Tile {
        debug_assert!(region.is_aligned(TILE_SIZE));
        debug_assert!(region.width() <= TILE_SIZE && region.height() <= TILE_SIZE);
        Tile {
            region,
            fb_size,
            r: vec![0.0; TILE_PIXELS],
            g: vec![0.0; TILE_PIXELS],
            b: vec![0.0; TILE_PIXELS],
            a: vec![0.0; TILE_PIXELS],
            z: vec![f32::INFINITY; TILE_PIXELS],
            normal: vec![Vector3::zeros(); TILE_PIXELS],
            albedo: vec![Vector3::zeros(); TILE_PIXELS],
            generation: 0,
            children: 0,
            accum_id,
        }
    }

    /// Cleared tile for the grid cell whose lower corner is `lower`.
    pub fn at(lower: Vector2<usize>, fb_size: Vector2<usize>, accum_id: i32) -> Tile {
        let region = PixelBox::tile_at(lower, TILE_SIZE, fb_size);
        Tile::new(region, fb_size, accum_id)
    }

    /// Index into channel arrays of a pixel given in tile-local coordinates
    #[inline]
    pub fn index(x: usize, y: usize) -> usize {
        x + TILE_SIZE * y
    }

    /// Iterator over channel indices of all valid pixels
    pub fn valid_indices(&self) -> impl Iterator<Item = usize> {
        let width = self.region.width();
        let height = self.region.height();
        (0..height).flat_map(move |y| (0..width).map(move |x| Tile::index(x, y)))
    }

    #[inline]
    pub fn color(&self, i: usize) -> RGBA {
        color::new(self.r[i], self.g[i], self.b[i], self.a[i])
    }

    #[inline]
    pub fn set_color(&mut self, i: usize, c: RGBA) {
        self.r[i] = c.x;
        self.g[i] = c.y;
        self.b[i] = c.z;
        self.a[i] = c.w;
    }

    /// Write all channels of one pixel from another tile
    #[inline]
    pub fn copy_pixel(&mut self, i: usize, from: &Tile) {
        self.r[i] = from.r[i];
        self.g[i] = from.g[i];
        self.b[i] = from.b[i];
        self.a[i] = from.a[i];
        self.z[i] = from.z[i];
        self.normal[i] = from.normal[i];
        self.albedo[i] = from.albedo[i];
    }

    /// Fill every valid pixel with one color and depth
    pub fn fill(&mut self, c: RGBA, depth: f32) {
        for i in self.valid_indices() {
            self.set_color(i, c);
            self.z[i] = depth;
        }
    }

    /// Minimum depth over the valid region
    pub fn min_depth(&self) -> f32 {
        self.valid_indices()
            .map(|i| self.z[i])
            .fold(f32::INFINITY, f32::min)
    }

    /// True if `region` is exactly one grid cell of the framebuffer and every
    /// channel holds `TILE_PIXELS` values
    pub fn is_well_formed(&self) -> bool {
        let lower = self.region.lower();
        let region_ok = lower.x < self.fb_size.x
            && lower.y < self.fb_size.y
            && self.region.is_aligned(TILE_SIZE)
            && self.region == PixelBox::tile_at(lower, TILE_SIZE, self.fb_size);
        let channels_ok = [&self.r, &self.g, &self.b, &self.a, &self.z]
            .iter()
            .all(|c| c.len() == TILE_PIXELS)
            && self.normal.len() == TILE_PIXELS
            && self.albedo.len() == TILE_PIXELS;
        region_ok && channels_ok
    }

    /// Copy region and framebuffer size, leaving pixels untouched
    pub fn copy_meta(&mut self, from: &Tile) {
        self.region = from.region.clone();
        self.fb_size = from.fb_size;
    }
}

/// Final colors of a tile, converted to the framebuffer's pixel format.
#[derive(Debug, Clone, PartialEq)]
pub enum TileColor {
    /// Format without a color buffer, only completion is reported
    None,
    /// Packed 8 bit RGBA, red in the lowest byte
    Rgba8(Vec<u32>),
    Rgba32F(Vec<RGBA>),
}

impl TileColor {
    pub fn is_none(&self) -> bool {
        matches!(self, TileColor::None)
    }
}
