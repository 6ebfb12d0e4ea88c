use nalgebra::{vector, Vector2};
use parking_lot::Mutex;

use crate::{
    color::{self, RGBA},
    fb::{
        kernels::{self, AccumTiles},
        FinishedTile, FrameParams, TileSink,
    },
    tile::Tile,
};

/// Framebuffer of 2x2 full tiles
pub fn test_fb_size() -> Vector2<usize> {
    vector![128, 128]
}

pub fn red() -> RGBA {
    color::new(1.0, 0.0, 0.0, 1.0)
}

pub fn blue() -> RGBA {
    color::new(0.0, 0.0, 1.0, 1.0)
}

/// Tile of the test framebuffer filled with one color and depth
pub fn solid_tile(lower: Vector2<usize>, c: RGBA, depth: f32) -> Tile {
    let mut tile = Tile::at(lower, test_fb_size(), 0);
    tile.fill(c, depth);
    tile
}

pub fn with_generation(mut tile: Tile, generation: i32, children: i32) -> Tile {
    tile.generation = generation;
    tile.children = children;
    tile
}

/// Owned persistent buffers for driving the accumulation kernel
pub struct TileBuffers {
    pub final_: Tile,
    pub accum: Tile,
    pub variance: Tile,
}

pub fn blank_buffers(lower: Vector2<usize>) -> TileBuffers {
    let blank = Tile::at(lower, test_fb_size(), 0);
    TileBuffers {
        final_: blank.clone(),
        accum: blank.clone(),
        variance: blank,
    }
}

pub fn accumulate_into(tile: &Tile, bufs: &mut TileBuffers, params: &FrameParams) -> f32 {
    kernels::accumulate(
        tile,
        AccumTiles {
            final_: &mut bufs.final_,
            accum: &mut bufs.accum,
            variance: &mut bufs.variance,
        },
        params,
    )
}

/// Sink remembering every finished tile
#[derive(Default)]
pub struct CollectingSink {
    tiles: Mutex<Vec<FinishedTile>>,
}

impl CollectingSink {
    pub fn take(&self) -> Vec<FinishedTile> {
        std::mem::take(&mut *self.tiles.lock())
    }

    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileSink for CollectingSink {
    fn tile_completed(&self, tile: &FinishedTile) {
        self.tiles.lock().push(tile.clone());
    }
}
