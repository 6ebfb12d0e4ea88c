use nalgebra::Vector2;
use parking_lot::Mutex;

use crate::{
    common::PixelBox,
    tile::{Tile, TileColor, TILE_SIZE},
};

use super::{
    kernels::{self, AccumTiles},
    tile_types::Compositor,
    FbChannels, FrameMode, FrameParams,
};

/// Identifies one cell of the tile grid and the worker finalizing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDesc {
    /// Row-major index in the tile grid
    pub tile_id: usize,
    /// Index of the worker owning the tile
    pub owner_id: usize,
    /// Lower corner in pixels
    pub begin: Vector2<usize>,
}

impl TileDesc {
    pub fn new(tile_id: usize, owner_id: usize, begin: Vector2<usize>) -> Self {
        Self {
            tile_id,
            owner_id,
            begin,
        }
    }

    /// Pixel region, clipped to the framebuffer
    pub fn region(&self, fb_size: Vector2<usize>) -> PixelBox {
        PixelBox::tile_at(self.begin, TILE_SIZE, fb_size)
    }
}

/// Frame tile of an owned region, ready for the display side
#[derive(Debug, Clone)]
pub struct FinishedTile {
    pub tile_id: usize,
    pub region: PixelBox,
    pub accum_id: i32,
    pub error: f32,
    /// Normalized colors with depth and auxiliary channels
    pub final_tile: Tile,
    /// `final_tile` converted to the framebuffer's pixel format
    pub color: TileColor,
}

struct TileState {
    accum: Tile,
    variance: Tile,
    final_: Tile,
    color: TileColor,
    error: f32,
    contributions: usize,
    compositor: Compositor,
}

/// Owned tile: persistent accumulation buffers plus the compositing strategy.
/// All mutation goes through the per-tile lock.
pub struct TileData {
    desc: TileDesc,
    state: Mutex<TileState>,
}

impl TileData {
    pub fn new(desc: TileDesc, fb_size: Vector2<usize>, mode: FrameMode) -> Self {
        let cleared = Tile::at(desc.begin, fb_size, 0);
        let state = TileState {
            accum: cleared.clone(),
            variance: cleared.clone(),
            final_: cleared,
            color: TileColor::None,
            error: f32::INFINITY,
            contributions: 0,
            compositor: Compositor::new(mode),
        };
        Self {
            desc,
            state: Mutex::new(state),
        }
    }

    pub fn desc(&self) -> &TileDesc {
        &self.desc
    }

    pub fn mode(&self) -> FrameMode {
        self.state.lock().compositor.mode()
    }

    /// Called once at the start of every frame
    pub fn new_frame(&self) {
        let mut state = self.state.lock();
        state.contributions = 0;
        state.compositor.new_frame(self.desc.tile_id);
    }

    /// Merge one contribution, accumulating the frame tile once it is complete.
    pub fn process(&self, tile: &Tile, params: &FrameParams) -> Option<FinishedTile> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.contributions += 1;

        let complete = state.compositor.process(tile, params)?;
        let accum_id = complete.accum_id;
        state.error = kernels::accumulate(
            &complete,
            AccumTiles {
                final_: &mut state.final_,
                accum: &mut state.accum,
                variance: &mut state.variance,
            },
            params,
        );
        state.color = kernels::convert(&state.final_, params.format);

        Some(FinishedTile {
            tile_id: self.desc.tile_id,
            region: state.final_.region.clone(),
            accum_id,
            error: state.error,
            final_tile: state.final_.clone(),
            color: state.color.clone(),
        })
    }

    /// Contributions received in the current frame
    pub fn contributions(&self) -> usize {
        self.state.lock().contributions
    }

    pub fn error(&self) -> f32 {
        self.state.lock().error
    }

    /// Reset the selected persistent channels
    pub fn clear(&self, channels: FbChannels) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if channels.accum {
            let zero = vec![0.0; state.accum.r.len()];
            for t in [&mut state.accum, &mut state.variance] {
                t.r.clone_from(&zero);
                t.g.clone_from(&zero);
                t.b.clone_from(&zero);
                t.a.clone_from(&zero);
                t.z.fill(f32::INFINITY);
            }
            state.error = f32::INFINITY;
        }
        if channels.depth {
            state.final_.z.fill(f32::INFINITY);
        }
        if channels.color {
            let zero = vec![0.0; state.final_.r.len()];
            let f = &mut state.final_;
            f.r.clone_from(&zero);
            f.g.clone_from(&zero);
            f.b.clone_from(&zero);
            f.a.clone_from(&zero);
            state.color = TileColor::None;
        }
    }
}

#[cfg(test)]
mod test {

    use nalgebra::vector;

    use super::*;
    use crate::{color, fb::ColorBufferFormat, test_helpers::*};

    fn params(format: ColorBufferFormat) -> FrameParams {
        FrameParams {
            format,
            has_accum: true,
            has_variance: true,
            num_workers: 4,
        }
    }

    #[test]
    fn write_once_returns_input() {
        let desc = TileDesc::new(1, 1, vector![64, 0]);
        let td = TileData::new(desc, test_fb_size(), FrameMode::WriteOnce);
        td.new_frame();

        let tile = solid_tile(vector![64, 0], color::new(0.25, 0.5, 0.75, 1.0), 2.0);
        let done = td.process(&tile, &params(ColorBufferFormat::Rgba32F)).unwrap();

        assert_eq!(done.tile_id, 1);
        assert_eq!(done.region, tile.region);
        for i in tile.valid_indices() {
            assert_eq!(done.final_tile.color(i), tile.color(i));
            assert_eq!(done.final_tile.z[i], tile.z[i]);
        }
        match done.color {
            TileColor::Rgba32F(px) => assert_eq!(px[0], tile.color(0)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(td.contributions(), 1);
    }

    #[test]
    fn contributions_reset_per_frame() {
        let desc = TileDesc::new(0, 0, vector![0, 0]);
        let td = TileData::new(desc, test_fb_size(), FrameMode::ZComposite);
        let p = params(ColorBufferFormat::Rgba8);
        td.new_frame();
        for depth in [4.0, 3.0, 2.0] {
            let tile = solid_tile(vector![0, 0], red(), depth);
            assert!(td.process(&tile, &p).is_none());
        }
        assert_eq!(td.contributions(), 3);
        td.new_frame();
        assert_eq!(td.contributions(), 0);
    }

    #[test]
    fn clear_resets_accumulation() {
        let desc = TileDesc::new(0, 0, vector![0, 0]);
        let td = TileData::new(desc, test_fb_size(), FrameMode::WriteOnce);
        let p = params(ColorBufferFormat::Rgba32F);
        let mut tile = solid_tile(vector![0, 0], red(), 1.0);

        td.new_frame();
        td.process(&tile, &p);
        tile.accum_id = 1;
        td.new_frame();
        let done = td.process(&tile, &p).unwrap();
        assert_eq!(done.error, 0.0);

        td.clear(FbChannels::all());
        assert!(td.error().is_infinite());
    }
}
