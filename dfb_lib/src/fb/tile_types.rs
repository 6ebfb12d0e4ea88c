use std::borrow::Cow;

use tracing::{trace, warn};

use crate::tile::Tile;

use super::{
    kernels::{sort_and_blend, z_composite},
    FrameMode, FrameParams,
};

/// How partial contributions to one tile are merged into the frame tile
#[derive(Debug)]
pub enum Compositor {
    /// Exactly one contribution per frame
    WriteOnlyOnce,
    /// One contribution from every worker, nearest fragment wins
    ZComposite(ZCompositeState),
    /// Any number of contributions announced through generations, blended in depth order
    AlphaBlend(AlphaBlendState),
}

#[derive(Debug, Default)]
pub struct ZCompositeState {
    parts: usize,
    composite: Option<Tile>,
}

#[derive(Debug)]
pub struct BufferedTile {
    pub tile: Tile,
    /// Minimum depth over the valid region
    pub sort_order: f32,
}

#[derive(Debug)]
pub struct AlphaBlendState {
    buffered: Vec<BufferedTile>,
    current_generation: i32,
    expected_in_next_generation: i32,
    missing_in_current_generation: i32,
}

impl Default for AlphaBlendState {
    fn default() -> Self {
        Self {
            buffered: Vec::new(),
            current_generation: 0,
            expected_in_next_generation: 0,
            missing_in_current_generation: 1,
        }
    }
}

impl Compositor {
    pub fn new(mode: FrameMode) -> Compositor {
        match mode {
            FrameMode::WriteOnce => Compositor::WriteOnlyOnce,
            FrameMode::ZComposite => Compositor::ZComposite(ZCompositeState::default()),
            FrameMode::AlphaBlend => Compositor::AlphaBlend(AlphaBlendState::default()),
        }
    }

    pub fn mode(&self) -> FrameMode {
        match self {
            Compositor::WriteOnlyOnce => FrameMode::WriteOnce,
            Compositor::ZComposite(_) => FrameMode::ZComposite,
            Compositor::AlphaBlend(_) => FrameMode::AlphaBlend,
        }
    }

    /// Reset per-frame state
    pub fn new_frame(&mut self, tile_id: usize) {
        match self {
            Compositor::WriteOnlyOnce => (),
            Compositor::ZComposite(state) => state.parts = 0,
            Compositor::AlphaBlend(state) => {
                if !state.buffered.is_empty() {
                    warn!(
                        tile_id,
                        stale = state.buffered.len(),
                        "discarding contributions of an unfinished frame"
                    );
                    state.buffered.clear();
                }
                state.current_generation = 0;
                state.expected_in_next_generation = 0;
                state.missing_in_current_generation = 1;
            }
        }
    }

    /// Merge one contribution.
    ///
    /// Returns the complete frame tile once the last expected contribution arrived.
    pub fn process<'a>(&'a mut self, tile: &'a Tile, params: &FrameParams) -> Option<Cow<'a, Tile>> {
        match self {
            Compositor::WriteOnlyOnce => Some(Cow::Borrowed(tile)),
            Compositor::ZComposite(state) => state.process(tile, params.num_workers),
            Compositor::AlphaBlend(state) => state.process(tile).map(Cow::Owned),
        }
    }

    /// Contributions held back until their generation resolves
    pub fn buffered(&self) -> usize {
        match self {
            Compositor::AlphaBlend(state) => state.buffered.len(),
            _ => 0,
        }
    }
}

impl ZCompositeState {
    fn process(&mut self, tile: &Tile, num_workers: usize) -> Option<Cow<'_, Tile>> {
        match self.composite.as_mut() {
            Some(composite) if self.parts > 0 => z_composite(tile, composite),
            Some(composite) => composite.clone_from(tile),
            None => self.composite = Some(tile.clone()),
        }
        self.parts += 1;
        trace!(parts = self.parts, num_workers, "z composited");

        if self.parts == num_workers {
            self.composite.as_ref().map(Cow::Borrowed)
        } else {
            None
        }
    }
}

impl AlphaBlendState {
    fn process(&mut self, tile: &Tile) -> Option<Tile> {
        self.buffered.push(BufferedTile {
            tile: tile.clone(),
            sort_order: tile.min_depth(),
        });

        if tile.generation == self.current_generation {
            self.missing_in_current_generation -= 1;
            self.expected_in_next_generation += tile.children;
            while self.missing_in_current_generation == 0 && self.expected_in_next_generation > 0 {
                self.current_generation += 1;
                self.missing_in_current_generation = self.expected_in_next_generation;
                self.expected_in_next_generation = 0;
                for bt in &self.buffered {
                    if bt.tile.generation == self.current_generation {
                        self.missing_in_current_generation -= 1;
                        self.expected_in_next_generation += bt.tile.children;
                    }
                }
            }
        }

        if self.missing_in_current_generation != 0 {
            return None;
        }

        let mut fragments: Vec<_> = self
            .buffered
            .iter()
            .map(|bt| (bt.sort_order, &bt.tile))
            .collect();
        let blended = sort_and_blend(&mut fragments);
        trace!(fragments = self.buffered.len(), "alpha blended");
        self.buffered.clear();
        blended
    }
}

#[cfg(test)]
mod test {

    use nalgebra::vector;

    use super::*;
    use crate::{color, fb::ColorBufferFormat, test_helpers::*};

    fn params(num_workers: usize) -> FrameParams {
        FrameParams {
            format: ColorBufferFormat::Rgba32F,
            has_accum: false,
            has_variance: false,
            num_workers,
        }
    }

    #[test]
    fn write_once_completes_immediately() {
        let mut c = Compositor::new(FrameMode::WriteOnce);
        c.new_frame(0);
        let tile = solid_tile(vector![0, 0], red(), 1.0);
        let done = c.process(&tile, &params(4)).unwrap();
        assert_eq!(*done, tile);
    }

    #[test]
    fn z_composite_waits_for_all_workers() {
        let a = solid_tile(vector![0, 0], red(), 1.0);
        let b = solid_tile(vector![0, 0], blue(), 2.0);

        let mut results = Vec::new();
        for order in [[&a, &b], [&b, &a]] {
            let mut c = Compositor::new(FrameMode::ZComposite);
            c.new_frame(0);
            assert!(c.process(order[0], &params(2)).is_none());
            let done = c.process(order[1], &params(2)).unwrap().into_owned();
            results.push(done);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].color(0), red());
    }

    #[test]
    fn z_composite_reuses_buffer_across_frames() {
        let mut c = Compositor::new(FrameMode::ZComposite);
        let near = solid_tile(vector![0, 0], red(), 1.0);
        let far = solid_tile(vector![0, 0], blue(), 2.0);

        c.new_frame(0);
        assert!(c.process(&near, &params(1)).is_some());
        // A new frame must not see the previous composite
        c.new_frame(0);
        let done = c.process(&far, &params(1)).unwrap();
        assert_eq!(done.color(0), blue());
    }

    #[test]
    fn alpha_blend_is_order_independent() {
        let front = solid_tile(vector![0, 0], red(), 1.0);
        let back = solid_tile(vector![0, 0], color::new(0.0, 0.0, 0.5, 0.5), 2.0);
        let mut root = Tile::at(vector![0, 0], front.fb_size, 0);
        root.children = 2;
        let front = with_generation(front, 1, 0);
        let back = with_generation(back, 1, 0);

        let mut results = Vec::new();
        for order in [[&root, &front, &back], [&back, &root, &front], [&front, &back, &root]] {
            let mut c = Compositor::new(FrameMode::AlphaBlend);
            c.new_frame(0);
            assert!(c.process(order[0], &params(1)).is_none());
            assert!(c.process(order[1], &params(1)).is_none());
            let done = c.process(order[2], &params(1)).unwrap().into_owned();
            assert_eq!(c.buffered(), 0);
            results.push(done);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
        assert_eq!(results[0].color(0), red());
        assert_eq!(results[0].z[0], 1.0);
    }

    #[test]
    fn generations_chain() {
        // root announces one child, which announces two more
        let fb = vector![64, 64];
        let mut root = Tile::at(vector![0, 0], fb, 0);
        root.children = 1;
        let mid = with_generation(solid_tile(vector![0, 0], color::new(0.5, 0.0, 0.0, 0.5), 1.0), 1, 2);
        let leaf_a = with_generation(solid_tile(vector![0, 0], blue(), 3.0), 2, 0);
        let leaf_b = with_generation(solid_tile(vector![0, 0], blue(), 4.0), 2, 0);

        let mut c = Compositor::new(FrameMode::AlphaBlend);
        c.new_frame(0);
        assert!(c.process(&leaf_a, &params(1)).is_none());
        assert!(c.process(&root, &params(1)).is_none());
        assert!(c.process(&leaf_b, &params(1)).is_none());
        let done = c.process(&mid, &params(1)).unwrap();
        assert_eq!(done.color(0), color::new(0.5, 0.0, 0.5, 1.0));
    }

    #[test]
    fn single_contribution_without_children_completes() {
        let mut c = Compositor::new(FrameMode::AlphaBlend);
        c.new_frame(0);
        let tile = solid_tile(vector![0, 0], red(), 1.0);
        assert!(c.process(&tile, &params(1)).is_some());
    }

    #[test]
    fn undercounted_children_stay_pending() {
        let mut c = Compositor::new(FrameMode::AlphaBlend);
        c.new_frame(3);
        let mut root = Tile::at(vector![0, 0], vector![64, 64], 0);
        root.children = 2;
        let child = with_generation(solid_tile(vector![0, 0], red(), 1.0), 1, 0);

        assert!(c.process(&root, &params(1)).is_none());
        assert!(c.process(&child, &params(1)).is_none());
        assert_eq!(c.buffered(), 2);

        // The next frame starts clean
        c.new_frame(3);
        assert_eq!(c.buffered(), 0);
        assert!(c.process(&child.clone(), &params(1)).is_none());
        let mut solo = child;
        solo.generation = 0;
        c.new_frame(3);
        assert!(c.process(&solo, &params(1)).is_some());
    }
}
