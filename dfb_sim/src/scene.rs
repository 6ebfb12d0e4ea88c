//! Procedural stand-in for a renderer.
//!
//! Every worker "owns" one shaded disc. Depending on the frame mode the
//! workers either render the whole scene for a share of the tiles, or only
//! their own disc for every tile and leave the rest to compositing.

use dfb_lib::{
    color::{self, RGBA},
    comm::Collective,
    tile::{Tile, TILE_SIZE},
    DistributedFrameBuffer, FrameMode,
};
use nalgebra::{vector, Vector2};

/// Opacity of discs in the alpha blended scene
const LAYER_ALPHA: f32 = 0.5;
/// Amplitude of per-sample noise
const NOISE: f32 = 0.1;

#[derive(Debug, Clone)]
struct Disc {
    center: Vector2<f32>,
    radius: f32,
    depth: f32,
    color: RGBA,
}

impl Disc {
    /// Depth and facing ratio where pixel `p` hits the disc
    fn hit(&self, p: Vector2<f32>) -> Option<(f32, f32)> {
        let d2 = (p - self.center).norm_squared();
        let r2 = self.radius * self.radius;
        if d2 >= r2 {
            return None;
        }
        let facing = (1.0 - d2 / r2).sqrt();
        Some((self.depth - facing, facing))
    }
}

pub struct Scene {
    discs: Vec<Disc>,
    mode: FrameMode,
    seed: u64,
}

impl Scene {
    pub fn new(fb_size: Vector2<usize>, num_workers: usize, mode: FrameMode, seed: u64) -> Self {
        let (w, h) = (fb_size.x as f32, fb_size.y as f32);
        let radius = 0.4 * w.min(h);
        let discs = (0..num_workers)
            .map(|i| {
                let t = (i as f32 + 0.5) / num_workers as f32;
                let hue = color::new(t, 0.4 + 0.4 * (1.0 - t), 1.0 - t, 1.0);
                Disc {
                    center: vector![t * w, h * (0.35 + 0.3 * t)],
                    radius,
                    depth: 2.0 + i as f32,
                    color: hue,
                }
            })
            .collect();
        Self { discs, mode, seed }
    }

    /// Tiles `worker` renders this frame out of `active`
    pub fn assigned(&self, active: &[usize], worker: usize, frame: usize) -> Vec<usize> {
        match self.mode {
            FrameMode::WriteOnce => {
                let n = self.discs.len();
                active
                    .iter()
                    .copied()
                    .filter(|&t| (t + frame + 1) % n == worker)
                    .collect()
            }
            _ => active.to_vec(),
        }
    }

    /// Contributions of `worker` to tile `tile_id`
    pub fn render<C: Collective>(
        &self,
        dfb: &DistributedFrameBuffer<C>,
        worker: usize,
        tile_id: usize,
    ) -> Vec<Tile> {
        let mut tile = match dfb.new_tile(tile_id) {
            Some(t) => t,
            None => return Vec::new(),
        };
        let mut rng = fastrand::Rng::with_seed(
            self.seed ^ ((tile_id as u64) << 20) ^ ((worker as u64) << 8) ^ tile.accum_id as u64,
        );

        match self.mode {
            FrameMode::WriteOnce => {
                self.shade(&mut tile, &self.discs, 1.0, &mut rng);
                vec![tile]
            }
            FrameMode::ZComposite => {
                self.shade(&mut tile, &self.discs[worker..=worker], 1.0, &mut rng);
                vec![tile]
            }
            FrameMode::AlphaBlend => {
                let mut layers = Vec::with_capacity(2);
                if dfb.owner_rank(tile_id) == Some(dfb.comm().rank()) {
                    let mut root = tile.clone();
                    root.children = self.discs.len() as i32;
                    layers.push(root);
                }
                self.shade(&mut tile, &self.discs[worker..=worker], LAYER_ALPHA, &mut rng);
                tile.generation = 1;
                layers.push(tile);
                layers
            }
        }
    }

    fn shade(&self, tile: &mut Tile, discs: &[Disc], alpha: f32, rng: &mut fastrand::Rng) {
        let lower = tile.region.lower();
        let indices: Vec<usize> = tile.valid_indices().collect();
        for i in indices {
            let p = vector![
                (lower.x + i % TILE_SIZE) as f32 + rng.f32(),
                (lower.y + i / TILE_SIZE) as f32 + rng.f32()
            ];
            let nearest = discs
                .iter()
                .filter_map(|d| d.hit(p).map(|(z, facing)| (z, facing, d)))
                .min_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((z, facing, disc)) = nearest {
                let light = facing * (1.0 - NOISE + NOISE * rng.f32());
                let c = disc.color * light;
                tile.set_color(i, color::premultiplied(c.x, c.y, c.z, alpha));
                tile.z[i] = z;
            }
        }
    }
}
