//! Per-pixel compositing and accumulation kernels.

use crate::{
    color::{self, RGBA},
    tile::{Tile, TileColor},
};

use super::{ColorBufferFormat, FrameParams};

/// Keep the nearer of `src` and `dst` in every valid pixel of `dst`.
pub fn z_composite(src: &Tile, dst: &mut Tile) {
    for i in src.valid_indices() {
        if src.z[i] < dst.z[i] {
            dst.copy_pixel(i, src);
        }
    }
}

/// Blend fragments front to back with the "over" operator.
///
/// Tiles are ordered by their sort key first, the result takes the region of
/// the first tile and the minimum depth over all fragments.
pub fn sort_and_blend(tiles: &mut [(f32, &Tile)]) -> Option<Tile> {
    tiles.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (_, first) = tiles.first()?;

    let mut out = Tile::new(first.region.clone(), first.fb_size, first.accum_id);
    out.generation = first.generation;
    out.children = first.children;
    for i in first.valid_indices() {
        let mut acc = color::zero();
        let mut depth = f32::INFINITY;
        let mut aux_set = false;
        for (_, tile) in tiles.iter() {
            let frag = tile.color(i);
            acc += (1.0 - acc.w) * frag;
            depth = depth.min(tile.z[i]);
            if !aux_set && frag.w > 0.0 {
                out.normal[i] = tile.normal[i];
                out.albedo[i] = tile.albedo[i];
                aux_set = true;
            }
        }
        out.set_color(i, acc);
        out.z[i] = depth;
    }
    Some(out)
}

/// Persistent buffers of one tile across frames
pub struct AccumTiles<'a> {
    pub final_: &'a mut Tile,
    pub accum: &'a mut Tile,
    pub variance: &'a mut Tile,
}

/// Fold a complete frame tile into the accumulation buffers.
///
/// Writes the normalized result into `final_` and returns the estimated error
/// of the tile, infinite when it cannot be estimated yet.
pub fn accumulate(tile: &Tile, bufs: AccumTiles, params: &FrameParams) -> f32 {
    let AccumTiles {
        final_,
        accum,
        variance,
    } = bufs;
    let accum_id = tile.accum_id;
    let restart = !params.has_accum || accum_id <= 0;
    let rcp_samples = if restart {
        1.0
    } else {
        1.0 / (accum_id as f32 + 1.0)
    };
    let track_variance = params.has_variance && !restart;
    let sample_variance = track_variance && accum_id % 2 == 1;
    let estimate = track_variance && accum_id >= 1;
    let rcp_variance = 2.0 / (accum_id as f32 + 1.0);

    final_.copy_meta(tile);
    let mut err_sum = 0.0;
    let mut pixels = 0usize;
    for i in tile.valid_indices() {
        let col = tile.color(i);
        let acc = if restart {
            col
        } else {
            accum.color(i) + col
        };
        if params.has_accum {
            accum.set_color(i, acc);
        }
        if params.has_variance {
            if restart {
                variance.set_color(i, color::zero());
            } else if sample_variance {
                variance.set_color(i, variance.color(i) + col);
            }
        }

        let fin = acc * rcp_samples;
        final_.set_color(i, fin);
        final_.z[i] = tile.z[i];
        final_.normal[i] = tile.normal[i];
        final_.albedo[i] = tile.albedo[i];

        if estimate {
            let den = rgb_sum(&fin);
            if den > 0.0 {
                let var = variance.color(i) * rcp_variance;
                err_sum += (den - rgb_sum(&var)).abs() / den.sqrt();
            }
        }
        pixels += 1;
    }

    if estimate && pixels > 0 {
        err_sum / pixels as f32
    } else {
        f32::INFINITY
    }
}

fn rgb_sum(c: &RGBA) -> f32 {
    c.x + c.y + c.z
}

/// Convert the normalized colors of `tile` to the framebuffer's pixel format
pub fn convert(tile: &Tile, format: ColorBufferFormat) -> TileColor {
    match format {
        ColorBufferFormat::None => TileColor::None,
        ColorBufferFormat::Rgba32F => {
            TileColor::Rgba32F((0..tile.r.len()).map(|i| tile.color(i)).collect())
        }
        ColorBufferFormat::Rgba8 => {
            TileColor::Rgba8((0..tile.r.len()).map(|i| pack_rgba8(tile.color(i))).collect())
        }
        ColorBufferFormat::Srgba => TileColor::Rgba8(
            (0..tile.r.len())
                .map(|i| {
                    let c = tile.color(i);
                    let s = color::new(to_srgb(c.x), to_srgb(c.y), to_srgb(c.z), c.w);
                    pack_rgba8(s)
                })
                .collect(),
        ),
    }
}

/// Red in the lowest byte
pub fn pack_rgba8(c: RGBA) -> u32 {
    let q = |v: f32| (255.0 * v.clamp(0.0, 1.0)) as u32;
    q(c.x) | q(c.y) << 8 | q(c.z) << 16 | q(c.w) << 24
}

pub fn unpack_rgba8(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn to_srgb(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        12.92 * v
    } else if v >= 1.0 {
        1.0
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod test {

    use nalgebra::vector;

    use super::*;
    use crate::test_helpers::*;

    fn params(has_accum: bool, has_variance: bool) -> FrameParams {
        FrameParams {
            format: ColorBufferFormat::Rgba32F,
            has_accum,
            has_variance,
            num_workers: 1,
        }
    }

    #[test]
    fn z_composite_is_order_independent() {
        let a = solid_tile(vector![0, 0], red(), 1.0);
        let b = solid_tile(vector![0, 0], blue(), 2.0);

        let mut ab = a.clone();
        z_composite(&b, &mut ab);
        let mut ba = b.clone();
        z_composite(&a, &mut ba);

        assert_eq!(ab, ba);
        assert_eq!(ab.color(0), red());
        assert_eq!(ab.z[0], 1.0);
    }

    #[test]
    fn opaque_front_fragment_dominates() {
        let front = solid_tile(vector![0, 0], red(), 1.0);
        let back = solid_tile(vector![0, 0], color::new(0.0, 0.0, 0.5, 0.5), 2.0);

        let mut order_a = vec![(2.0, &back), (1.0, &front)];
        let mut order_b = vec![(1.0, &front), (2.0, &back)];
        let a = sort_and_blend(&mut order_a).unwrap();
        let b = sort_and_blend(&mut order_b).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.color(0), red());
        assert_eq!(a.z[0], 1.0);
    }

    #[test]
    fn translucent_front_fragment_blends() {
        let half_red = solid_tile(vector![0, 0], color::new(0.5, 0.0, 0.0, 0.5), 1.0);
        let back = solid_tile(vector![0, 0], blue(), 2.0);

        let mut frags = vec![(2.0, &back), (1.0, &half_red)];
        let out = sort_and_blend(&mut frags).unwrap();
        assert_eq!(out.color(0), color::new(0.5, 0.0, 0.5, 1.0));
    }

    #[test]
    fn first_frame_is_copied() {
        let tile = solid_tile(vector![0, 0], color::new(0.2, 0.4, 0.6, 1.0), 3.0);
        let mut acc = blank_buffers(vector![0, 0]);
        let err = accumulate_into(&tile, &mut acc, &params(true, true));

        assert_eq!(acc.final_.color(5), tile.color(5));
        assert_eq!(acc.accum.color(5), tile.color(5));
        assert_eq!(acc.final_.z[5], 3.0);
        assert!(err.is_infinite());
    }

    #[test]
    fn accumulation_averages_frames() {
        let p = params(true, false);
        let mut acc = blank_buffers(vector![0, 0]);

        let mut tile = solid_tile(vector![0, 0], color::new(1.0, 0.0, 0.0, 1.0), 1.0);
        accumulate_into(&tile, &mut acc, &p);
        tile.fill(color::new(0.0, 0.0, 0.0, 1.0), 1.0);
        tile.accum_id = 1;
        accumulate_into(&tile, &mut acc, &p);

        assert_eq!(acc.final_.color(0), color::new(0.5, 0.0, 0.0, 1.0));
    }

    #[test]
    fn converged_tile_has_no_error() {
        let p = params(true, true);
        let mut acc = blank_buffers(vector![0, 0]);
        let grey = color::new(0.5, 0.5, 0.5, 1.0);
        let mut tile = solid_tile(vector![0, 0], grey, 1.0);

        accumulate_into(&tile, &mut acc, &p);
        tile.accum_id = 1;
        let err = accumulate_into(&tile, &mut acc, &p);
        assert_eq!(err, 0.0);

        // A differing sample in an odd frame shows up as error
        tile.accum_id = 2;
        accumulate_into(&tile, &mut acc, &p);
        tile.accum_id = 3;
        tile.fill(color::new(1.0, 1.0, 1.0, 1.0), 1.0);
        let err = accumulate_into(&tile, &mut acc, &p);
        assert!(err > 0.0 && err.is_finite());
    }

    #[test]
    fn without_accumulation_every_frame_restarts() {
        let p = params(false, false);
        let mut acc = blank_buffers(vector![0, 0]);
        let mut tile = solid_tile(vector![0, 0], red(), 1.0);
        tile.accum_id = 4;
        accumulate_into(&tile, &mut acc, &p);
        assert_eq!(acc.final_.color(0), red());
    }

    #[test]
    fn pixel_formats() {
        let tile = solid_tile(vector![0, 0], color::new(1.0, 0.5, 0.0, 1.0), 1.0);

        match convert(&tile, ColorBufferFormat::Rgba8) {
            TileColor::Rgba8(px) => assert_eq!(unpack_rgba8(px[0]), [255, 127, 0, 255]),
            other => panic!("unexpected {other:?}"),
        }
        match convert(&tile, ColorBufferFormat::Srgba) {
            TileColor::Rgba8(px) => {
                let [r, g, b, a] = unpack_rgba8(px[0]);
                assert_eq!((r, b, a), (255, 0, 255));
                // Mid grey is brightened by the transfer curve
                assert!(g > 180);
            }
            other => panic!("unexpected {other:?}"),
        }
        match convert(&tile, ColorBufferFormat::Rgba32F) {
            TileColor::Rgba32F(px) => assert_eq!(px[0], tile.color(0)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(convert(&tile, ColorBufferFormat::None).is_none());
    }
}
