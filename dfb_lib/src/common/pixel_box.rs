use std::{cmp::min, ops::Range};

use nalgebra::{vector, Vector2};

/// Rectangle of pixels, described by half-open ranges on both axes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixelBox {
    pub x: Range<usize>,
    pub y: Range<usize>,
}

impl PixelBox {
    pub fn new(x: Range<usize>, y: Range<usize>) -> Self {
        Self { x, y }
    }

    /// Box of one tile starting at `lower`, clipped to the edge of a `fb_size` framebuffer.
    pub fn tile_at(lower: Vector2<usize>, tile_side: usize, fb_size: Vector2<usize>) -> Self {
        let high_x = min(lower.x + tile_side, fb_size.x);
        let high_y = min(lower.y + tile_side, fb_size.y);
        Self {
            x: lower.x..high_x,
            y: lower.y..high_y,
        }
    }

    pub fn lower(&self) -> Vector2<usize> {
        vector![self.x.start, self.y.start]
    }

    pub fn upper(&self) -> Vector2<usize> {
        vector![self.x.end, self.y.end]
    }

    pub fn width(&self) -> usize {
        self.x.end.saturating_sub(self.x.start)
    }

    pub fn height(&self) -> usize {
        self.y.end.saturating_sub(self.y.start)
    }

    /// Number of pixels inside the box
    pub fn items(&self) -> usize {
        self.width() * self.height()
    }

    /// True if the lower corner sits on the tile grid
    pub fn is_aligned(&self, tile_side: usize) -> bool {
        self.x.start % tile_side == 0 && self.y.start % tile_side == 0
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn tile_clipped_to_framebuffer() {
        let fb = vector![100, 70];

        let inner = PixelBox::tile_at(vector![0, 0], 64, fb);
        assert_eq!(inner, PixelBox::new(0..64, 0..64));
        assert_eq!(inner.items(), 64 * 64);

        let edge = PixelBox::tile_at(vector![64, 64], 64, fb);
        assert_eq!(edge, PixelBox::new(64..100, 64..70));
        assert_eq!(edge.width(), 36);
        assert_eq!(edge.height(), 6);
        assert!(edge.is_aligned(64));
    }
}
