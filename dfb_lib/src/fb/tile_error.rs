use nalgebra::Vector2;

use crate::common::PixelBox;

/// Per-tile error estimates and the regions of tiles still being refined.
///
/// Regions are boxes in tile units. A region whose average error drops low
/// enough is split in half along its longer side, small converged regions are
/// dropped. Tiles of one region share the maximal error of the region so they
/// keep refining as a group.
#[derive(Debug, Clone)]
pub struct TileError {
    num_tiles: Vector2<usize>,
    errors: Vec<f32>,
    regions: Vec<PixelBox>,
}

impl TileError {
    /// Error tracking for a `num_tiles` grid, empty grid disables it
    pub fn new(num_tiles: Vector2<usize>) -> Self {
        let mut te = Self {
            num_tiles,
            errors: vec![f32::INFINITY; num_tiles.x * num_tiles.y],
            regions: Vec::new(),
        };
        te.clear();
        te
    }

    pub fn is_enabled(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn num_tiles(&self) -> Vector2<usize> {
        self.num_tiles
    }

    /// Error of tile `tile_id`, infinite when error tracking is disabled
    pub fn get(&self, tile_id: usize) -> f32 {
        self.errors.get(tile_id).copied().unwrap_or(f32::INFINITY)
    }

    pub fn update(&mut self, tile_id: usize, error: f32) {
        if let Some(e) = self.errors.get_mut(tile_id) {
            *e = error;
        }
    }

    /// Forget all estimates and start over with one region covering the grid
    pub fn clear(&mut self) {
        self.errors.fill(f32::INFINITY);
        self.regions.clear();
        if self.is_enabled() {
            self.regions
                .push(PixelBox::new(0..self.num_tiles.x, 0..self.num_tiles.y));
        }
    }

    pub fn regions(&self) -> &[PixelBox] {
        &self.regions
    }

    pub fn errors(&self) -> &[f32] {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut [f32] {
        &mut self.errors
    }

    /// Refine regions against `threshold`, returns the largest tile error.
    pub fn refine(&mut self, threshold: f32) -> f32 {
        if !self.is_enabled() {
            return f32::INFINITY;
        }

        let regions = std::mem::take(&mut self.regions);
        for region in regions {
            let mut sum = 0.0;
            let mut max = 0.0f32;
            for y in region.y.clone() {
                for x in region.x.clone() {
                    let e = self.errors[y * self.num_tiles.x + x];
                    sum += e;
                    max = max.max(e);
                }
            }
            for y in region.y.clone() {
                for x in region.x.clone() {
                    self.errors[y * self.num_tiles.x + x] = max;
                }
            }

            let area = region.items();
            let avg = sum / area as f32;
            if avg >= 4.0 * threshold {
                self.regions.push(region);
                continue;
            }
            if area <= 2 {
                // Converged, a split would leave single tiles
                continue;
            }
            let (a, b) = split(&region);
            self.regions.push(a);
            self.regions.push(b);
        }

        self.errors.iter().copied().fold(0.0, f32::max)
    }
}

fn split(region: &PixelBox) -> (PixelBox, PixelBox) {
    if region.width() > region.height() {
        let mid = region.x.start + region.width() / 2;
        (
            PixelBox::new(region.x.start..mid, region.y.clone()),
            PixelBox::new(mid..region.x.end, region.y.clone()),
        )
    } else {
        let mid = region.y.start + region.height() / 2;
        (
            PixelBox::new(region.x.clone(), region.y.start..mid),
            PixelBox::new(region.x.clone(), mid..region.y.end),
        )
    }
}

#[cfg(test)]
mod test {

    use nalgebra::vector;

    use super::*;

    #[test]
    fn starts_unconverged() {
        let te = TileError::new(vector![4, 2]);
        assert!(te.is_enabled());
        assert!(te.get(7).is_infinite());
        assert_eq!(te.regions(), &[PixelBox::new(0..4, 0..2)]);

        let off = TileError::new(vector![0, 0]);
        assert!(!off.is_enabled());
        assert!(off.regions().is_empty());
    }

    #[test]
    fn converging_region_splits_along_longer_side() {
        let mut te = TileError::new(vector![4, 2]);
        for t in 0..8 {
            te.update(t, 0.1);
        }
        te.update(5, 0.3);

        let max = te.refine(0.1);
        assert_eq!(max, 0.3);
        // Whole region takes its maximum
        assert!(te.errors().iter().all(|&e| e == 0.3));
        assert_eq!(
            te.regions(),
            &[PixelBox::new(0..2, 0..2), PixelBox::new(2..4, 0..2)]
        );
    }

    #[test]
    fn noisy_region_is_kept() {
        let mut te = TileError::new(vector![2, 2]);
        for t in 0..4 {
            te.update(t, 1.0);
        }
        assert_eq!(te.refine(0.1), 1.0);
        assert_eq!(te.regions().len(), 1);
    }

    #[test]
    fn small_converged_regions_are_dropped() {
        let mut te = TileError::new(vector![2, 1]);
        te.update(0, 0.01);
        te.update(1, 0.02);
        te.refine(0.1);
        assert!(te.regions().is_empty());

        te.clear();
        assert_eq!(te.regions().len(), 1);
        assert!(te.get(0).is_infinite());
    }
}
