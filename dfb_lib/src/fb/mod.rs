//! Distributed frame buffer: tile ownership, compositing, accumulation and
//! frame completion.

mod dfb;
mod frame;
pub mod kernels;
mod tile_data;
mod tile_error;
mod tile_types;

pub use dfb::{DfbError, DistributedFrameBuffer, TileSink};
pub use frame::{ColorBuffer, FrameImage};
pub use tile_data::{FinishedTile, TileData, TileDesc};
pub use tile_error::TileError;
pub use tile_types::{AlphaBlendState, BufferedTile, Compositor, ZCompositeState};

/// Pixel format of the color buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorBufferFormat {
    /// 8 bit per channel linear RGBA
    Rgba8,
    /// 8 bit per channel, sRGB encoded color, linear alpha
    Srgba,
    Rgba32F,
    /// No color buffer, completion is still tracked
    None,
}

/// Compositing architecture of the renderer feeding the frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Sort-first, every region rendered by exactly one worker
    WriteOnce,
    /// Every worker renders every region, nearest fragment wins
    ZComposite,
    /// Sort-last with ordered alpha blending
    AlphaBlend,
}

/// Frame buffer properties the compositing kernels depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub format: ColorBufferFormat,
    pub has_accum: bool,
    pub has_variance: bool,
    pub num_workers: usize,
}

/// Channels reset by [`DistributedFrameBuffer::clear`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FbChannels {
    pub color: bool,
    pub depth: bool,
    pub accum: bool,
}

impl FbChannels {
    pub fn all() -> Self {
        Self {
            color: true,
            depth: true,
            accum: true,
        }
    }
}
