//! Configuration of the communication layer and of frame buffers.

use nalgebra::Vector2;
use thiserror::Error;

use crate::fb::{ColorBufferFormat, FrameMode};

/// Bytes broadcast by the first call of every batch, padding included
pub const FIRST_BCAST_CHUNK: usize = 2048;
/// Largest single broadcast, stays under the 2 GiB limit of MPI implementations
pub const MAX_BCAST: usize = 1_800_000_000;
/// Size of the `[u64 totalSize][i32 count]` batch header
pub const BATCH_HEADER_SIZE: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("frame buffer size must be non-zero, got {0}x{1}")]
    EmptyFrameBuffer(usize, usize),
    #[error("variance buffer requires an accumulation buffer")]
    VarianceWithoutAccumulation,
    #[error("first broadcast chunk of {0} bytes cannot hold the batch header")]
    FirstChunkTooSmall(usize),
    #[error("broadcast limit must be positive")]
    ZeroBroadcastLimit,
}

/// Batching and chunking parameters of a [`BufferedComm`](crate::comm::BufferedComm)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommConfig {
    pub first_chunk: usize,
    pub max_bcast: usize,
    /// Initial size of the send and receive buffers
    pub initial_capacity: usize,
}

impl CommConfig {
    pub fn new(
        first_chunk: usize,
        max_bcast: usize,
        initial_capacity: usize,
    ) -> Result<CommConfig, ConfigError> {
        if first_chunk < BATCH_HEADER_SIZE {
            return Err(ConfigError::FirstChunkTooSmall(first_chunk));
        }
        if max_bcast == 0 {
            return Err(ConfigError::ZeroBroadcastLimit);
        }
        Ok(CommConfig {
            first_chunk,
            max_bcast,
            initial_capacity,
        })
    }
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            first_chunk: FIRST_BCAST_CHUNK,
            max_bcast: MAX_BCAST,
            initial_capacity: crate::serial::DEFAULT_CAPACITY,
        }
    }
}

/// Validated frame buffer settings, see [`FrameBufferConfigBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBufferConfig {
    pub size: Vector2<usize>,
    pub color_format: ColorBufferFormat,
    pub accumulation: bool,
    pub variance: bool,
    pub frame_mode: FrameMode,
}

impl FrameBufferConfig {
    pub fn builder(width: usize, height: usize) -> FrameBufferConfigBuilder {
        FrameBufferConfigBuilder::new(width, height)
    }
}

pub struct FrameBufferConfigBuilder {
    size: Vector2<usize>,
    color_format: ColorBufferFormat,
    accumulation: bool,
    variance: bool,
    frame_mode: FrameMode,
}

impl FrameBufferConfigBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            size: Vector2::new(width, height),
            color_format: ColorBufferFormat::Rgba8,
            accumulation: false,
            variance: false,
            frame_mode: FrameMode::WriteOnce,
        }
    }

    pub fn color_format(mut self, color_format: ColorBufferFormat) -> Self {
        self.color_format = color_format;
        self
    }

    pub fn accumulation(mut self, accumulation: bool) -> Self {
        self.accumulation = accumulation;
        self
    }

    pub fn variance(mut self, variance: bool) -> Self {
        self.variance = variance;
        self
    }

    pub fn frame_mode(mut self, frame_mode: FrameMode) -> Self {
        self.frame_mode = frame_mode;
        self
    }

    pub fn build(self) -> Result<FrameBufferConfig, ConfigError> {
        if self.size.x == 0 || self.size.y == 0 {
            return Err(ConfigError::EmptyFrameBuffer(self.size.x, self.size.y));
        }
        if self.variance && !self.accumulation {
            return Err(ConfigError::VarianceWithoutAccumulation);
        }
        Ok(FrameBufferConfig {
            size: self.size,
            color_format: self.color_format,
            accumulation: self.accumulation,
            variance: self.variance,
            frame_mode: self.frame_mode,
        })
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn builder_validates() {
        let cfg = FrameBufferConfig::builder(100, 50)
            .accumulation(true)
            .variance(true)
            .frame_mode(FrameMode::AlphaBlend)
            .build()
            .unwrap();
        assert_eq!(cfg.size, Vector2::new(100, 50));
        assert_eq!(cfg.frame_mode, FrameMode::AlphaBlend);

        assert_eq!(
            FrameBufferConfig::builder(0, 50).build(),
            Err(ConfigError::EmptyFrameBuffer(0, 50))
        );
        assert_eq!(
            FrameBufferConfig::builder(10, 10).variance(true).build(),
            Err(ConfigError::VarianceWithoutAccumulation)
        );
    }

    #[test]
    fn comm_limits() {
        assert_eq!(
            CommConfig::new(8, 100, 0),
            Err(ConfigError::FirstChunkTooSmall(8))
        );
        assert_eq!(
            CommConfig::new(64, 0, 0),
            Err(ConfigError::ZeroBroadcastLimit)
        );
        let cfg = CommConfig::default();
        assert_eq!(cfg.first_chunk, 2048);
        assert_eq!(cfg.max_bcast, 1_800_000_000);
    }
}
