//! Distributed frame buffer for sort-first and sort-last parallel rendering.
//!
//! Workers render [`Tile`](tile::Tile)s and hand them to a
//! [`DistributedFrameBuffer`](fb::DistributedFrameBuffer), which moves them to the
//! rank owning the region, composites partial contributions, accumulates
//! frames and assembles the final image on the master rank. Messages between
//! ranks are batched by a [`BufferedComm`](comm::BufferedComm) over any
//! [`Collective`](comm::Collective) transport.

pub mod color;
pub mod comm;
pub mod common;
pub mod config;
pub mod fb;
pub mod serial;
pub mod test_helpers;
pub mod tile;
pub mod work;

pub use comm::{BufferedComm, Collective, LocalFabric};
pub use config::{CommConfig, FrameBufferConfig};
pub use fb::{ColorBufferFormat, DistributedFrameBuffer, FrameMode, TileSink};
pub use tile::{Tile, TILE_SIZE};
