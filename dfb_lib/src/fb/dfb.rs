use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{vector, Vector2};
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::{
    comm::{Address, BufferedComm, Collective, CommError},
    config::{ConfigError, FrameBufferConfig},
    tile::{Tile, TileColor, TILE_SIZE},
    work::{MasterTileMessage, Work, WriteTileMessage},
};

use super::{
    frame::FrameImage,
    tile_data::{FinishedTile, TileData, TileDesc},
    tile_error::TileError,
    FbChannels, FrameMode, FrameParams,
};

#[derive(Error, Debug)]
pub enum DfbError {
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("pixel ({0}, {1}) lies outside of the frame buffer")]
    TileOutOfRange(usize, usize),
    #[error("tile at ({0}, {1}) is not a tile of this frame buffer")]
    InvalidTile(usize, usize),
    #[error("frame not finished in time, {incomplete} tiles incomplete")]
    FrameTimeout { incomplete: usize },
    #[error("frame buffer has no color buffer on this rank")]
    NoMasterImage,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Receives finished tiles on the rank owning them
pub trait TileSink: Send + Sync {
    fn tile_completed(&self, tile: &FinishedTile);
}

enum TileEntry {
    Owned(TileData),
    Remote(TileDesc),
}

impl TileEntry {
    fn desc(&self) -> &TileDesc {
        match self {
            TileEntry::Owned(td) => td.desc(),
            TileEntry::Remote(desc) => desc,
        }
    }
}

struct FrameState {
    active: bool,
    done: bool,
    /// Last frame was closed by `abort_frame`, its stragglers are dropped
    aborted: bool,
    completed: usize,
    completed_tiles: Vec<bool>,
    /// Work that arrived before the frame started
    delayed: Vec<Work>,
    accum_ids: Vec<i32>,
}

/// Coordinator owning the tiles of one distributed frame buffer.
///
/// Rank 0 is the master, it assembles the image and tracks errors. With more
/// than one rank the remaining ranks are the workers, tile `t` belongs to
/// worker `t % num_workers` living on rank `owner + 1`. A single rank is both
/// master and the only worker.
///
/// `start_new_frame`, `exchange_tiles` and `end_frame` are collective, every
/// rank has to call them in the same order.
pub struct DistributedFrameBuffer<C: Collective> {
    comm: Arc<BufferedComm<C>>,
    size: Vector2<usize>,
    num_tiles: Vector2<usize>,
    params: FrameParams,
    frame_mode: FrameMode,
    tiles: Vec<TileEntry>,
    /// Number of tiles owned by this rank
    my_tiles: usize,
    sink: Option<Arc<dyn TileSink>>,
    frame: Mutex<FrameState>,
    frame_done: Condvar,
    error: Mutex<TileError>,
    image: Mutex<Option<FrameImage>>,
}

impl<C: Collective> DistributedFrameBuffer<C> {
    pub fn new(
        comm: Arc<BufferedComm<C>>,
        config: FrameBufferConfig,
        sink: Option<Arc<dyn TileSink>>,
    ) -> Result<Self, DfbError> {
        let FrameBufferConfig {
            size,
            color_format,
            accumulation,
            variance,
            frame_mode,
        } = config;
        if size.x == 0 || size.y == 0 {
            return Err(ConfigError::EmptyFrameBuffer(size.x, size.y).into());
        }
        if variance && !accumulation {
            return Err(ConfigError::VarianceWithoutAccumulation.into());
        }

        let num_tiles = vector![
            (size.x + TILE_SIZE - 1) / TILE_SIZE,
            (size.y + TILE_SIZE - 1) / TILE_SIZE
        ];
        let total = num_tiles.x * num_tiles.y;
        let params = FrameParams {
            format: color_format,
            has_accum: accumulation,
            has_variance: variance,
            num_workers: comm.num_workers(),
        };
        let error_grid = if variance { num_tiles } else { vector![0, 0] };
        let image = if comm.rank() == 0 {
            FrameImage::new(size, color_format)
        } else {
            None
        };
        // Accumulation ids are bumped at the start of every frame
        let first_accum_id = if accumulation { -1 } else { 0 };

        let mut dfb = Self {
            comm,
            size,
            num_tiles,
            params,
            frame_mode,
            tiles: Vec::new(),
            my_tiles: 0,
            sink,
            frame: Mutex::new(FrameState {
                active: false,
                done: false,
                aborted: false,
                completed: 0,
                completed_tiles: vec![false; total],
                delayed: Vec::new(),
                accum_ids: vec![first_accum_id; total],
            }),
            frame_done: Condvar::new(),
            error: Mutex::new(TileError::new(error_grid)),
            image: Mutex::new(image),
        };
        dfb.create_tiles();
        debug!(
            rank = dfb.comm.rank(),
            tiles = total,
            mine = dfb.my_tiles,
            "frame buffer created"
        );
        Ok(dfb)
    }

    fn create_tiles(&mut self) {
        let rank = self.comm.rank();
        let mut tiles = Vec::with_capacity(self.total_tiles());
        let mut mine = 0;
        for y in (0..self.size.y).step_by(TILE_SIZE) {
            for x in (0..self.size.x).step_by(TILE_SIZE) {
                let tile_id = tiles.len();
                let owner_id = tile_id % self.params.num_workers;
                let desc = TileDesc::new(tile_id, owner_id, vector![x, y]);
                if self.worker_rank(owner_id) == rank {
                    tiles.push(TileEntry::Owned(TileData::new(
                        desc,
                        self.size,
                        self.frame_mode,
                    )));
                    mine += 1;
                } else {
                    tiles.push(TileEntry::Remote(desc));
                }
            }
        }
        self.tiles = tiles;
        self.my_tiles = mine;
    }

    /// Switch the compositing strategy, recreating the tiles. Not allowed during a frame.
    pub fn set_frame_mode(&mut self, mode: FrameMode) {
        debug_assert!(!self.frame.get_mut().active, "frame mode changed mid-frame");
        if self.frame_mode == mode {
            return;
        }
        self.frame_mode = mode;
        self.create_tiles();
    }

    pub fn frame_mode(&self) -> FrameMode {
        self.frame_mode
    }

    pub fn params(&self) -> &FrameParams {
        &self.params
    }

    pub fn size(&self) -> Vector2<usize> {
        self.size
    }

    pub fn num_tiles(&self) -> Vector2<usize> {
        self.num_tiles
    }

    pub fn total_tiles(&self) -> usize {
        self.num_tiles.x * self.num_tiles.y
    }

    pub fn comm(&self) -> &Arc<BufferedComm<C>> {
        &self.comm
    }

    pub fn is_master(&self) -> bool {
        self.comm.rank() == 0
    }

    /// Rank hosting worker `owner_id`
    pub fn worker_rank(&self, owner_id: usize) -> usize {
        if self.comm.size() > 1 {
            owner_id + 1
        } else {
            0
        }
    }

    pub fn tile_desc(&self, tile_id: usize) -> Option<&TileDesc> {
        self.tiles.get(tile_id).map(TileEntry::desc)
    }

    /// Rank finalizing tile `tile_id`
    pub fn owner_rank(&self, tile_id: usize) -> Option<usize> {
        self.tile_desc(tile_id)
            .map(|desc| self.worker_rank(desc.owner_id))
    }

    /// Tile containing pixel `pixel`
    pub fn tile_id_of(&self, pixel: Vector2<usize>) -> Result<usize, DfbError> {
        if pixel.x >= self.size.x || pixel.y >= self.size.y {
            return Err(DfbError::TileOutOfRange(pixel.x, pixel.y));
        }
        Ok(pixel.y / TILE_SIZE * self.num_tiles.x + pixel.x / TILE_SIZE)
    }

    /// Whether this rank owns tile `tile_id`
    pub fn is_mine(&self, tile_id: usize) -> bool {
        matches!(self.tiles.get(tile_id), Some(TileEntry::Owned(_)))
    }

    /// Cleared tile for a renderer, stamped with the current accumulation id
    pub fn new_tile(&self, tile_id: usize) -> Option<Tile> {
        let desc = self.tile_desc(tile_id)?;
        Some(Tile::at(desc.begin, self.size, self.accum_id(tile_id)))
    }

    /// Tiles a renderer should work on this frame
    pub fn active_tiles(&self) -> Vec<usize> {
        let state = self.frame.lock();
        (0..self.total_tiles())
            .filter(|&t| !state.completed_tiles[t])
            .collect()
    }

    pub fn accum_id(&self, tile_id: usize) -> i32 {
        self.frame.lock().accum_ids.get(tile_id).copied().unwrap_or(0)
    }

    pub fn tile_error(&self, tile_id: usize) -> f32 {
        self.error.lock().get(tile_id)
    }

    /// Contributions the owned tile `tile_id` processed this frame
    pub fn tile_contributions(&self, tile_id: usize) -> Option<usize> {
        match self.tiles.get(tile_id) {
            Some(TileEntry::Owned(td)) => Some(td.contributions()),
            _ => None,
        }
    }

    /// Start a frame. Collective when a variance buffer is configured.
    ///
    /// Tiles whose error is at or below `error_threshold` are considered done
    /// and keep their accumulation id.
    pub fn start_new_frame(&self, error_threshold: f32) -> Result<(), DfbError> {
        if self.params.has_variance {
            self.sync_errors()?;
        }
        for entry in &self.tiles {
            if let TileEntry::Owned(td) = entry {
                td.new_frame();
            }
        }

        let (delayed, expected) = {
            let mut state = self.frame.lock();
            let state = &mut *state;
            debug_assert!(!state.active, "frame started twice");
            state.completed = 0;
            state.completed_tiles.fill(false);
            if self.params.has_accum {
                let error = self.error.lock();
                for t in 0..self.total_tiles() {
                    if error.get(t) <= error_threshold {
                        state.completed_tiles[t] = true;
                        if self.is_master() || self.is_mine(t) {
                            state.completed += 1;
                        }
                    } else {
                        state.accum_ids[t] += 1;
                    }
                }
            }
            state.done = false;
            state.aborted = false;
            state.active = true;
            (std::mem::take(&mut state.delayed), self.expected_tiles())
        };
        debug!(
            rank = self.comm.rank(),
            delayed = delayed.len(),
            expected,
            "frame started"
        );

        for work in delayed {
            self.incoming(work)?;
        }

        let mut state = self.frame.lock();
        if state.active && state.completed == expected {
            self.close_frame(&mut state);
        }
        Ok(())
    }

    fn sync_errors(&self) -> Result<(), DfbError> {
        let mut error = self.error.lock();
        if !error.is_enabled() {
            return Ok(());
        }
        let mut bytes = vec![0; error.errors().len() * 4];
        if self.is_master() {
            LittleEndian::write_f32_into(error.errors(), &mut bytes);
        }
        self.comm.bcast_bytes(&mut bytes, 0)?;
        if !self.is_master() {
            LittleEndian::read_f32_into(&bytes, error.errors_mut());
        }
        Ok(())
    }

    /// Tiles whose completion closes the frame on this rank
    fn expected_tiles(&self) -> usize {
        if self.is_master() {
            self.total_tiles()
        } else {
            self.my_tiles
        }
    }

    /// Hand a rendered tile to its owner. Tiles of other ranks are queued for
    /// the next [`exchange_tiles`](Self::exchange_tiles).
    pub fn set_tile(&self, tile: &Tile) -> Result<(), DfbError> {
        let tile_id = self.checked_tile_id(tile)?;
        let msg = Work::WriteTile(WriteTileMessage::new(tile.clone()));
        if self.is_mine(tile_id) {
            return self.incoming(msg);
        }
        trace!(tile_id, "sending tile to owner");
        self.comm.send(Address::WORLD, &msg)?;
        Ok(())
    }

    /// Id of the tile `tile` covers. Tiles shaped for another frame buffer are rejected.
    fn checked_tile_id(&self, tile: &Tile) -> Result<usize, DfbError> {
        let lower = tile.region.lower();
        if tile.fb_size != self.size || !tile.is_well_formed() {
            return Err(DfbError::InvalidTile(lower.x, lower.y));
        }
        self.tile_id_of(lower)
    }

    fn process_local(&self, td: &TileData, tile: &Tile) -> Result<(), DfbError> {
        match td.process(tile, &self.params) {
            Some(done) => self.tile_is_completed(done),
            None => Ok(()),
        }
    }

    /// Route one received work unit. Units not meant for this rank are dropped.
    /// Units arriving before the frame started are held back, units arriving
    /// after an aborted frame are discarded.
    pub fn incoming(&self, work: Work) -> Result<(), DfbError> {
        match &work {
            Work::WriteTile(msg) => {
                let tile_id = self.checked_tile_id(&msg.tile)?;
                if !self.is_mine(tile_id) {
                    return Ok(());
                }
            }
            Work::MasterWriteTile(_) => {
                if !self.is_master() || self.comm.size() == 1 {
                    return Ok(());
                }
            }
        }

        {
            let mut state = self.frame.lock();
            if !state.active {
                if state.aborted {
                    warn!(
                        rank = self.comm.rank(),
                        tag = ?work.tag(),
                        "discarding work of an aborted frame"
                    );
                } else {
                    state.delayed.push(work);
                }
                return Ok(());
            }
            if let Work::WriteTile(msg) = &work {
                let tile_id = self.tile_id_of(msg.tile.region.lower())?;
                if state.completed_tiles[tile_id] {
                    trace!(tile_id, "dropping contribution to a finished tile");
                    return Ok(());
                }
            }
        }

        match work {
            Work::WriteTile(msg) => {
                let tile_id = self.tile_id_of(msg.tile.region.lower())?;
                if let TileEntry::Owned(td) = &self.tiles[tile_id] {
                    self.process_local(td, &msg.tile)?;
                }
                Ok(())
            }
            Work::MasterWriteTile(msg) => {
                self.master_tile_done(msg.coords, msg.error, &msg.color)?;
                Ok(())
            }
        }
    }

    fn tile_is_completed(&self, done: FinishedTile) -> Result<(), DfbError> {
        trace!(
            rank = self.comm.rank(),
            tile_id = done.tile_id,
            "tile completed"
        );
        if let Some(sink) = &self.sink {
            sink.tile_completed(&done);
        }

        let begin = done.region.lower();
        if self.is_master() {
            return self.master_tile_done(begin, done.error, &done.color);
        }

        let msg = Work::MasterWriteTile(MasterTileMessage::new(begin, done.error, done.color));
        self.comm.send(Address::WORLD, &msg)?;
        self.count_completed(done.tile_id);
        Ok(())
    }

    fn master_tile_done(
        &self,
        begin: Vector2<usize>,
        error: f32,
        color: &TileColor,
    ) -> Result<(), DfbError> {
        let tile_id = self.tile_id_of(begin)?;
        if self.params.has_variance && self.accum_id(tile_id) & 1 == 1 {
            self.error.lock().update(tile_id, error);
        }
        if !color.is_none() {
            if let Some(image) = self.image.lock().as_mut() {
                image.write_tile(begin, color);
            }
        }
        self.count_completed(tile_id);
        Ok(())
    }

    fn count_completed(&self, tile_id: usize) {
        let mut state = self.frame.lock();
        if !state.active {
            return;
        }
        if state.completed_tiles[tile_id] {
            trace!(tile_id, "tile already complete this frame");
            return;
        }
        state.completed += 1;
        state.completed_tiles[tile_id] = true;
        trace!(
            rank = self.comm.rank(),
            completed = state.completed,
            "marked tile done"
        );
        if state.completed == self.expected_tiles() {
            self.close_frame(&mut state);
        }
    }

    fn close_frame(&self, state: &mut FrameState) {
        debug!(rank = self.comm.rank(), "frame closed");
        state.active = false;
        state.done = true;
        self.frame_done.notify_all();
    }

    /// Move queued tiles to their owners and finished tiles to the master.
    /// Collective over all ranks.
    ///
    /// Runs two passes of rounds, one per root rank. The first pass delivers
    /// contributions, the second one the master messages of tiles completed by them.
    pub fn exchange_tiles(&self) -> Result<(), DfbError> {
        let rank = self.comm.rank();
        for _pass in 0..2 {
            for root in 0..self.comm.size() {
                if root == rank {
                    self.comm.end_round()?;
                } else {
                    for work in self.comm.recv_round(root)? {
                        self.incoming(work)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Block until every tile this rank waits for is complete
    pub fn wait_until_finished(&self) {
        let mut state = self.frame.lock();
        while !state.done {
            self.frame_done.wait(&mut state);
        }
    }

    /// Like [`wait_until_finished`](Self::wait_until_finished), giving up after `timeout`
    pub fn wait_until_finished_for(&self, timeout: Duration) -> Result<(), DfbError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.frame.lock();
        while !state.done {
            if self.frame_done.wait_until(&mut state, deadline).timed_out() && !state.done {
                let incomplete = self.expected_tiles().saturating_sub(state.completed);
                return Err(DfbError::FrameTimeout { incomplete });
            }
        }
        Ok(())
    }

    /// Give up on the current frame. Pending contributions are discarded at
    /// the start of the next one.
    pub fn abort_frame(&self) {
        let mut state = self.frame.lock();
        if state.active {
            info!(
                rank = self.comm.rank(),
                incomplete = self.expected_tiles().saturating_sub(state.completed),
                "frame aborted"
            );
            self.close_frame(&mut state);
            state.aborted = true;
        }
    }

    pub fn is_frame_done(&self) -> bool {
        self.frame.lock().done
    }

    /// Tiles this rank still waits for in the current frame
    pub fn incomplete_tiles(&self) -> Vec<usize> {
        let state = self.frame.lock();
        (0..self.total_tiles())
            .filter(|&t| self.is_master() || self.is_mine(t))
            .filter(|&t| !state.completed_tiles[t])
            .collect()
    }

    /// Reset channels of the owned tiles. Every rank clears its own tiles.
    pub fn clear(&self, channels: FbChannels) {
        for entry in &self.tiles {
            if let TileEntry::Owned(td) = entry {
                td.clear(channels);
            }
        }
        if self.params.has_accum && channels.accum {
            self.frame.lock().accum_ids.fill(-1);
            self.error.lock().clear();
        }
    }

    /// Finish the frame, refining error regions. Returns the largest tile error.
    pub fn end_frame(&self, error_threshold: f32) -> f32 {
        let max = self.error.lock().refine(error_threshold);
        debug!(rank = self.comm.rank(), max_error = max, "frame ended");
        max
    }

    /// Assembled image, only present on the master with a color buffer
    pub fn map_color_buffer(&self) -> Result<MappedMutexGuard<'_, FrameImage>, DfbError> {
        MutexGuard::try_map(self.image.lock(), |img| img.as_mut())
            .map_err(|_| DfbError::NoMasterImage)
    }
}
