//! One render session, every rank running on its own thread

use std::sync::Arc;

use dfb_lib::{
    comm::{BufferedComm, LocalFabric, LocalGroup},
    fb::DfbError,
    DistributedFrameBuffer,
};
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::Vector2;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::{config::Config, scene::Scene};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("rank {rank}: {source}")]
    Rank { rank: usize, source: DfbError },
    #[error("a rank panicked")]
    Panicked,
}

/// Image assembled by the master
pub struct Output {
    pub size: Vector2<usize>,
    /// RGB triplets, `None` without a color buffer
    pub rgb: Option<Vec<u8>>,
    /// Largest tile error of the last frame
    pub max_error: f32,
}

pub fn run(cfg: &Config) -> Result<Output, SessionError> {
    let seed = cfg.seed.unwrap_or_else(|| fastrand::u64(..));
    let members = LocalFabric::new(cfg.ranks);

    let results = crossbeam::scope(|s| {
        let handles: Vec<_> = members
            .into_iter()
            .enumerate()
            .map(|(rank, member)| {
                s.spawn(move |_| {
                    run_rank(cfg, member, seed).map_err(|source| SessionError::Rank { rank, source })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(SessionError::Panicked)))
            .collect::<Vec<_>>()
    })
    .map_err(|_| SessionError::Panicked)?;

    let mut master = None;
    for res in results {
        if let Some(out) = res? {
            master = Some(out);
        }
    }
    master.ok_or(SessionError::Panicked)
}

fn run_rank(cfg: &Config, member: LocalGroup, seed: u64) -> Result<Option<Output>, DfbError> {
    let comm = Arc::new(BufferedComm::with_config(member, cfg.comm));
    let rank = comm.rank();
    let num_workers = comm.num_workers();
    let dfb = DistributedFrameBuffer::new(comm, cfg.frame_buffer.clone(), None)?;
    let scene = Scene::new(dfb.size(), num_workers, dfb.frame_mode(), seed);
    let is_worker = rank > 0 || cfg.ranks == 1;
    let worker = rank.saturating_sub(1);

    let progress = if dfb.is_master() {
        let pb = ProgressBar::new(cfg.frames as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} frames {msg}")
                .progress_chars("▉▊▋▌▍▎▏ "),
        );
        Some(pb)
    } else {
        None
    };

    let mut max_error = f32::INFINITY;
    for frame in 0..cfg.frames {
        dfb.start_new_frame(cfg.threshold)?;

        if is_worker {
            let mut tiles = scene.assigned(&dfb.active_tiles(), worker, frame);
            fastrand::Rng::with_seed(seed ^ (frame as u64) ^ ((rank as u64) << 32))
                .shuffle(&mut tiles);
            debug!(rank, frame, tiles = tiles.len(), "rendering");
            tiles.par_iter().try_for_each(|&t| {
                scene
                    .render(&dfb, worker, t)
                    .iter()
                    .try_for_each(|tile| dfb.set_tile(tile))
            })?;
        }

        dfb.exchange_tiles()?;
        dfb.wait_until_finished_for(cfg.timeout)?;
        max_error = dfb.end_frame(cfg.threshold);

        if let Some(pb) = &progress {
            pb.inc(1);
            if max_error.is_finite() {
                pb.set_message(format!("max error {max_error:.4}"));
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish();
    }

    if !dfb.is_master() {
        return Ok(None);
    }
    let rgb = match dfb.map_color_buffer() {
        Ok(image) => Some(image.to_rgb8()),
        Err(DfbError::NoMasterImage) => None,
        Err(e) => return Err(e),
    };
    info!(frames = cfg.frames, max_error, "session finished");
    Ok(Some(Output {
        size: dfb.size(),
        rgb,
        max_error,
    }))
}
