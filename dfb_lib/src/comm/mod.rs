//! Batched messaging over a collective broadcast.

mod buffered;
mod chunks;
mod local;

use thiserror::Error;

use crate::{serial::SerialError, work::WorkError};

pub use buffered::BufferedComm;
pub use chunks::chunk_plan;
pub use local::{LocalFabric, LocalGroup};

/// Blocking collective operations of one communicator group.
///
/// Every rank of the group has to enter the same sequence of collective calls,
/// otherwise the group deadlocks.
pub trait Collective: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// On `root` send `buf`, elsewhere receive into `buf`. Lengths must agree on all ranks.
    fn bcast(&self, buf: &mut [u8], root: usize) -> Result<(), CommError>;
    fn barrier(&self) -> Result<(), CommError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    /// Every rank of the group
    All,
    Single(usize),
}

/// Destination of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub group: u32,
    pub rank: Rank,
}

impl Address {
    /// All ranks of the session
    pub const WORLD: Address = Address {
        group: 0,
        rank: Rank::All,
    };
    /// All worker ranks
    pub const WORKERS: Address = Address {
        group: 1,
        rank: Rank::All,
    };

    pub fn new(group: u32, rank: Rank) -> Address {
        Address { group, rank }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("batch for {pending:?} is pending, cannot address {requested:?}")]
    DestinationMismatch { pending: Address, requested: Address },
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("peer disconnected")]
    Disconnected,
    #[error("broadcast of {received} bytes does not fit a {expected} byte chunk")]
    ChunkMismatch { expected: usize, received: usize },
    #[error("rank {0} is not part of the group")]
    InvalidRank(usize),
    #[error(transparent)]
    Work(#[from] WorkError),
    #[error(transparent)]
    Serial(#[from] SerialError),
}
