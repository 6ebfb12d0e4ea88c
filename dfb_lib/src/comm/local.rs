use std::sync::{Arc, Barrier};

use crossbeam::channel::{Receiver, Sender};

use super::{Collective, CommError};

type Channel = (Sender<Vec<u8>>, Receiver<Vec<u8>>);

/// In-process stand-in for a communicator group.
///
/// Builds one endpoint per rank. Broadcasts travel over one channel per
/// `(root, rank)` pair so chunks from one root stay in order and never mix
/// with chunks of another root.
pub struct LocalFabric;

impl LocalFabric {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: usize) -> Vec<LocalGroup> {
        // links[root][rank]
        let links: Vec<Vec<Channel>> = (0..size)
            .map(|_| {
                std::iter::repeat_with(crossbeam::channel::unbounded)
                    .take(size)
                    .collect()
            })
            .collect();
        let barrier = Arc::new(Barrier::new(size));

        (0..size)
            .map(|rank| {
                let outgoing = links[rank].iter().map(|ch| ch.0.clone()).collect();
                let incoming = links.iter().map(|row| row[rank].1.clone()).collect();
                LocalGroup {
                    rank,
                    size,
                    outgoing,
                    incoming,
                    barrier: barrier.clone(),
                }
            })
            .collect()
    }
}

/// One rank's view of a [`LocalFabric`]
pub struct LocalGroup {
    rank: usize,
    size: usize,
    // Indexed by destination rank
    outgoing: Vec<Sender<Vec<u8>>>,
    // Indexed by root rank
    incoming: Vec<Receiver<Vec<u8>>>,
    barrier: Arc<Barrier>,
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn bcast(&self, buf: &mut [u8], root: usize) -> Result<(), CommError> {
        if root >= self.size {
            return Err(CommError::InvalidRank(root));
        }
        if root == self.rank {
            for (rank, sender) in self.outgoing.iter().enumerate() {
                if rank == self.rank {
                    continue;
                }
                sender
                    .send(buf.to_vec())
                    .map_err(|_| CommError::Disconnected)?;
            }
            return Ok(());
        }

        let chunk = self.incoming[root]
            .recv()
            .map_err(|_| CommError::Disconnected)?;
        if chunk.len() != buf.len() {
            return Err(CommError::ChunkMismatch {
                expected: buf.len(),
                received: chunk.len(),
            });
        }
        buf.copy_from_slice(&chunk);
        Ok(())
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.barrier.wait();
        Ok(())
    }
}
