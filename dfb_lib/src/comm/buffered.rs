use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::{
    config::{CommConfig, BATCH_HEADER_SIZE},
    serial::{Placeholder, SerialBuffer},
    work::{self, Work, WorkError},
};

use super::{chunk_plan, Address, Collective, CommError, Rank};

struct Header {
    size: Placeholder<u64>,
    count: Placeholder<i32>,
}

/// Outgoing batch, still being filled or about to be broadcast
struct Batch {
    buffer: SerialBuffer,
    header: Option<Header>,
    count: i32,
    dest: Option<Address>,
}

impl Batch {
    fn new(capacity: usize) -> Batch {
        Batch {
            buffer: SerialBuffer::new(capacity),
            header: None,
            count: 0,
            dest: None,
        }
    }

    /// Empty batch, closes a round on the receiving side
    fn terminator(capacity: usize) -> Batch {
        let mut batch = Batch::new(capacity);
        batch.open();
        batch
    }

    fn open(&mut self) {
        self.buffer.clear();
        let size = self.buffer.placeholder();
        let count = self.buffer.placeholder();
        self.header = Some(Header { size, count });
    }

    fn is_pending(&self) -> bool {
        self.count > 0
    }
}

/// Batch being filled, plus the broadcast ticket of the next batch to close
struct Outbox {
    batch: Batch,
    next_ticket: u64,
}

impl Outbox {
    fn close(&mut self, batch: Batch) -> (u64, Batch) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        (ticket, batch)
    }
}

/// Batches work units into a single buffer and moves it with chunked broadcasts.
///
/// Wire layout of a batch:
/// `[u64 totalSize][i32 count]` followed by `count` times `[u64 tag][payload]`.
/// The first `first_chunk` bytes are always broadcast, padding included, the
/// rest follows in broadcasts of at most `max_bcast` bytes.
///
/// One instance serves one session and is shared between threads with an `Arc`.
/// Sends from many threads are serialized by the send lock. A batch draws a
/// ticket when it is closed under that lock, and batches are broadcast in
/// ticket order with no lock held.
pub struct BufferedComm<C: Collective> {
    comm: C,
    config: CommConfig,
    send: Mutex<Outbox>,
    /// Ticket of the batch allowed to broadcast next
    serving: Mutex<u64>,
    turn: Condvar,
    recv: Mutex<SerialBuffer>,
}

impl<C: Collective> BufferedComm<C> {
    pub fn new(comm: C) -> Self {
        Self::with_config(comm, CommConfig::default())
    }

    pub fn with_config(comm: C, config: CommConfig) -> Self {
        Self {
            comm,
            config,
            send: Mutex::new(Outbox {
                batch: Batch::new(config.initial_capacity),
                next_ticket: 0,
            }),
            serving: Mutex::new(0),
            turn: Condvar::new(),
            recv: Mutex::new(SerialBuffer::new(
                config.initial_capacity.max(config.first_chunk),
            )),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Ranks doing the rendering. A single rank session is its own only worker.
    pub fn num_workers(&self) -> usize {
        match self.comm.size() {
            0 | 1 => 1,
            n => n - 1,
        }
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    /// Append `work` to the batch for `addr`.
    ///
    /// Only one destination can be pending at a time. A batch that reached the
    /// broadcast limit is flushed right away.
    pub fn send(&self, addr: Address, work: &Work) -> Result<(), CommError> {
        if let Rank::Single(_) = addr.rank {
            return Err(CommError::Unsupported("sending to a single rank"));
        }
        let full = {
            let mut outbox = self.send.lock();
            let batch = &mut outbox.batch;
            if let Some(pending) = batch.dest {
                if batch.is_pending() && pending != addr {
                    return Err(CommError::DestinationMismatch {
                        pending,
                        requested: addr,
                    });
                }
            }
            if !batch.is_pending() {
                batch.open();
            }
            work::encode(&mut batch.buffer, work);
            batch.count += 1;
            batch.dest = Some(addr);
            trace!(tag = ?work.tag(), count = batch.count, "queued work");
            batch.buffer.index() >= self.config.max_bcast
        };

        if full {
            debug!("batch reached broadcast limit, flushing");
            self.flush()?;
        }
        Ok(())
    }

    /// Broadcast the pending batch. Does nothing if nothing is queued.
    pub fn flush(&self) -> Result<(), CommError> {
        let closed = self.close_batches(false);
        self.transmit_in_turn(closed)
    }

    /// Flush and broadcast an empty batch, closing the round of this rank.
    /// Peers collect the whole round with [`recv_round`](Self::recv_round).
    pub fn end_round(&self) -> Result<(), CommError> {
        let closed = self.close_batches(true);
        self.transmit_in_turn(closed)
    }

    /// Take the pending batch, and a round terminator if asked, with consecutive tickets
    fn close_batches(&self, terminate: bool) -> Vec<(u64, Batch)> {
        let mut outbox = self.send.lock();
        let mut closed = Vec::with_capacity(2);
        if outbox.batch.is_pending() {
            let batch = std::mem::replace(
                &mut outbox.batch,
                Batch::new(self.config.initial_capacity),
            );
            closed.push(outbox.close(batch));
        }
        if terminate {
            let empty = Batch::terminator(self.config.first_chunk);
            closed.push(outbox.close(empty));
        }
        closed
    }

    /// Broadcast closed batches once their tickets come up. Every ticket is
    /// served even after a failed broadcast, later batches are then dropped.
    fn transmit_in_turn(&self, closed: Vec<(u64, Batch)>) -> Result<(), CommError> {
        let mut result = Ok(());
        for (ticket, batch) in closed {
            {
                let mut serving = self.serving.lock();
                while *serving != ticket {
                    self.turn.wait(&mut serving);
                }
            }
            if result.is_ok() {
                result = self.transmit(batch);
            }
            *self.serving.lock() += 1;
            self.turn.notify_all();
        }
        result
    }

    fn transmit(&self, mut batch: Batch) -> Result<(), CommError> {
        let root = self.comm.rank();
        let total = batch.buffer.index();
        if let Some(header) = batch.header.take() {
            batch.buffer.fill(header.size, &(total as u64));
            batch.buffer.fill(header.count, &batch.count);
        }
        debug!(root, total, count = batch.count, "broadcasting batch");

        for range in chunk_plan(total, self.config.first_chunk, self.config.max_bcast) {
            self.comm.bcast(batch.buffer.chunk_mut(range), root)?;
        }
        Ok(())
    }

    /// Receive one batch broadcast by `root` and decode its work units.
    pub fn recv(&self, root: usize) -> Result<Vec<Work>, CommError> {
        let first_chunk = self.config.first_chunk;
        let mut buf = self.recv.lock();
        buf.clear();
        self.comm.bcast(buf.chunk_mut(0..first_chunk), root)?;

        let total = buf.get::<u64>()? as usize;
        let count = buf.get::<i32>()?;
        if total > first_chunk {
            buf.set_index(first_chunk);
            buf.reserve(total - first_chunk);
            for range in chunk_plan(total, first_chunk, self.config.max_bcast)
                .into_iter()
                .skip(1)
            {
                self.comm.bcast(buf.chunk_mut(range), root)?;
            }
        }

        buf.set_index(BATCH_HEADER_SIZE);
        let count = usize::try_from(count).map_err(|_| {
            WorkError::InvalidPayload(format!("batch header announces {count} work units"))
        })?;
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(root, "received:\n{}", work::describe_buffer(&mut buf, count));
        }
        let works = work::decode_buffer(&mut buf, count)?;
        buf.clear();
        Ok(works)
    }

    /// Receive batches from `root` until its round terminator arrives.
    pub fn recv_round(&self, root: usize) -> Result<Vec<Work>, CommError> {
        let mut works = Vec::new();
        loop {
            let batch = self.recv(root)?;
            if batch.is_empty() {
                return Ok(works);
            }
            works.extend(batch);
        }
    }

    /// Plain broadcast of `buf` from `root`, outside of any batch
    pub fn bcast_bytes(&self, buf: &mut [u8], root: usize) -> Result<(), CommError> {
        self.comm.bcast(buf, root)
    }

    /// Flush pending work, then wait for all ranks.
    pub fn barrier(&self) -> Result<(), CommError> {
        self.flush()?;
        self.comm.barrier()
    }
}

impl<C: Collective> Drop for BufferedComm<C> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("dropping unsent batch: {e}");
        }
    }
}

#[cfg(test)]
mod test {

    use nalgebra::vector;

    use super::*;
    use crate::{
        color,
        comm::LocalFabric,
        tile::{Tile, TileColor, TILE_PIXELS},
        work::{MasterTileMessage, WriteTileMessage},
    };

    fn master_msg(x: usize) -> Work {
        Work::MasterWriteTile(MasterTileMessage::new(
            vector![x, 0],
            1.0,
            TileColor::None,
        ))
    }

    fn tile_msg(seed: f32) -> Work {
        let mut tile = Tile::at(vector![0, 0], vector![64, 64], 0);
        tile.fill(color::new(seed, seed, seed, 1.0), seed);
        Work::WriteTile(WriteTileMessage::new(tile))
    }

    #[test]
    fn batch_reaches_all_ranks() {
        let group = LocalFabric::new(3);
        let sent = vec![tile_msg(0.25), master_msg(64), tile_msg(0.5)];

        crossbeam::scope(|s| {
            for member in group {
                let sent = &sent;
                s.spawn(move |_| {
                    let comm = BufferedComm::new(member);
                    if comm.rank() == 0 {
                        for w in sent {
                            comm.send(Address::WORLD, w).unwrap();
                        }
                        comm.flush().unwrap();
                    } else {
                        let got = comm.recv(0).unwrap();
                        assert_eq!(&got, sent);
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn small_chunks_are_reassembled() {
        // Payload travels in hundreds of follow-up broadcasts
        let config = CommConfig::new(64, 1000, 16).unwrap();
        let group = LocalFabric::new(2);
        let sent: Vec<_> = (0..4).map(|i| tile_msg(i as f32)).collect();

        crossbeam::scope(|s| {
            for member in group {
                let sent = &sent;
                s.spawn(move |_| {
                    let comm = BufferedComm::with_config(member, config);
                    if comm.rank() == 0 {
                        for w in sent {
                            comm.send(Address::WORLD, w).unwrap();
                        }
                        comm.end_round().unwrap();
                    } else {
                        assert_eq!(&comm.recv_round(0).unwrap(), sent);
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn full_batch_flushes_on_send() {
        // A single tile message is larger than the limit
        let config = CommConfig::new(2048, 4 * TILE_PIXELS, 16).unwrap();
        let group = LocalFabric::new(2);
        let sent: Vec<_> = (0..3).map(|i| tile_msg(i as f32)).collect();

        crossbeam::scope(|s| {
            for member in group {
                let sent = &sent;
                s.spawn(move |_| {
                    let comm = BufferedComm::with_config(member, config);
                    if comm.rank() == 0 {
                        for w in sent {
                            comm.send(Address::WORLD, w).unwrap();
                        }
                        comm.end_round().unwrap();
                    } else {
                        for w in sent {
                            assert_eq!(comm.recv(0).unwrap(), vec![w.clone()]);
                        }
                        assert!(comm.recv(0).unwrap().is_empty());
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn flush_without_work_is_silent() {
        let mut group = LocalFabric::new(2);
        let peer = BufferedComm::new(group.pop().unwrap());
        let comm = BufferedComm::new(group.pop().unwrap());
        comm.flush().unwrap();

        // Nothing was broadcast, the first message the peer sees is the next batch
        comm.send(Address::WORLD, &master_msg(0)).unwrap();
        comm.flush().unwrap();
        assert_eq!(peer.recv(0).unwrap(), vec![master_msg(0)]);
    }

    #[test]
    fn second_destination_is_rejected() {
        let group = LocalFabric::new(1);
        let comm = BufferedComm::new(group.into_iter().next().unwrap());
        comm.send(Address::WORLD, &master_msg(0)).unwrap();
        assert_eq!(
            comm.send(Address::WORKERS, &master_msg(64)),
            Err(CommError::DestinationMismatch {
                pending: Address::WORLD,
                requested: Address::WORKERS
            })
        );
        assert_eq!(
            comm.send(Address::new(0, Rank::Single(1)), &master_msg(0)),
            Err(CommError::Unsupported("sending to a single rank"))
        );

        // Once flushed any destination is fine
        comm.flush().unwrap();
        comm.send(Address::WORKERS, &master_msg(64)).unwrap();
    }

    #[test]
    fn barrier_flushes_pending_batch() {
        let group = LocalFabric::new(3);
        let sent = vec![master_msg(0), tile_msg(0.5)];

        crossbeam::scope(|s| {
            for member in group {
                let sent = &sent;
                s.spawn(move |_| {
                    let comm = BufferedComm::new(member);
                    if comm.rank() == 0 {
                        for w in sent {
                            comm.send(Address::WORLD, w).unwrap();
                        }
                        comm.barrier().unwrap();
                        // Nothing left to flush, the round holds only its terminator
                        comm.end_round().unwrap();
                    } else {
                        assert_eq!(&comm.recv(0).unwrap(), sent);
                        comm.barrier().unwrap();
                        assert!(comm.recv_round(0).unwrap().is_empty());
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn negative_unit_count_is_rejected() {
        let group = LocalFabric::new(2);

        crossbeam::scope(|s| {
            for member in group {
                s.spawn(move |_| {
                    let comm = BufferedComm::new(member);
                    if comm.rank() == 0 {
                        let mut raw = SerialBuffer::new(0);
                        raw.put(&(BATCH_HEADER_SIZE as u64));
                        raw.put(&-1i32);
                        let first_chunk = comm.config().first_chunk;
                        comm.bcast_bytes(raw.chunk_mut(0..first_chunk), 0)
                            .unwrap();
                    } else {
                        assert!(matches!(
                            comm.recv(0),
                            Err(CommError::Work(WorkError::InvalidPayload(_)))
                        ));
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn concurrent_flushes_keep_batches_whole() {
        // Every tile spans many broadcasts, interleaved chunks would not decode
        let config = CommConfig::new(64, 1000, 16).unwrap();
        let group = LocalFabric::new(2);

        crossbeam::scope(|s| {
            for member in group {
                s.spawn(move |_| {
                    let comm = BufferedComm::with_config(member, config);
                    if comm.rank() == 0 {
                        crossbeam::scope(|senders| {
                            for thread in 0..4 {
                                let comm = &comm;
                                senders.spawn(move |_| {
                                    for i in 0..3 {
                                        let seed = (thread * 3 + i) as f32;
                                        comm.send(Address::WORLD, &tile_msg(seed)).unwrap();
                                        comm.flush().unwrap();
                                    }
                                });
                            }
                        })
                        .unwrap();
                        comm.end_round().unwrap();
                    } else {
                        let mut seeds: Vec<f32> = comm
                            .recv_round(0)
                            .unwrap()
                            .iter()
                            .map(|w| match w {
                                Work::WriteTile(msg) => msg.tile.z[0],
                                other => panic!("unexpected {other:?}"),
                            })
                            .collect();
                        seeds.sort_by(|a, b| a.partial_cmp(b).unwrap());
                        let expected: Vec<f32> = (0..12).map(|i| i as f32).collect();
                        assert_eq!(seeds, expected);
                    }
                });
            }
        })
        .unwrap();
    }

    #[test]
    fn worker_count() {
        let group = LocalFabric::new(5);
        let comm = BufferedComm::new(group.into_iter().next().unwrap());
        assert_eq!(comm.num_workers(), 4);

        let single = LocalFabric::new(1);
        let comm = BufferedComm::new(single.into_iter().next().unwrap());
        assert_eq!(comm.num_workers(), 1);
    }
}
