use std::{cmp::min, ops::Range};

/// Byte ranges of the broadcasts that move a `total` byte batch.
///
/// The first range always spans `first_chunk` bytes, even past `total` (the
/// tail is padding). The rest follows in pieces of at most `max_bcast` bytes.
pub fn chunk_plan(total: usize, first_chunk: usize, max_bcast: usize) -> Vec<Range<usize>> {
    debug_assert!(max_bcast > 0);
    let mut plan = vec![0..first_chunk];
    let mut start = first_chunk;
    while start < total {
        let end = start + min(total - start, max_bcast);
        plan.push(start..end);
        start = end;
    }
    plan
}
