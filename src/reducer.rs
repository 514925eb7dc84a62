//! Tree reducer (§4.E): local left-accumulation followed by a binary
//! tournament across ranks.
//!
//! Two constructors select the transport: [`TreeReducer::new`] goes
//! through the `Comm` object path (`bincode` under the hood);
//! [`TreeReducer::bulk`] goes through the raw-byte path, chunked at
//! [`crate::context::BULK_CHUNK_BYTES`], for accumulators that
//! implement [`BulkBuffer`]. Which one to call is a decision the caller
//! makes once, not a runtime type check.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bulk::BulkBuffer;
use crate::context::{Comm, BULK_CHUNK_BYTES};

/// Drives a user combiner over local elements, then over ranks.
///
/// `combine(acc, elem)` mutates `acc` in place; it must be associative
/// and need not be commutative.
pub struct TreeReducer<T, F> {
    accum: T,
    combine: F,
}

impl<T, F> TreeReducer<T, F>
where
    F: FnMut(&mut T, T),
{
    pub fn new(zero: T, combine: F) -> Self {
        Self { accum: zero, combine }
    }

    /// Fold `items` into the accumulator, left to right.
    pub fn local_fold(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            (self.combine)(&mut self.accum, item);
        }
    }

    /// Run the binary-tournament cross-rank phase over the object path.
    /// Returns the full reduction on rank 0; if `distribute`, every
    /// rank receives it, otherwise every other rank gets back its own
    /// (unfinished) partial.
    pub fn tree_reduce<C: Comm>(mut self, comm: &C, distribute: bool) -> T
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let start = std::time::Instant::now();
        let procs = comm.procs();
        let rank = comm.rank();
        tracing::info!(rank, procs, "tree_reduce entering");
        let mut step = 1usize;
        let mut lev: i32 = 0;

        while step < procs {
            lev += 1;
            if rank % step != 0 {
                break;
            }
            if rank % (2 * step) == 0 {
                if rank + step < procs {
                    let received: T = comm.recv(rank + step, lev);
                    (self.combine)(&mut self.accum, received);
                }
            } else {
                comm.send(&self.accum, rank - step, lev);
                break;
            }
            step *= 2;
        }

        if distribute {
            let mine = (rank == 0).then(|| self.accum.clone());
            self.accum = comm.bcast(mine, 0);
        }
        tracing::info!(rank, "tree_reduce completed in {:?}", start.elapsed());
        self.accum
    }
}

impl<T, F> TreeReducer<T, F>
where
    T: BulkBuffer,
    F: FnMut(&mut T, T),
{
    pub fn bulk(zero: T, combine: F) -> Self {
        Self { accum: zero, combine }
    }

    /// Run the binary-tournament cross-rank phase over the chunked
    /// raw-byte path (§4.E).
    pub fn tree_reduce_bulk<C: Comm>(mut self, comm: &C, distribute: bool) -> T {
        let start = std::time::Instant::now();
        let procs = comm.procs();
        let rank = comm.rank();
        tracing::info!(rank, procs, "tree_reduce_bulk entering");
        let mut step = 1usize;
        let mut lev: i32 = 0;

        while step < procs {
            lev += 1;
            if rank % step != 0 {
                break;
            }
            if rank % (2 * step) == 0 {
                if rank + step < procs {
                    let nbytes = self.accum.nbytes();
                    let bytes = recv_chunked(comm, nbytes, rank + step, lev);
                    (self.combine)(&mut self.accum, T::from_bytes(bytes));
                }
            } else {
                send_chunked(comm, self.accum.as_bytes(), rank - step, lev);
                break;
            }
            step *= 2;
        }

        if distribute {
            let nbytes = self.accum.nbytes();
            if rank == 0 {
                for r in 1..procs {
                    send_chunked(comm, self.accum.as_bytes(), r, 0);
                }
            } else {
                let bytes = recv_chunked(comm, nbytes, 0, 0);
                self.accum = T::from_bytes(bytes);
            }
        }
        tracing::info!(rank, "tree_reduce_bulk completed in {:?}", start.elapsed());
        self.accum
    }
}

/// Send `bytes` in `<= BULK_CHUNK_BYTES`-sized pieces, tagged
/// `100*lev + k` for chunk `k` (§4.E).
fn send_chunked<C: Comm>(comm: &C, bytes: &[u8], dest: usize, lev: i32) {
    for (k, chunk) in bytes.chunks(BULK_CHUNK_BYTES).enumerate() {
        comm.send_bytes(chunk, dest, 100 * lev + k as i32);
    }
}

/// Receive `nbytes` total in `<= BULK_CHUNK_BYTES`-sized pieces, tagged
/// to match [`send_chunked`].
fn recv_chunked<C: Comm>(comm: &C, nbytes: usize, source: usize, lev: i32) -> Vec<u8> {
    let mut dst = vec![0u8; nbytes];
    let mut k = 0i32;
    for chunk in dst.chunks_mut(BULK_CHUNK_BYTES) {
        comm.recv_bytes(chunk, source, 100 * lev + k);
        k += 1;
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_fold_sums_in_order() {
        let mut r = TreeReducer::new(0i64, |acc: &mut i64, e: i64| *acc += e);
        r.local_fold([1, 2, 3, 4]);
        assert_eq!(r.accum, 10);
    }

    #[test]
    fn local_fold_preserves_order_for_non_commutative_combine() {
        let mut r = TreeReducer::new(Vec::<i32>::new(), |acc: &mut Vec<i32>, e: i32| acc.push(e));
        r.local_fold([3, 1, 2]);
        assert_eq!(r.accum, vec![3, 1, 2]);
    }
}
