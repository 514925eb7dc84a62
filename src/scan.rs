//! Parallel prefix-scan engine (§4.F): local inclusive prefix, a
//! one-element boundary exchange, then a virtual scan over ranks
//! `1..procs` driven by [`crate::pscan::psched`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Comm;
use crate::pscan::psched;

/// Local inclusive prefix: `pre[i] = combine(pre[i-1], items[i])`,
/// `pre[0] = items[0]`.
pub fn scan_local<T: Clone>(items: &[T], combine: impl Fn(&T, &T) -> T) -> Vec<T> {
    let mut pre: Vec<T> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if i == 0 {
            pre.push(item.clone());
        } else {
            let v = combine(&pre[i - 1], item);
            pre.push(v);
        }
    }
    pre
}

/// Combine a rank's current carry with one arriving from a neighbor.
/// An empty carry on either side passes the other through unchanged
/// (models ranks holding no local elements).
fn merge_carry<T>(current: Option<T>, incoming: Option<T>, combine: &impl Fn(&T, &T) -> T) -> Option<T> {
    match (current, incoming) {
        (None, u) => u,
        (Some(l), None) => Some(l),
        (Some(l), Some(u)) => Some(combine(&u, &l)),
    }
}

/// Run the full distributed prefix scan over `items` (this rank's
/// local slice, already in global order).
pub fn scan<T, C, F>(comm: &C, items: &[T], combine: F) -> Vec<T>
where
    T: Clone + Serialize + DeserializeOwned,
    C: Comm,
    F: Fn(&T, &T) -> T,
{
    let start = std::time::Instant::now();
    let rank = comm.rank();
    let procs = comm.procs();
    tracing::info!(rank, procs, "scan entering");
    let mut pre = scan_local(items, &combine);

    if procs == 1 {
        tracing::info!(rank, "scan completed in {:?}", start.elapsed());
        return pre;
    }

    let mut last: Option<T> = pre.last().cloned();

    // Boundary exchange, even ranks send first (tag 10), odd ranks
    // receive first (tag 11), giving every rank but 0 a carry-in
    // candidate from its left neighbor.
    if rank % 2 == 0 {
        if rank != procs - 1 {
            comm.send(&last, rank + 1, 10);
        }
        last = if rank == 0 { None } else { comm.recv(rank - 1, 11) };
    } else {
        last = comm.recv(rank - 1, 10);
        if rank != procs - 1 {
            comm.send(&last, rank + 1, 11);
        }
    }

    // Ranks 1..procs-1 run the virtual scan from §4.D over vrank =
    // rank-1, carrying `last` along.
    if rank > 0 {
        let vrank = rank - 1;
        let sch = psched(procs - 1);
        for (i, sl) in sch.iter().enumerate() {
            let off = sl.step / 2;
            let tag = i as i32;
            if vrank >= sl.start && vrank < sl.stop && (vrank - sl.start) % sl.step == 0 {
                comm.send(&last, rank + off, tag);
            } else if vrank >= sl.start + off && (vrank - sl.start - off) % sl.step == 0 {
                let incoming: Option<T> = comm.recv(rank - off, tag);
                last = merge_carry(last, incoming, &combine);
            }
        }
    }

    if let Some(l) = last {
        for p in pre.iter_mut() {
            *p = combine(&l, p);
        }
    }

    tracing::info!(rank, "scan completed in {:?}", start.elapsed());
    pre
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalComm;

    #[test]
    fn local_prefix_sum_is_triangular() {
        let items: Vec<i64> = (0..12).collect();
        let pre = scan_local(&items, |a, b| a + b);
        let expected: Vec<i64> = (0..12).map(|i| i * (i + 1) / 2).collect();
        assert_eq!(pre, expected);
    }

    #[test]
    fn single_rank_scan_matches_local_prefix() {
        let comm = LocalComm::default();
        let items: Vec<i64> = (0..12).collect();
        let out = scan(&comm, &items, |a, b| a + b);
        let expected: Vec<i64> = (0..12).map(|i| i * (i + 1) / 2).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn merge_carry_passes_through_empty_sides() {
        let add = |a: &i32, b: &i32| a + b;
        assert_eq!(merge_carry(None, Some(5), &add), Some(5));
        assert_eq!(merge_carry(Some(5), None, &add), Some(5));
        assert_eq!(merge_carry::<i32>(None, None, &add), None);
        // incoming combines on the left: combine(u, last)
        assert_eq!(merge_carry(Some(3), Some(4), &add), Some(7));
    }
}
