//! Repartition engine (§4.H): reshape a distributed sequence of sized
//! elements into exactly `n` evenly spread elements, by solving the
//! segments between the current and target partitionings of the flat
//! index space and executing the resulting schedule.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Comm;
use crate::exec::{send_items, ScheduleEntry};
use crate::partition::{block_of, even_spread};
use crate::segment::{cumsum, segments};

/// Which of the blocks described by cumulative sizes `cum` (length
/// `nblocks+1`, `cum[0] == 0`) owns global index `idx`.
fn owner_of_block(cum: &[usize], idx: usize) -> usize {
    cum.partition_point(|&c| c <= idx) - 1
}

/// Reshape `items` (this rank's local elements, each reporting its own
/// size via `llen`) into exactly `n` elements, biasing any remainder
/// toward the later blocks. `tag_base` must be distinct per call on a
/// communicator that may have other collectives in flight (§9).
pub fn repartition<T, C>(
    comm: &C,
    items: Vec<T>,
    llen: impl Fn(&T) -> usize,
    mut split: impl FnMut(T, &[(usize, usize)]) -> Vec<T>,
    concat: impl Fn(Vec<T>) -> T,
    n: usize,
    tag_base: i32,
) -> Vec<T>
where
    T: Serialize + DeserializeOwned,
    C: Comm,
{
    let t0 = std::time::Instant::now();
    let procs = comm.procs();
    let rank = comm.rank();
    tracing::info!(rank, procs, n, "repartition entering");

    let local_lengths: Vec<usize> = items.iter().map(|e| llen(e)).collect();
    let gathered_lengths: Vec<Vec<usize>> = comm.all_gather(&local_lengths);
    let elem_counts_cum = cumsum(&gathered_lengths.iter().map(Vec::len).collect::<Vec<_>>());
    let source_lengths: Vec<usize> = gathered_lengths.into_iter().flatten().collect();

    let total: usize = source_lengths.iter().sum();
    let mut tgt = even_spread(total, n);
    tgt.reverse();

    let cxns = segments(&cumsum(&source_lengths), &cumsum(&tgt));

    let sched: Vec<ScheduleEntry> = cxns
        .iter()
        .enumerate()
        .map(|(i, c)| ScheduleEntry {
            tag: tag_base + i as i32,
            src: owner_of_block(&elem_counts_cum, c.src_block),
            dst: block_of(c.dst_block, n, procs),
            idx: c.dst_block,
        })
        .collect();

    let mut items_iter = items.into_iter();
    let mut outgoing: Vec<T> = Vec::new();
    let mut i = 0;
    while i < cxns.len() {
        let start = i;
        while i < cxns.len() && cxns[i].src_block == cxns[start].src_block {
            i += 1;
        }
        if owner_of_block(&elem_counts_cum, cxns[start].src_block) == rank {
            let ranges: Vec<(usize, usize)> = cxns[start..i].iter().map(|c| (c.s0, c.s1)).collect();
            let item = items_iter
                .next()
                .expect("repartition: local element count doesn't match computed lengths");
            let blocks = split(item, &ranges);
            assert_eq!(
                blocks.len(),
                ranges.len(),
                "repartition: split must return one block per range"
            );
            outgoing.extend(blocks);
        }
    }
    assert!(
        items_iter.next().is_none(),
        "repartition: not every local element was split"
    );

    let out = send_items(comm, outgoing, &sched)
        .into_iter()
        .map(concat)
        .collect();
    tracing::info!(rank, "repartition completed in {:?}", t0.elapsed());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalComm;

    #[test]
    fn single_rank_repartition_preserves_total_and_hits_target_count() {
        let comm = LocalComm::default();
        let items: Vec<Vec<i32>> = vec![(0..10).collect(), (10..13).collect(), (13..20).collect()];
        let out = repartition(
            &comm,
            items,
            |v: &Vec<i32>| v.len(),
            |v, ranges: &[(usize, usize)]| ranges.iter().map(|&(lo, hi)| v[lo..hi].to_vec()).collect(),
            |blocks: Vec<Vec<i32>>| blocks.into_iter().flatten().collect(),
            4,
            1_000,
        );
        assert_eq!(out.len(), 4);
        let total: usize = out.iter().map(Vec::len).sum();
        assert_eq!(total, 20);
        let flat: Vec<i32> = out.into_iter().flatten().collect();
        assert_eq!(flat, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_repartitions_to_empty() {
        let comm = LocalComm::default();
        let items: Vec<Vec<i32>> = Vec::new();
        let out = repartition(
            &comm,
            items,
            |v: &Vec<i32>| v.len(),
            |v, ranges: &[(usize, usize)]| ranges.iter().map(|&(lo, hi)| v[lo..hi].to_vec()).collect(),
            |blocks: Vec<Vec<i32>>| blocks.into_iter().flatten().collect(),
            0,
            2_000,
        );
        assert!(out.is_empty());
    }
}
