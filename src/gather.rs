//! Keyed regroup engine (§4.G): a P-way all-to-all realized as P
//! gathers, one per root, assembling groups in ascending-key order.
//!
//! Grounded in the list-of-lists `gather_partitions` variant; the
//! other variant in the source corpus (a flat re-assembly keyed off an
//! uninitialized loop counter) produced a corrupted permutation and is
//! not reproduced here (§9).

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Comm;
use crate::partition::block_of;

/// Regroup `dp` (this rank's local map from target key in `[0, n)` to
/// the values bound for it) across all ranks. Returns the groups this
/// rank owns, in ascending-key order, each key appearing at most once.
pub fn gather_partitions<V, C>(
    comm: &C,
    dp: Vec<(usize, Vec<V>)>,
    n: usize,
) -> Vec<(usize, Vec<V>)>
where
    V: Serialize + DeserializeOwned,
    C: Comm,
{
    let t0 = std::time::Instant::now();
    let procs = comm.procs();
    let rank = comm.rank();
    tracing::info!(rank, procs, n, "gather_partitions entering");

    let mut outgoing: Vec<Vec<(usize, Vec<V>)>> = (0..procs).map(|_| Vec::new()).collect();
    for (key, list) in dp {
        assert!(key < n, "gather_partitions: key {key} out of range for {n} groups");
        outgoing[block_of(key, n, procs)].push((key, list));
    }

    let mut incoming: Vec<(usize, Vec<V>)> = std::mem::take(&mut outgoing[rank]);
    for root in 0..procs {
        if root == rank {
            let received = comm
                .gather(&Vec::new(), root)
                .expect("gather_partitions: root must receive Some from gather");
            for mut v in received {
                incoming.append(&mut v);
            }
        } else {
            comm.gather(&outgoing[root], root);
        }
    }

    incoming.sort_by_key(|(key, _)| *key);
    let mut groups: Vec<(usize, Vec<V>)> = Vec::new();
    for (key, list) in incoming {
        match groups.last_mut() {
            Some((k, vs)) if *k == key => vs.extend(list),
            _ => groups.push((key, list)),
        }
    }
    tracing::info!(rank, "gather_partitions completed in {:?}", t0.elapsed());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalComm;

    #[test]
    fn single_rank_regroups_and_sorts_by_key() {
        let comm = LocalComm::default();
        let dp = vec![(2usize, vec!["b"]), (0usize, vec!["a1", "a2"]), (1usize, vec!["c"])];
        let groups = gather_partitions(&comm, dp, 3);
        assert_eq!(
            groups,
            vec![(0, vec!["a1", "a2"]), (1, vec!["c"]), (2, vec!["b"])]
        );
    }

    #[test]
    fn merges_duplicate_keys_preserving_arrival_order() {
        let comm = LocalComm::default();
        let dp = vec![(0usize, vec![1]), (0usize, vec![2, 3])];
        let groups = gather_partitions(&comm, dp, 1);
        assert_eq!(groups, vec![(0, vec![1, 2, 3])]);
    }
}
