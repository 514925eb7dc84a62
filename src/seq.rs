//! The distributed-sequence facade (§4.J): a logical ordered sequence
//! split across ranks, with the operation algebra (`map`, `filter`,
//! `flatMap`, `reduce`, `scan`, `collect`, `nodeMap`, `head`, `group`,
//! `repartition`) wired to the engines in the sibling modules.
//!
//! Every method call here is a collective: all ranks must invoke the
//! same operation, in the same order, with arguments that agree on
//! shape (§5).

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bulk::BulkBuffer;
use crate::context::{Comm, Context};
use crate::gather;
use crate::partition;
use crate::reducer::TreeReducer;
use crate::repartition;
use crate::scan;

/// A distributed sequence of `T`, partitioned across ranks. Immutable:
/// every operation returns a new `DistSeq` rather than mutating this
/// one, except the user's own reducer accumulator.
pub struct DistSeq<'c, T, C: Comm> {
    ctx: &'c Context<C>,
    items: Vec<T>,
}

impl<C: Comm> Context<C> {
    /// Build a `DistSeq` holding `0, 1, ..., n-1`, split across ranks
    /// in contiguous blocks, or round-robin if `round_robin` is set
    /// (which intentionally breaks global ordering).
    pub fn iterates(&self, n: usize, round_robin: bool) -> DistSeq<'_, usize, C> {
        let items = if round_robin {
            partition::round_robin_iterate(n, self.rank(), self.procs())
        } else {
            partition::blocked_iterate(n, self.rank(), self.procs())
        };
        DistSeq { ctx: self, items }
    }

    /// Wrap an already-partitioned local slice into a `DistSeq`. The
    /// caller is responsible for the partitioning being consistent
    /// with whatever downstream operations assume about ordering.
    pub fn from_local<T>(&self, items: Vec<T>) -> DistSeq<'_, T, C> {
        DistSeq { ctx: self, items }
    }
}

impl<'c, T, C: Comm> DistSeq<'c, T, C> {
    pub fn local_len(&self) -> usize {
        self.items.len()
    }

    pub fn into_local(self) -> Vec<T> {
        self.items
    }

    /// Total length across every rank.
    pub fn len(&self) -> usize {
        self.ctx.comm().all_reduce_sum_i64(self.items.len() as i64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn map<R>(self, f: impl Fn(&T) -> R) -> DistSeq<'c, R, C> {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "map entering");
        let items = self.items.iter().map(f).collect();
        tracing::info!(rank, "map completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }

    pub fn filter(self, p: impl Fn(&T) -> bool) -> DistSeq<'c, T, C> {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "filter entering");
        let items = self.items.into_iter().filter(p).collect();
        tracing::info!(rank, "filter completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }

    pub fn flat_map<R>(self, f: impl Fn(&T) -> Vec<R>) -> DistSeq<'c, R, C> {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "flat_map entering");
        let items = self.items.iter().flat_map(f).collect();
        tracing::info!(rank, "flat_map completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }

    /// Reduce over the object (`bincode`) transport path.
    pub fn reduce<F>(self, zero: T, combine: F, distribute: bool) -> T
    where
        F: FnMut(&mut T, T),
        T: Serialize + DeserializeOwned + Clone,
    {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "reduce entering");
        let mut r = TreeReducer::new(zero, combine);
        r.local_fold(self.items);
        let out = r.tree_reduce(self.ctx.comm(), distribute);
        tracing::info!(rank, "reduce completed in {:?}", start.elapsed());
        out
    }

    /// Reduce over the chunked raw-byte transport path, for
    /// accumulators too large (or too numeric) to serialize whole.
    pub fn reduce_bulk<F>(self, zero: T, combine: F, distribute: bool) -> T
    where
        F: FnMut(&mut T, T),
        T: BulkBuffer,
    {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "reduce_bulk entering");
        let mut r = TreeReducer::bulk(zero, combine);
        r.local_fold(self.items);
        let out = r.tree_reduce_bulk(self.ctx.comm(), distribute);
        tracing::info!(rank, "reduce_bulk completed in {:?}", start.elapsed());
        out
    }

    /// Inclusive prefix scan under an associative `combine`.
    pub fn scan(self, combine: impl Fn(&T, &T) -> T) -> DistSeq<'c, T, C>
    where
        T: Clone + Serialize + DeserializeOwned,
    {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "scan entering");
        let items = scan::scan(self.ctx.comm(), &self.items, combine);
        tracing::info!(rank, "scan completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }

    /// Collect the whole sequence, in global order, to `root` (or to
    /// every rank if `root` is `None`).
    pub fn collect(self, root: Option<usize>) -> Option<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "collect entering");
        let out = match root {
            Some(r) => self
                .ctx
                .comm()
                .gather(&self.items, r)
                .map(|groups| groups.into_iter().flatten().collect()),
            None => {
                let groups = self.ctx.comm().all_gather(&self.items);
                Some(groups.into_iter().flatten().collect())
            }
        };
        tracing::info!(rank, "collect completed in {:?}", start.elapsed());
        out
    }

    /// Replace the local buffer with `f(rank, local buffer)`, called
    /// exactly once.
    pub fn node_map(self, f: impl FnOnce(usize, Vec<T>) -> Vec<T>) -> DistSeq<'c, T, C> {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, "node_map entering");
        let items = f(rank, self.items);
        tracing::info!(rank, "node_map completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }

    /// The first `n` elements, in global order, delivered to every
    /// rank.
    pub fn head(self, n: usize) -> Vec<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let procs = self.ctx.procs();
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, n, "head entering");
        let mut ans: Vec<T> = Vec::new();
        let mut root = 0usize;
        while ans.len() < n && root < procs {
            let data = if root == rank {
                let take = (n - ans.len()).min(self.items.len());
                Some(self.items[..take].to_vec())
            } else {
                None
            };
            ans.extend(self.ctx.comm().bcast(data, root));
            root += 1;
        }
        tracing::info!(rank, "head completed in {:?}", start.elapsed());
        ans
    }

    /// Regroup elements by classifier-assigned keys in `[0, n)`; each
    /// key's values are concatenated into one output element.
    pub fn group<V, R>(
        self,
        mut classify: impl FnMut(T, &mut Vec<(usize, V)>),
        concat: impl Fn(Vec<V>) -> R,
        n: usize,
    ) -> DistSeq<'c, R, C>
    where
        V: Serialize + DeserializeOwned,
    {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, n, "group entering");
        let mut bag: Vec<(usize, V)> = Vec::new();
        for item in self.items {
            classify(item, &mut bag);
        }
        let mut local: BTreeMap<usize, Vec<V>> = BTreeMap::new();
        for (key, value) in bag {
            local.entry(key).or_default().push(value);
        }
        let dp: Vec<(usize, Vec<V>)> = local.into_iter().collect();
        let groups = gather::gather_partitions(self.ctx.comm(), dp, n);
        let items = groups.into_iter().map(|(_, vs)| concat(vs)).collect();
        tracing::info!(rank, "group completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }

    /// Reshape into exactly `n` elements, by total size.
    pub fn repartition(
        self,
        llen: impl Fn(&T) -> usize,
        split: impl FnMut(T, &[(usize, usize)]) -> Vec<T>,
        concat: impl Fn(Vec<T>) -> T,
        n: usize,
    ) -> DistSeq<'c, T, C>
    where
        T: Serialize + DeserializeOwned,
    {
        let rank = self.ctx.rank();
        let start = std::time::Instant::now();
        tracing::info!(rank, n, "repartition entering");
        let tag_base = self.ctx.next_tag_base();
        let items = repartition::repartition(self.ctx.comm(), self.items, llen, split, concat, n, tag_base);
        tracing::info!(rank, "repartition completed in {:?}", start.elapsed());
        DistSeq { ctx: self.ctx, items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalComm;

    fn ctx() -> Context<LocalComm> {
        Context::new(LocalComm::default())
    }

    #[test]
    fn map_filter_flat_map_chain() {
        let c = ctx();
        let out = c
            .iterates(10, false)
            .map(|x: &usize| x * 2)
            .filter(|x: &usize| x % 3 == 0)
            .flat_map(|x: &usize| vec![*x, *x])
            .into_local();
        assert_eq!(out, vec![0, 0, 6, 6, 12, 12, 18, 18]);
    }

    #[test]
    fn len_matches_local_len_at_single_rank() {
        let c = ctx();
        let s = c.iterates(97, false);
        assert_eq!(s.len(), 97);
    }

    #[test]
    fn scan_with_plus_is_triangular() {
        let c = ctx();
        let out = c.iterates(12, false).scan(|a, b| a + b).into_local();
        let expected: Vec<usize> = (0..12).map(|i| i * (i + 1) / 2).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn reduce_append_rebuilds_range() {
        let c = ctx();
        let out = c
            .iterates(101, false)
            .map(|x: &usize| vec![*x])
            .reduce(Vec::new(), |acc: &mut Vec<usize>, e: Vec<usize>| acc.extend(e), true);
        assert_eq!(out, (0..101).collect::<Vec<_>>());
    }

    #[test]
    fn collect_to_root_returns_whole_sequence() {
        let c = ctx();
        let out = c.iterates(5, false).collect(Some(0));
        assert_eq!(out, Some(vec![0, 1, 2, 3, 4]));
    }

    #[test]
    fn node_map_replaces_buffer_once() {
        let c = ctx();
        let out = c.iterates(3, false).node_map(|rank, e| {
            let mut v = e;
            v.push(rank);
            v
        });
        assert_eq!(out.into_local(), vec![0, 1, 2, 0]);
    }

    #[test]
    fn head_returns_first_n() {
        let c = ctx();
        let out = c.iterates(20, false).head(4);
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn group_buckets_by_key_mod_one_into_single_group() {
        let c = ctx();
        let out = c
            .iterates(10, false)
            .group(
                |e: usize, bag: &mut Vec<(usize, usize)>| bag.push((0, e)),
                |vs: Vec<usize>| vs,
                1,
            )
            .into_local();
        assert_eq!(out, vec![(0..10).collect::<Vec<_>>()]);
    }

    #[test]
    fn repartition_to_exact_count() {
        let c = ctx();
        let out = c
            .iterates(20, false)
            .map(|x: &usize| vec![*x; 4])
            .repartition(
                |v: &Vec<usize>| v.len(),
                |v, ranges: &[(usize, usize)]| ranges.iter().map(|&(lo, hi)| v[lo..hi].to_vec()).collect(),
                |blocks: Vec<Vec<usize>>| blocks.into_iter().flatten().collect(),
                6,
            )
            .into_local();
        assert_eq!(out.len(), 6);
        let total: usize = out.iter().map(Vec::len).sum();
        assert_eq!(total, 80);
    }
}
