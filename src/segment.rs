//! Segment solver: reconciling two partitionings of the same global
//! index space (§4.B).

use crate::partition::even_spread;

/// One contiguous transfer: `[s0,s1)` of source block `src_block` goes
/// to `[d0,d1)` of destination block `dst_block`. `s1-s0 == d1-d0 > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cxn {
    pub src_block: usize,
    pub dst_block: usize,
    pub s0: usize,
    pub s1: usize,
    pub d0: usize,
    pub d1: usize,
}

impl Cxn {
    pub fn len(&self) -> usize {
        self.s1 - self.s0
    }
}

/// Prefix sums of `blocks`, with a leading zero: `len = blocks.len()+1`.
pub fn cumsum(blocks: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(blocks.len() + 1);
    out.push(0);
    let mut acc = 0;
    for &b in blocks {
        acc += b;
        out.push(acc);
    }
    out
}

/// Two-pointer sweep producing the maximal sub-intervals of
/// `[0, src[last])` that sit inside one source block and one
/// destination block.
///
/// `src` and `dst` are ascending cumulative offset vectors (as
/// produced by [`cumsum`]) with `src[0] == dst[0] == 0` and
/// `src[last] == dst[last]`.
pub fn segments(src: &[usize], dst: &[usize]) -> Vec<Cxn> {
    tracing::debug!(
        src_blocks = src.len().saturating_sub(1),
        dst_blocks = dst.len().saturating_sub(1),
        "segments: solving block-to-block transfers"
    );
    assert_eq!(src[0], 0);
    assert_eq!(dst[0], 0);
    assert_eq!(
        src[src.len() - 1],
        dst[dst.len() - 1],
        "segments: source and destination totals don't match"
    );

    let mut ans = Vec::new();
    let mut idx = 0usize;
    let mut i = 1usize;
    let mut j = 1usize;
    while i < src.len() && j < dst.len() {
        let end = src[i].min(dst[j]);
        if end > idx {
            ans.push(Cxn {
                src_block: i - 1,
                dst_block: j - 1,
                s0: idx - src[i - 1],
                s1: end - src[i - 1],
                d0: idx - dst[j - 1],
                d1: end - dst[j - 1],
            });
        }
        if end == src[i] {
            i += 1;
        }
        if end == dst[j] {
            j += 1;
        }
        idx = end;
    }
    ans
}

/// Solve the segments mapping an arbitrary block sizing `blocks` onto
/// `n` evenly spread target blocks.
pub fn segments_e(blocks: &[usize], n: usize) -> Vec<Cxn> {
    let total: usize = blocks.iter().sum();
    let tgt = even_spread(total, n);
    segments(&cumsum(blocks), &cumsum(&tgt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn check_segments(blocks: &[usize], oblocks: &[usize]) {
        let sched = segments(&cumsum(blocks), &cumsum(oblocks));
        let mut inp = vec![0usize; blocks.len()];
        let mut out = vec![0usize; oblocks.len()];
        for c in &sched {
            assert!(c.len() > 0);
            assert_eq!(c.s1 - c.s0, c.d1 - c.d0);
            assert_eq!(inp[c.src_block], c.s0);
            assert_eq!(out[c.dst_block], c.d0);
            inp[c.src_block] = c.s1;
            out[c.dst_block] = c.d1;
        }
        assert_eq!(inp, blocks);
        assert_eq!(out, oblocks);
    }

    #[test]
    fn known_case() {
        check_segments(&[76, 12, 441, 864, 12, 42], &[65, 124, 247, 800, 211]);
    }

    #[test]
    fn even_spread_targets() {
        let blocks = vec![100, 30, 10, 0, 33, 4, 201];
        for n in [1, 5, 10, 201] {
            let total: usize = blocks.iter().sum();
            let oblk = even_spread(total, n);
            check_segments(&blocks, &oblk);
        }
    }

    #[test]
    fn empty_blocks() {
        check_segments(&[], &[]);
    }

    proptest! {
        #[test]
        fn partitions_exactly(blocks in prop::collection::vec(0usize..50, 0..10), n in 1usize..12) {
            let total: usize = blocks.iter().sum();
            let oblk = even_spread(total, n);
            let sched = segments(&cumsum(&blocks), &cumsum(&oblk));
            let mut inp = vec![0usize; blocks.len()];
            let mut out = vec![0usize; oblk.len()];
            for c in &sched {
                prop_assert!(c.len() > 0);
                prop_assert_eq!(inp[c.src_block], c.s0);
                prop_assert_eq!(out[c.dst_block], c.d0);
                inp[c.src_block] = c.s1;
                out[c.dst_block] = c.d1;
            }
            prop_assert_eq!(inp, blocks);
            prop_assert_eq!(out, oblk);
        }
    }
}
