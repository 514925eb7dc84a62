//! Parallel prefix-scan scheduler (§4.D): a two-phase, Blelloch-style
//! up-sweep/down-sweep schedule generated from `n` alone.

/// One level of the scan schedule: senders are `range(start, stop,
/// step)`; each sends to `self + step/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSlice {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
}

impl ScanSlice {
    /// Iterate the sender positions this slice denotes.
    pub fn senders(&self) -> impl Iterator<Item = usize> + '_ {
        (self.start..self.stop).step_by(self.step)
    }
}

/// Build the up-sweep + down-sweep schedule for a prefix scan over `n`
/// items.
pub fn psched(n: usize) -> Vec<ScanSlice> {
    tracing::debug!(n, "psched: computing prefix-scan schedule");
    let mut sch = Vec::new();
    let mut skip: usize = 1;

    while 2 * skip - 1 < n {
        sch.push(ScanSlice {
            start: skip - 1,
            stop: n - skip,
            step: 2 * skip,
        });
        skip *= 2;
    }
    while 3 * skip > n {
        skip /= 2;
    }
    while skip >= 1 {
        sch.push(ScanSlice {
            start: 2 * skip - 1,
            stop: n - skip,
            step: 2 * skip,
        });
        skip /= 2;
    }
    sch
}

/// Expand a slice schedule into the concrete `(from, to)` rank pairs it
/// denotes. Mainly useful for testing and tracing output.
pub fn slices_to_sched(slices: &[ScanSlice]) -> Vec<(usize, usize)> {
    let mut sch = Vec::new();
    for s in slices {
        let off = s.step / 2;
        for i in s.senders() {
            sch.push((i, i + off));
        }
    }
    sch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_prefix_sum(n: usize) {
        let sch = slices_to_sched(&psched(n));
        let mut lst: Vec<u64> = (0..n as u64).collect();
        for (i, j) in sch {
            lst[j] += lst[i];
        }
        for (i, v) in lst.into_iter().enumerate() {
            assert_eq!(v, (i as u64) * (i as u64 + 1) / 2);
        }
    }

    #[test]
    fn prefix_sum_matches_for_many_sizes() {
        for n in [0, 1, 2, 5, 8, 10, 20, 48, 71, 145] {
            run_prefix_sum(n);
        }
    }

    #[test]
    fn single_item_has_empty_schedule() {
        assert!(psched(1).is_empty());
        assert!(psched(0).is_empty());
    }
}
