//! Send-schedule executor (§4.I): given a schedule of tagged
//! `(src, dst, idx)` tuples identical on every rank, post the sends and
//! receives this rank participates in and wait for them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Comm;

/// One entry of a repartition/regroup schedule: `items[i]` travels from
/// `src` to `dst` under `tag`, destined for output block `idx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub tag: i32,
    pub src: usize,
    pub dst: usize,
    pub idx: usize,
}

/// Execute `sched` against `items` (this rank's outgoing payloads, in
/// the order its `src == rank` entries appear in `sched`).
///
/// Returns the received items grouped by `idx`, each group in the order
/// its entries appear in `sched` -- which is arrival order, i.e.
/// ascending source rank within a destination block (§4.G/§4.H rely on
/// this).
pub fn send_items<T, C>(comm: &C, items: Vec<T>, sched: &[ScheduleEntry]) -> Vec<Vec<T>>
where
    T: Serialize + DeserializeOwned + 'static,
    C: Comm,
{
    let t0 = std::time::Instant::now();
    let rank = comm.rank();
    tracing::debug!(rank, entries = sched.len(), "send_items: executing schedule");
    let mut items = items.into_iter();

    let mut sends = Vec::new();
    let mut groups: Vec<(usize, Vec<Box<dyn crate::context::RecvHandle<T>>>)> = Vec::new();
    let mut sent = 0usize;

    for e in sched {
        // Independent checks, not if/else if: a self-addressed entry
        // (src == dst == rank) posts both a send and a matching
        // receive, which is well defined for non-blocking MPI calls.
        if e.src == rank {
            let item = items
                .next()
                .expect("send_items: too many sends requested for the items supplied");
            sends.push(comm.isend(&item, e.dst, e.tag));
            sent += 1;
        }
        if e.dst == rank {
            let req = comm.irecv::<T>(e.src, e.tag);
            match groups.last_mut() {
                Some((idx, reqs)) if *idx == e.idx => reqs.push(req),
                _ => groups.push((e.idx, vec![req])),
            }
        }
    }
    assert!(items.next().is_none(), "send_items: some items were not sent");
    let _ = sent;

    let received: Vec<Vec<T>> = groups
        .into_iter()
        .map(|(_, reqs)| reqs.into_iter().map(|r| r.wait()).collect())
        .collect();

    for s in sends {
        s.wait();
    }

    tracing::debug!(rank, "send_items completed in {:?}", t0.elapsed());
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LocalComm;

    #[test]
    fn single_rank_schedule_is_a_no_op() {
        // At P=1 a schedule never routes anything to/from this rank --
        // every repartition/group entry must have src==dst==0, which
        // means every entry is handled by the src branch only when
        // dst also equals rank; the expect-once walk below covers that.
        let comm = LocalComm::default();
        let sched: Vec<ScheduleEntry> = vec![];
        let out: Vec<Vec<i32>> = send_items(&comm, Vec::<i32>::new(), &sched);
        assert!(out.is_empty());
    }
}
