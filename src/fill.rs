//! Fan-in/fan-out balancing schedule (§4.C): given a zero-sum surplus
//! vector, produce the level-by-level send schedule that zeroes it.

/// One independent transfer within a round: `count` items move from
/// `src` to `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Send {
    pub src: usize,
    pub dst: usize,
    pub count: i64,
}

/// Compute the fan-in/fan-out schedule zeroing `delta`.
///
/// `delta[i]` is rank `i`'s surplus (positive) or deficit (negative);
/// `sum(delta)` must be zero. The result is a list of rounds; within a
/// round every `Send`'s `src` and `dst` sets are disjoint, so a round
/// can be executed with simultaneous, conflict-free transfers.
pub fn fill(delta: &[i64]) -> Vec<Vec<Send>> {
    tracing::debug!(n = delta.len(), "fill: computing balancing schedule");
    let n: i64 = delta.iter().sum();
    assert_eq!(n, 0, "fill: delta must sum to zero");

    let mut levels: Vec<Vec<i64>> = vec![delta.to_vec()];
    let mut rounds: Vec<Vec<Send>> = Vec::new();

    let mut count = delta.len();
    let mut skip: usize = 1;
    while count > 1 {
        let cur = levels.last().unwrap();
        let odd = cur.len() % 2;
        let mut round = Vec::new();
        let mut next = Vec::with_capacity((cur.len() + 1) / 2);

        for i in (0..cur.len() - odd).step_by(2) {
            let c0 = cur[i];
            let c1 = cur[i + 1];
            if c1 > 0 {
                round.push(Send {
                    src: (i + 1) * skip,
                    dst: i * skip,
                    count: c1,
                });
            }
            next.push(c0 + c1);
        }
        if odd == 1 {
            next.push(*cur.last().unwrap());
        }
        if !round.is_empty() {
            rounds.push(round);
        }
        levels.push(next);
        count = (count + 1) / 2;
        skip *= 2;
    }
    assert_eq!(levels.last().unwrap().len(), 1);
    assert_eq!(levels.last().unwrap()[0], 0, "fill: root surplus must be zero");

    let mut level = levels.len() - 1;
    while level > 0 {
        skip /= 2;
        level -= 1;
        let cur = &levels[level];
        let odd = cur.len() % 2;
        let mut round = Vec::new();

        for i in (0..cur.len() - odd).step_by(2) {
            let c1 = cur[i + 1];
            if c1 < 0 {
                round.push(Send {
                    src: i * skip,
                    dst: (i + 1) * skip,
                    count: -c1,
                });
            }
        }
        if !round.is_empty() {
            rounds.push(round);
        }
    }

    rounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn check_fill(delta: &[i64], rounds: &[Vec<Send>]) {
        let mut x = delta.to_vec();
        for round in rounds {
            for s in round {
                assert!(x[s.src] >= s.count, "sending non-existent items");
                x[s.src] -= s.count;
                x[s.dst] += s.count;
            }
        }
        assert!(x.iter().all(|&v| v == 0), "improper ending state: {x:?}");
    }

    #[test]
    fn trivial_single_rank() {
        let rounds = fill(&[0]);
        check_fill(&[0], &rounds);
    }

    #[test]
    fn known_case() {
        let delta = [-2i64, 3, -1, 1, 1, -5, 3];
        let rounds = fill(&delta);
        check_fill(&delta, &rounds);
    }

    proptest! {
        #[test]
        fn zeroes_arbitrary_surplus(
            mut delta in prop::collection::vec(-10i64..11, 2..80),
        ) {
            let excess: i64 = delta.iter().sum();
            let last = delta.len() - 1;
            delta[last] -= excess;
            let rounds = fill(&delta);
            check_fill(&delta, &rounds);
        }
    }
}
