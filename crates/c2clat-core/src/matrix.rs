//! Experiment matrix and the least-sampled-first scheduler.
//!
//! All `n * (n - 1)` experiments are allocated once in a boxed slice and
//! never move. Scheduling works on a separate vector of arena indices: the
//! active experiment is the one at the front of that vector, and
//! [`ExperimentMatrix::resort`] reorders it with a stable sort by
//! `valid_results`. Because the sort is stable, ties keep their previous
//! relative order.
//!
//! The matrix also owns the four round barriers sized for every worker and
//! the run's completion flag.

use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::experiment::{Experiment, ExperimentSnapshot};
use crate::metrics;

/// The four whole-population barriers that gate one round.
#[derive(Debug)]
pub struct RoundBarriers {
    /// Round start. Worker 0's reset cannot overlap stragglers.
    pub arrive: Barrier,
    /// Reset is visible before anyone claims.
    pub identify: Barrier,
    /// Claims are settled before anyone reads them.
    pub claim: Barrier,
    /// Round end. Nobody starts round r+1 while r is still measuring.
    pub rejoin: Barrier,
}

impl RoundBarriers {
    fn new(parties: usize) -> Self {
        Self {
            arrive: Barrier::new(parties),
            identify: Barrier::new(parties),
            claim: Barrier::new(parties),
            rejoin: Barrier::new(parties),
        }
    }
}

/// Fixed arena of experiments plus scheduling order and completion state.
#[derive(Debug)]
pub struct ExperimentMatrix {
    experiments: Box<[Experiment]>,
    order: RwLock<Vec<usize>>,
    target: u32,
    barriers: RoundBarriers,
    done: AtomicBool,
    target_reached: AtomicBool,
    stop_requested: AtomicBool,
    resorts: AtomicU64,
}

impl ExperimentMatrix {
    /// One experiment per ordered pair of distinct indices in `0..total_cores`,
    /// in row-major order.
    #[must_use]
    pub fn new(total_cores: usize, target: u32) -> Self {
        let experiments: Box<[Experiment]> = (0..total_cores)
            .flat_map(|from| {
                (0..total_cores)
                    .filter(move |&to| to != from)
                    .map(move |to| Experiment::new(from, to))
            })
            .collect();
        let order = (0..experiments.len()).collect();

        tracing::debug!(
            target: "c2clat.matrix",
            total_cores,
            experiments = experiments.len(),
            target,
            "experiment matrix built"
        );

        Self {
            experiments,
            order: RwLock::new(order),
            target,
            barriers: RoundBarriers::new(total_cores),
            done: AtomicBool::new(false),
            target_reached: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            resorts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    #[must_use]
    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn barriers(&self) -> &RoundBarriers {
        &self.barriers
    }

    /// The active experiment: least `valid_results` as of the last resort.
    ///
    /// # Panics
    ///
    /// On an empty matrix, which a validated configuration never produces.
    pub fn top(&self) -> &Experiment {
        let index = self.order.read()[0];
        &self.experiments[index]
    }

    /// Experiment for the pair `from -> to`, if both are in range.
    pub fn get(&self, from: usize, to: usize) -> Option<&Experiment> {
        self.experiments
            .iter()
            .find(|e| e.from_index() == from && e.to_index() == to)
    }

    /// Arena in construction order.
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    /// Stable-sort the schedule by `valid_results` and flip the done flag if
    /// the least-sampled experiment reached the target. Returns the done flag.
    pub fn resort(&self) -> bool {
        let mut order = self.order.write();
        order.sort_by_key(|&i| self.experiments[i].valid_results());
        let least = self.experiments[order[0]].valid_results();
        drop(order);

        self.resorts.fetch_add(1, Ordering::Relaxed);
        metrics::record_resort();

        let reached = least >= self.target;
        if reached {
            self.target_reached.store(true, Ordering::Relaxed);
            self.done.store(true, Ordering::Release);
            tracing::info!(
                target: "c2clat.matrix",
                least,
                target = self.target,
                "every pair reached the target"
            );
        } else {
            tracing::trace!(target: "c2clat.matrix", least, "resorted");
        }
        reached
    }

    /// Minimum `valid_results` over all experiments.
    pub fn min_valid_results(&self) -> u32 {
        self.experiments
            .iter()
            .map(Experiment::valid_results)
            .min()
            .unwrap_or(0)
    }

    /// Whether workers should leave at the next round boundary.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Whether the run ended because every pair reached the target.
    pub fn target_reached(&self) -> bool {
        self.target_reached.load(Ordering::Relaxed)
    }

    /// Ask the run to stop. Takes effect at the end of the next round.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Turn a pending stop request into the done flag. Only worker 0 calls
    /// this, inside a round, so every worker sees the flag at the same
    /// round boundary.
    pub(crate) fn promote_stop_request(&self) -> bool {
        if self.stop_requested() && !self.is_done() {
            self.done.store(true, Ordering::Release);
            tracing::info!(target: "c2clat.matrix", "stop requested; finishing current round");
            return true;
        }
        false
    }

    pub fn resort_count(&self) -> u64 {
        self.resorts.load(Ordering::Relaxed)
    }

    /// Counters of every experiment in current schedule order.
    pub fn snapshot(&self) -> Vec<ExperimentSnapshot> {
        self.order
            .read()
            .iter()
            .map(|&i| self.experiments[i].snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_every_ordered_pair_once() {
        let m = ExperimentMatrix::new(4, 5);
        assert_eq!(m.len(), 12);
        let mut pairs: Vec<_> = m
            .experiments()
            .iter()
            .map(|e| (e.from_index(), e.to_index()))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        assert_eq!(pairs.len(), 12);
        assert!(pairs.iter().all(|(f, t)| f != t));
    }

    #[test]
    fn initial_top_is_first_pair() {
        let m = ExperimentMatrix::new(3, 1);
        let top = m.top();
        assert_eq!((top.from_index(), top.to_index()), (0, 1));
    }

    #[test]
    fn resort_picks_least_sampled() {
        let m = ExperimentMatrix::new(3, 10);
        m.get(0, 1).unwrap().record_valid();
        m.get(0, 1).unwrap().record_valid();
        m.get(0, 2).unwrap().record_valid();
        assert!(!m.resort());

        let top = m.top();
        assert_eq!(top.valid_results(), 0);
        // Stable: (1, 0) is the first zero in construction order.
        assert_eq!((top.from_index(), top.to_index()), (1, 0));

        let snap = m.snapshot();
        assert!(snap.windows(2).all(|w| w[0].valid_results <= w[1].valid_results));
    }

    #[test]
    fn resort_is_stable_for_ties() {
        let m = ExperimentMatrix::new(3, 10);
        let before: Vec<_> = m.snapshot().iter().map(|s| (s.from_index, s.to_index)).collect();
        m.resort();
        let after: Vec<_> = m.snapshot().iter().map(|s| (s.from_index, s.to_index)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn done_when_minimum_reaches_target() {
        let m = ExperimentMatrix::new(2, 2);
        for e in m.experiments() {
            e.record_valid();
        }
        assert!(!m.resort());
        assert!(!m.is_done());

        m.get(0, 1).unwrap().record_valid();
        assert!(!m.resort(), "(1, 0) is still short");
        m.get(1, 0).unwrap().record_valid();
        assert!(m.resort());
        assert!(m.is_done());
        assert!(m.target_reached());
        assert_eq!(m.min_valid_results(), 2);
        assert_eq!(m.resort_count(), 3);
    }

    #[test]
    fn stop_request_is_promoted_once() {
        let m = ExperimentMatrix::new(2, 1);
        assert!(!m.promote_stop_request());
        m.request_stop();
        assert!(!m.is_done(), "request alone must not end the run");
        assert!(m.promote_stop_request());
        assert!(m.is_done());
        assert!(!m.target_reached());
        assert!(!m.promote_stop_request());
    }

    #[test]
    fn get_out_of_range() {
        let m = ExperimentMatrix::new(2, 1);
        assert!(m.get(0, 0).is_none());
        assert!(m.get(0, 2).is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_resort_puts_least_sampled_first(
            cores in 2_usize..6,
            bumps in proptest::collection::vec(0_usize..30, 0..120),
            target in 1_u32..8,
        ) {
            let m = ExperimentMatrix::new(cores, target);
            for (step, &pick) in bumps.iter().enumerate() {
                m.experiments()[pick % m.len()].record_valid();
                if step % 7 == 0 {
                    m.resort();
                }
            }
            let done = m.resort();

            let order = m.snapshot();
            proptest::prop_assert!(
                order.windows(2).all(|w| w[0].valid_results <= w[1].valid_results)
            );
            proptest::prop_assert_eq!(m.top().valid_results(), m.min_valid_results());
            proptest::prop_assert_eq!(done, m.min_valid_results() >= target);
            proptest::prop_assert_eq!(order.len(), cores * (cores - 1));
        }
    }
}
