//! Valid latency samples and where they go.
//!
//! The destination thread builds one [`LatencySample`] per valid
//! measurement and hands it to the run's [`SampleSink`]. Sinks are called
//! from inside a streak, between two 2-party barriers, so they should be
//! quick; the source thread is waiting on the next `before` barrier.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use c2clat_probe::PhysicalCoreId;

/// One valid ping-pong measurement of an ordered pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub from_index: usize,
    pub to_index: usize,
    pub from_core_id: PhysicalCoreId,
    pub to_core_id: PhysicalCoreId,
    /// Source-direction one-way latency in ns.
    pub from_ns_per_iteration: f64,
    /// Destination-direction one-way latency in ns.
    pub to_ns_per_iteration: f64,
    pub from_frequency_before_ghz: f64,
    pub from_frequency_after_ghz: f64,
    pub to_frequency_before_ghz: f64,
    pub to_frequency_after_ghz: f64,
}

/// Receiver of valid samples. Shared by every worker.
pub trait SampleSink: Send + Sync {
    fn record(&self, sample: &LatencySample);
}

impl<S: SampleSink + ?Sized> SampleSink for &S {
    fn record(&self, sample: &LatencySample) {
        (**self).record(sample);
    }
}

/// Drops every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn record(&self, _sample: &LatencySample) {}
}

/// Keeps every sample in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    samples: Mutex<Vec<LatencySample>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Copy of everything recorded so far.
    pub fn samples(&self) -> Vec<LatencySample> {
        self.samples.lock().clone()
    }

    pub fn into_samples(self) -> Vec<LatencySample> {
        self.samples.into_inner()
    }
}

impl SampleSink for CollectingSink {
    fn record(&self, sample: &LatencySample) {
        self.samples.lock().push(*sample);
    }
}

/// Adapter that forwards every sample to a closure.
pub struct FnSink<F>(pub F);

impl<F> SampleSink for FnSink<F>
where
    F: Fn(&LatencySample) + Send + Sync,
{
    fn record(&self, sample: &LatencySample) {
        (self.0)(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(from: usize, to: usize) -> LatencySample {
        LatencySample {
            from_index: from,
            to_index: to,
            from_core_id: PhysicalCoreId::new(10 + from as u64),
            to_core_id: PhysicalCoreId::new(10 + to as u64),
            from_ns_per_iteration: 41.5,
            to_ns_per_iteration: 40.25,
            from_frequency_before_ghz: 3.2,
            from_frequency_after_ghz: 3.1,
            to_frequency_before_ghz: 3.0,
            to_frequency_after_ghz: 3.05,
        }
    }

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        assert!(sink.is_empty());
        sink.record(&sample(0, 1));
        sink.record(&sample(1, 0));
        assert_eq!(sink.len(), 2);
        let got = sink.into_samples();
        assert_eq!((got[0].from_index, got[0].to_index), (0, 1));
        assert_eq!((got[1].from_index, got[1].to_index), (1, 0));
    }

    #[test]
    fn fn_sink_forwards() {
        let seen = AtomicUsize::new(0);
        let sink = FnSink(|s: &LatencySample| {
            seen.fetch_add(s.to_index, Ordering::Relaxed);
        });
        sink.record(&sample(0, 2));
        sink.record(&sample(1, 3));
        assert_eq!(seen.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn sample_json_uses_plain_core_ids() {
        let json = serde_json::to_string(&sample(0, 1)).unwrap();
        assert!(json.contains("\"from_core_id\":10"));
        let back: LatencySample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample(0, 1));
    }
}
