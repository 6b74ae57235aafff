use crate::{MakeMetricObserver, MetricKind, MetricObserver, Observation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A u64 value that can move in both directions.
///
/// If the same attribute set is recorded from multiple call sites the
/// reported value is whichever site wrote last.
#[derive(Debug, Clone, Default)]
pub struct U64Gauge {
    state: Arc<AtomicU64>,
}

impl U64Gauge {
    /// Sets the gauge.
    pub fn set(&self, value: u64) {
        self.state.store(value, Ordering::Relaxed);
    }

    /// Increments the gauge by `delta`.
    pub fn inc(&self, delta: u64) {
        self.state.fetch_add(delta, Ordering::Relaxed);
    }

    /// Decrements the gauge by `delta`, wrapping on underflow.
    pub fn dec(&self, delta: u64) {
        self.state.fetch_sub(delta, Ordering::Relaxed);
    }

    /// The current value.
    pub fn fetch(&self) -> u64 {
        self.state.load(Ordering::Relaxed)
    }
}

impl MakeMetricObserver for U64Gauge {
    type Options = ();

    fn create(_: &Self::Options) -> Self {
        Self::default()
    }
}

impl MetricObserver for U64Gauge {
    type Recorder = Self;

    fn kind() -> MetricKind {
        MetricKind::U64Gauge
    }

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::U64Gauge(self.fetch())
    }
}
