use crate::{
    HistogramObservation, MakeMetricObserver, MetricKind, MetricObserver, Observation,
    ObservationBucket,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// The terminal bucket to append when a histogram must capture every value.
pub const DURATION_MAX: Duration = Duration::MAX;

/// Bucket thresholds for a [`U64Histogram`].
#[derive(Debug, Clone)]
pub struct U64HistogramOptions {
    buckets: Vec<u64>,
}

impl U64HistogramOptions {
    /// Creates options from a list of `le` thresholds. Values above the
    /// largest threshold are not recorded; append `u64::MAX` to capture
    /// everything.
    pub fn new(thresholds: impl IntoIterator<Item = u64>) -> Self {
        let mut buckets: Vec<_> = thresholds.into_iter().collect();
        buckets.sort_unstable();
        Self { buckets }
    }
}

/// Bucketed observations of u64 values.
#[derive(Debug, Clone)]
pub struct U64Histogram {
    shared: Arc<Mutex<HistogramObservation<u64>>>,
}

impl U64Histogram {
    fn new(sorted_buckets: impl Iterator<Item = u64>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(HistogramObservation {
                total: 0,
                buckets: sorted_buckets
                    .map(|le| ObservationBucket { le, count: 0 })
                    .collect(),
            })),
        }
    }

    pub fn record(&self, value: u64) {
        let mut state = self.shared.lock();
        if let Some(bucket) = state.buckets.iter_mut().find(|bucket| value <= bucket.le) {
            bucket.count = bucket.count.wrapping_add(1);
            state.total = state.total.wrapping_add(value);
        }
    }

    pub fn fetch(&self) -> HistogramObservation<u64> {
        self.shared.lock().clone()
    }
}

impl MakeMetricObserver for U64Histogram {
    type Options = U64HistogramOptions;

    fn create(options: &Self::Options) -> Self {
        Self::new(options.buckets.iter().cloned())
    }
}

impl MetricObserver for U64Histogram {
    type Recorder = Self;

    fn kind() -> MetricKind {
        MetricKind::U64Histogram
    }

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::U64Histogram(self.fetch())
    }
}

/// Bucket thresholds for an [`F64Histogram`].
#[derive(Debug, Clone)]
pub struct F64HistogramOptions {
    buckets: Vec<f64>,
}

impl F64HistogramOptions {
    /// Creates options from a list of `le` thresholds, which must already be
    /// sorted ascending. Values above the largest threshold are not
    /// recorded.
    pub fn new(thresholds: impl IntoIterator<Item = f64>) -> Self {
        let buckets: Vec<f64> = thresholds.into_iter().collect();
        assert!(
            buckets.windows(2).all(|w| w[0] < w[1]),
            "histogram thresholds must be sorted ascending"
        );
        Self { buckets }
    }
}

/// Bucketed observations of f64 values, e.g. ratios.
#[derive(Debug, Clone)]
pub struct F64Histogram {
    shared: Arc<Mutex<HistogramObservation<f64>>>,
}

impl F64Histogram {
    fn new(sorted_buckets: impl Iterator<Item = f64>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(HistogramObservation {
                total: 0.0,
                buckets: sorted_buckets
                    .map(|le| ObservationBucket { le, count: 0 })
                    .collect(),
            })),
        }
    }

    pub fn record(&self, value: f64) {
        let mut state = self.shared.lock();
        if let Some(bucket) = state.buckets.iter_mut().find(|bucket| value <= bucket.le) {
            bucket.count = bucket.count.wrapping_add(1);
            state.total += value;
        }
    }

    pub fn fetch(&self) -> HistogramObservation<f64> {
        self.shared.lock().clone()
    }
}

impl MakeMetricObserver for F64Histogram {
    type Options = F64HistogramOptions;

    fn create(options: &Self::Options) -> Self {
        Self::new(options.buckets.iter().cloned())
    }
}

impl MetricObserver for F64Histogram {
    type Recorder = Self;

    fn kind() -> MetricKind {
        MetricKind::F64Histogram
    }

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::F64Histogram(self.fetch())
    }
}

/// Bucket thresholds for a [`DurationHistogram`].
#[derive(Debug, Clone)]
pub struct DurationHistogramOptions {
    buckets: Vec<Duration>,
}

impl DurationHistogramOptions {
    /// Creates options from a list of `le` thresholds. Values above the
    /// largest threshold are not recorded; append [`DURATION_MAX`] to
    /// capture everything.
    pub fn new(thresholds: impl IntoIterator<Item = Duration>) -> Self {
        let mut buckets: Vec<_> = thresholds.into_iter().collect();
        buckets.sort_unstable();
        Self { buckets }
    }
}

/// Bucketed observations of durations.
#[derive(Debug, Clone)]
pub struct DurationHistogram {
    shared: Arc<Mutex<HistogramObservation<Duration>>>,
}

impl DurationHistogram {
    fn new(sorted_buckets: impl Iterator<Item = Duration>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(HistogramObservation {
                total: Duration::ZERO,
                buckets: sorted_buckets
                    .map(|le| ObservationBucket { le, count: 0 })
                    .collect(),
            })),
        }
    }

    pub fn record(&self, value: Duration) {
        let mut state = self.shared.lock();
        if let Some(bucket) = state.buckets.iter_mut().find(|bucket| value <= bucket.le) {
            bucket.count = bucket.count.wrapping_add(1);
            state.total = state.total.checked_add(value).unwrap_or(Duration::MAX);
        }
    }

    pub fn fetch(&self) -> HistogramObservation<Duration> {
        self.shared.lock().clone()
    }
}

impl MakeMetricObserver for DurationHistogram {
    type Options = DurationHistogramOptions;

    fn create(options: &Self::Options) -> Self {
        Self::new(options.buckets.iter().cloned())
    }
}

impl MetricObserver for DurationHistogram {
    type Recorder = Self;

    fn kind() -> MetricKind {
        MetricKind::DurationHistogram
    }

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::DurationHistogram(self.fetch())
    }
}
