use crate::{Attributes, Instrument, MetricKind, Observation, Reporter};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Construction of an observer from its options, e.g. histogram buckets.
///
/// Split from [`MetricObserver`] so options types stay usable by callers that
/// never register anything.
pub trait MakeMetricObserver {
    type Options: Send + Sync;

    fn create(options: &Self::Options) -> Self;
}

/// A single observable value: the building block [`Metric`] replicates per
/// attribute set.
pub trait MetricObserver:
    MakeMetricObserver + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// The type used to record values, almost always `Self`.
    type Recorder;

    fn kind() -> MetricKind;

    fn recorder(&self) -> Self::Recorder;

    fn observe(&self) -> Observation;
}

/// An [`Instrument`] that maintains one `T` per unique [`Attributes`] set.
///
/// Cheap to clone; clones share state.
pub struct Metric<T: MetricObserver> {
    name: &'static str,
    description: &'static str,
    shared: Arc<MetricShared<T>>,
}

struct MetricShared<T: MetricObserver> {
    options: T::Options,
    observers: Mutex<BTreeMap<Attributes, T>>,
}

impl<T: MetricObserver> Clone for Metric<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            description: self.description,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: MetricObserver> std::fmt::Debug for Metric<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("kind", &T::kind())
            .finish_non_exhaustive()
    }
}

impl<T: MetricObserver> Metric<T> {
    pub(crate) fn new(name: &'static str, description: &'static str, options: T::Options) -> Self {
        Self {
            name,
            description,
            shared: Arc::new(MetricShared {
                options,
                observers: Default::default(),
            }),
        }
    }

    /// Returns the recorder for the given attribute set, creating the
    /// underlying observer on first use.
    ///
    /// The returned value can be cached to amortize attribute handling over
    /// many records.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T::Recorder {
        self.observer(attributes).recorder()
    }

    /// Returns the observer for the given attribute set, creating it on
    /// first use.
    pub fn observer(&self, attributes: impl Into<Attributes>) -> T {
        let mut observers = self.shared.observers.lock();
        observers
            .entry(attributes.into())
            .or_insert_with(|| T::create(&self.shared.options))
            .clone()
    }

    /// Returns the observer for the given attribute set only if it already
    /// exists. For tests.
    pub fn get_observer(&self, attributes: &Attributes) -> Option<T> {
        self.shared.observers.lock().get(attributes).cloned()
    }
}

impl<T: MetricObserver> Instrument for Metric<T> {
    fn report(&self, reporter: &mut dyn Reporter) {
        reporter.start_metric(self.name, self.description, T::kind());

        let observers = self.shared.observers.lock();
        for (attributes, observer) in &*observers {
            reporter.report_observation(attributes, observer.observe())
        }
        drop(observers);

        reporter.finish_metric();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
