#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! A small metric abstraction decoupling recording from export.
//!
//! [`Registry`] maps metric names to [`Instrument`]s. Recording happens
//! through concrete instrument types ([`U64Counter`], [`U64Gauge`],
//! [`U64Histogram`], [`F64Histogram`], [`DurationHistogram`]) obtained from a
//! [`Metric<T>`], which keeps one instrument per unique [`Attributes`] set.
//! Reporting walks every registered instrument and streams [`Observation`]s
//! into a [`Reporter`]; [`RawReporter`] buffers them so tests can assert on
//! recorded values without an export pipeline.
//!
//! ```
//! use metric::{Attributes, Metric, Observation, RawReporter, Registry, U64Counter};
//!
//! let registry = Registry::new();
//! let stored: Metric<U64Counter> = registry.register_metric("chunks_stored", "stored chunks");
//!
//! stored.recorder(&[("user", "tenant-a")]).inc(3);
//!
//! let mut reporter = RawReporter::default();
//! registry.report(&mut reporter);
//! assert_eq!(
//!     reporter.metric("chunks_stored").unwrap().observations[0],
//!     (Attributes::from(&[("user", "tenant-a")]), Observation::U64Counter(3)),
//! );
//! ```

use parking_lot::RwLock;
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;

mod counter;
mod gauge;
mod histogram;
mod metric;

pub use crate::metric::*;
pub use counter::*;
pub use gauge::*;
pub use histogram::*;

/// A map of metric names to [`Instrument`]s.
///
/// Registration is write-once per name; lookups and reports are the common
/// case, so the map sits behind a read-write lock. A `BTreeMap` keeps
/// reports in a stable, alphabetical order.
#[derive(Debug, Default)]
pub struct Registry {
    instruments: RwLock<BTreeMap<&'static str, Box<dyn Instrument>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or fetches the existing) [`Metric`] called `name`.
    ///
    /// Names are `&'static str` so every metric name appears verbatim in the
    /// source and can be grepped for.
    ///
    /// # Panics
    ///
    /// Panics if `name` is illegal, or names an instrument of a different
    /// type.
    pub fn register_metric<T>(&self, name: &'static str, description: &'static str) -> Metric<T>
    where
        T: MetricObserver,
        T::Options: Default,
    {
        self.register_metric_with_options(name, description, Default::default)
    }

    /// As [`Registry::register_metric`] but with explicit instrument options,
    /// e.g. histogram buckets.
    ///
    /// `options` is only invoked when the metric does not already exist.
    pub fn register_metric_with_options<T: MetricObserver, F: FnOnce() -> T::Options>(
        &self,
        name: &'static str,
        description: &'static str,
        options: F,
    ) -> Metric<T> {
        self.register_instrument(name, move || Metric::new(name, description, options()))
    }

    /// Registers (or fetches the existing) [`Instrument`] called `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is illegal, or names an instrument of a different
    /// type.
    pub fn register_instrument<F: FnOnce() -> I, I: Instrument + Clone + 'static>(
        &self,
        name: &'static str,
        create: F,
    ) -> I {
        assert_legal_key(name);

        // Metrics register once and are fetched many times; stay off the
        // write lock when the name is already there.
        if let Some(instrument) = self.get_instrument::<I>(name) {
            return instrument;
        }

        let mut instruments = self.instruments.write();
        let instrument = instruments
            .entry(name)
            .or_insert_with(|| Box::new(create()));
        downcast_shared(name, instrument.as_any())
    }

    /// Returns the already-registered instrument called `name`, if any.
    ///
    /// Primarily useful for tests.
    ///
    /// # Panics
    ///
    /// Panics if `name` names an instrument of a different type than `I`.
    pub fn get_instrument<I: Instrument + Clone + 'static>(&self, name: &'static str) -> Option<I> {
        let instruments = self.instruments.read();
        let instrument = instruments.get(name)?;
        Some(downcast_shared(name, instrument.as_any()))
    }

    /// Streams the current state of every registered instrument into
    /// `reporter`, in alphabetical name order.
    pub fn report(&self, reporter: &mut dyn Reporter) {
        for instrument in self.instruments.read().values() {
            instrument.report(reporter)
        }
    }
}

/// Recovers the concrete instrument handle stored under `name`; handles are
/// shared, so cloning one observes the same state as the original.
///
/// # Panics
///
/// Panics if the stored instrument is not an `I`.
fn downcast_shared<I: Instrument + Clone + 'static>(name: &str, instrument: &dyn Any) -> I {
    instrument
        .downcast_ref::<I>()
        .unwrap_or_else(|| {
            panic!("metric {name} already registered as a different instrument type")
        })
        .clone()
}

/// A type that can write its observations to a [`Reporter`].
pub trait Instrument: std::fmt::Debug + Send + Sync {
    /// Reports the current state: one `start_metric`, one
    /// `report_observation` per attribute set (alphabetical), one
    /// `finish_metric`.
    fn report(&self, reporter: &mut dyn Reporter);

    /// Downcast support for [`Registry::get_instrument`].
    fn as_any(&self) -> &dyn Any;
}

/// A sink for the state of a [`Registry`].
pub trait Reporter {
    /// Begins a metric. Always paired with a later `finish_metric`.
    fn start_metric(
        &mut self,
        metric_name: &'static str,
        description: &'static str,
        kind: MetricKind,
    );

    /// Reports one attribute set of the metric begun by `start_metric`.
    fn report_observation(&mut self, attributes: &Attributes, observation: Observation);

    /// Ends the metric begun by `start_metric`.
    fn finish_metric(&mut self);
}

/// The buffered observations of a single metric, as captured by
/// [`RawReporter`].
#[derive(Debug, Clone)]
pub struct ObservationSet {
    pub metric_name: &'static str,
    pub description: &'static str,
    pub kind: MetricKind,
    pub observations: Vec<(Attributes, Observation)>,
}

/// A [`Reporter`] that buffers everything it is given. For tests.
///
/// Each `start_metric` opens a new [`ObservationSet`] at the back of the
/// buffer; observations land in that set until the matching `finish_metric`
/// seals it.
#[derive(Debug, Clone, Default)]
pub struct RawReporter {
    sets: Vec<ObservationSet>,
    open: bool,
}

impl Reporter for RawReporter {
    fn start_metric(
        &mut self,
        metric_name: &'static str,
        description: &'static str,
        kind: MetricKind,
    ) {
        assert!(!self.open, "start_metric while a metric is still open");
        self.sets.push(ObservationSet {
            metric_name,
            description,
            kind,
            observations: Vec::new(),
        });
        self.open = true;
    }

    fn report_observation(&mut self, attributes: &Attributes, observation: Observation) {
        assert!(self.open, "report_observation outside start/finish");
        self.sets
            .last_mut()
            .expect("an open metric has a set")
            .observations
            .push((attributes.clone(), observation));
    }

    fn finish_metric(&mut self) {
        assert!(self.open, "finish_metric without start_metric");
        self.open = false;
    }
}

impl RawReporter {
    /// The buffered [`ObservationSet`] of every reported metric, in report
    /// order.
    pub fn observations(&self) -> &Vec<ObservationSet> {
        assert!(!self.open, "metric observation in progress");
        &self.sets
    }

    /// The observation set of the metric called `metric_name`, if reported.
    pub fn metric(&self, metric_name: &str) -> Option<&ObservationSet> {
        self.observations()
            .iter()
            .find(|set| set.metric_name == metric_name)
    }
}

/// The type of [`Observation`] a metric reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MetricKind {
    U64Counter,
    U64Gauge,
    U64Histogram,
    F64Histogram,
    DurationHistogram,
}

/// A single recorded value set.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    U64Counter(u64),
    U64Gauge(u64),
    U64Histogram(HistogramObservation<u64>),
    F64Histogram(HistogramObservation<f64>),
    DurationHistogram(HistogramObservation<std::time::Duration>),
}

/// A snapshot of a histogram: total of all recorded values plus
/// non-cumulative bucket counts.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramObservation<T> {
    /// The sum of all recorded values.
    pub total: T,
    /// The buckets. `count` is the number of values in `(prev.le, le]`, NOT
    /// a cumulative count as in the prometheus exposition format.
    pub buckets: Vec<ObservationBucket<T>>,
}

impl<T> HistogramObservation<T> {
    /// The number of recorded values across all buckets.
    pub fn sample_count(&self) -> u64 {
        self.buckets.iter().map(|bucket| bucket.count).sum()
    }
}

/// A single histogram bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBucket<T> {
    pub le: T,
    pub count: u64,
}

/// A set of key-value pairs with unique keys, identifying one instrument
/// within a [`Metric`].
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Attributes(BTreeMap<&'static str, Cow<'static, str>>);

impl Attributes {
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, &'static str, Cow<'static, str>> {
        self.0.iter()
    }

    /// The value recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_ref())
    }
}

impl<const N: usize> From<&[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: &[(&'static str, &'static str); N]) -> Self {
        Self::from(pairs.as_slice())
    }
}

impl From<&[(&'static str, &'static str)]> for Attributes {
    fn from(pairs: &[(&'static str, &'static str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(key, value)| {
                    assert_legal_key(key);
                    (*key, Cow::Borrowed(*value))
                })
                .collect(),
        )
    }
}

/// Attribute values that are only known at runtime, e.g. tenant identifiers.
impl<const N: usize> From<[(&'static str, String); N]> for Attributes {
    fn from(pairs: [(&'static str, String); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| {
                    assert_legal_key(key);
                    (key, Cow::Owned(value))
                })
                .collect(),
        )
    }
}

/// Metric and attribute names are lowercase snake case, so they survive
/// every export format unmangled.
///
/// # Panics
///
/// Panics unless `name` is non-empty `[0-9a-z_]+`.
pub fn assert_legal_key(name: &str) {
    let legal = !name.is_empty()
        && name
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'_'));
    assert!(legal, "illegal name {name:?}: want non-empty [0-9a-z_]+");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_report() {
        let registry = Registry::new();
        let counter: Metric<U64Counter> = registry.register_metric("requests", "requests served");
        let gauge: Metric<U64Gauge> = registry.register_metric("depth", "queue depth");

        counter.recorder(&[("user", "a")]).inc(23);
        counter.recorder(&[("user", "b")]).inc(53);
        gauge.recorder(&[]).set(49);

        let mut reporter = RawReporter::default();
        registry.report(&mut reporter);

        // Reports come out alphabetical by metric name, then by attributes.
        let names: Vec<_> = reporter
            .observations()
            .iter()
            .map(|set| set.metric_name)
            .collect();
        assert_eq!(names, ["depth", "requests"]);

        let depth = reporter.metric("depth").unwrap();
        assert_eq!(depth.kind, MetricKind::U64Gauge);
        assert_eq!(depth.observations.len(), 1);
        assert_eq!(depth.observations[0].1, Observation::U64Gauge(49));

        let requests = reporter.metric("requests").unwrap();
        assert_eq!(requests.kind, MetricKind::U64Counter);
        assert_eq!(
            requests.observations,
            vec![
                (
                    Attributes::from(&[("user", "a")]),
                    Observation::U64Counter(23)
                ),
                (
                    Attributes::from(&[("user", "b")]),
                    Observation::U64Counter(53)
                ),
            ]
        );

        assert!(reporter.metric("unreported").is_none());
    }

    #[test]
    fn get_instrument() {
        let registry = Registry::new();
        let counter: Metric<U64Counter> = registry.register_metric("hits", "hits");
        counter.recorder(&[("user", "a")]).inc(7);

        assert!(registry
            .get_instrument::<Metric<U64Counter>>("unregistered")
            .is_none());

        let fetched = registry
            .get_instrument::<Metric<U64Counter>>("hits")
            .unwrap();
        assert_eq!(
            fetched
                .get_observer(&Attributes::from(&[("user", "a")]))
                .unwrap()
                .fetch(),
            7
        );
        assert!(fetched
            .get_observer(&Attributes::from(&[("user", "nope")]))
            .is_none());
    }

    #[test]
    fn registering_twice_returns_the_same_instrument() {
        let registry = Registry::new();
        let a: Metric<U64Counter> = registry.register_metric("hits", "hits");
        a.recorder(&[]).inc(1);
        let b: Metric<U64Counter> = registry.register_metric("hits", "hits");
        b.recorder(&[]).inc(1);
        assert_eq!(a.get_observer(&Attributes::from(&[])).unwrap().fetch(), 2);
    }

    #[test]
    fn owned_attribute_values() {
        let user = String::from("tenant-42");
        let attributes = Attributes::from([("user", user)]);
        assert_eq!(attributes.get("user"), Some("tenant-42"));
        assert_eq!(attributes, Attributes::from(&[("user", "tenant-42")]));
    }

    #[test]
    #[should_panic(expected = "metric hits already registered as a different instrument type")]
    fn type_mismatch() {
        let registry = Registry::new();
        registry.register_metric::<U64Gauge>("hits", "hits");
        registry.register_metric::<U64Counter>("hits", "hits");
    }

    #[test]
    #[should_panic(expected = "illegal name \"bad name\"")]
    fn illegal_metric_name() {
        let registry = Registry::new();
        registry.register_metric::<U64Gauge>("bad name", "");
    }

    #[test]
    #[should_panic(expected = "illegal name \"bad key\"")]
    fn illegal_attribute_name() {
        Attributes::from(&[("bad key", "value")]);
    }
}
