//! The in-memory state of a single series.

use crate::chunk::ChunkDesc;
use crate::flush::FlushReason;
use clock::Time;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// An immutable, ordered label set identifying a series.
///
/// Cheap to clone; clones share storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(Arc<BTreeMap<String, String>>);

impl Labels {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(Arc::new(labels))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value of label `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.as_str())
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        write!(f, "}}")
    }
}

/// The chunks of one series, oldest first.
///
/// Every descriptor except the last is closed and immutable; the last (the
/// head) accepts appends from the write path until it is closed. Shared as
/// `Arc<parking_lot::Mutex<MemorySeries>>`: the mutex is the per-fingerprint
/// lock the write path and the flush engine both take, and all methods here
/// assume the caller holds it.
#[derive(Debug)]
pub struct MemorySeries {
    labels: Labels,
    chunk_descs: VecDeque<ChunkDesc>,
    head_closed: bool,
    stale: bool,
}

impl MemorySeries {
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            chunk_descs: VecDeque::new(),
            head_closed: false,
            stale: false,
        }
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn chunk_descs(&self) -> &VecDeque<ChunkDesc> {
        &self.chunk_descs
    }

    pub fn num_chunks(&self) -> usize {
        self.chunk_descs.len()
    }

    /// The head chunk: the most recent, possibly still open one.
    pub fn head(&self) -> Option<&ChunkDesc> {
        self.chunk_descs.back()
    }

    /// `first_time` of the oldest chunk.
    pub fn first_time(&self) -> Option<Time> {
        self.chunk_descs.front().map(|c| c.first_time)
    }

    /// `first_time` of the oldest chunk not yet flushed, if any.
    pub fn first_unflushed_chunk_time(&self) -> Option<Time> {
        self.chunk_descs
            .iter()
            .find(|c| !c.flushed)
            .map(|c| c.first_time)
    }

    pub fn head_closed(&self) -> bool {
        self.head_closed
    }

    /// Whether the last sample appended was a staleness marker.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Set by the write path when a staleness marker arrives.
    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    /// Closes the head chunk, recording why. A head that is already closed
    /// keeps its original reason.
    pub fn close_head(&mut self, reason: FlushReason) {
        if self.head_closed {
            return;
        }
        if let Some(head) = self.chunk_descs.back_mut() {
            head.flush_reason = reason;
            self.head_closed = true;
        }
    }

    /// Appends a new head chunk. The write path closes the previous head
    /// before cutting a new one.
    pub fn push_chunk(&mut self, desc: ChunkDesc) {
        self.chunk_descs.push_back(desc);
        self.head_closed = false;
    }

    /// Marks the `count` oldest chunks as flushed at `now`, starting their
    /// retention clock.
    pub(crate) fn mark_flushed(&mut self, count: usize, now: Time) {
        for desc in self.chunk_descs.iter_mut().take(count) {
            desc.flushed = true;
            desc.last_update = now;
        }
    }

    /// Removes and returns the oldest chunk.
    pub(crate) fn pop_front_chunk(&mut self) -> Option<ChunkDesc> {
        self.chunk_descs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{chunk, labels};
    use clock::Time;

    #[test]
    fn labels_display() {
        let labels = labels("requests");
        assert_eq!(labels.to_string(), r#"{__name__="requests"}"#);
        assert_eq!(labels.get("__name__"), Some("requests"));
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn first_and_unflushed_times() {
        let mut series = MemorySeries::new(labels("requests"));
        assert_eq!(series.first_time(), None);
        assert_eq!(series.first_unflushed_chunk_time(), None);

        series.push_chunk(chunk(1_000, 2_000, 2_000));
        series.push_chunk(chunk(3_000, 4_000, 4_000));

        assert_eq!(series.first_time(), Some(Time::from_timestamp_millis(1_000)));
        assert_eq!(
            series.first_unflushed_chunk_time(),
            Some(Time::from_timestamp_millis(1_000))
        );

        series.mark_flushed(1, Time::from_timestamp_millis(5_000));
        assert_eq!(
            series.first_unflushed_chunk_time(),
            Some(Time::from_timestamp_millis(3_000))
        );
        assert!(series.chunk_descs()[0].flushed);
        assert_eq!(
            series.chunk_descs()[0].last_update,
            Time::from_timestamp_millis(5_000)
        );

        series.mark_flushed(2, Time::from_timestamp_millis(6_000));
        assert_eq!(series.first_unflushed_chunk_time(), None);
    }

    #[test]
    fn close_head_keeps_the_first_reason() {
        let mut series = MemorySeries::new(labels("requests"));
        series.push_chunk(chunk(1_000, 2_000, 2_000));
        assert!(!series.head_closed());

        series.close_head(FlushReason::Aged);
        assert!(series.head_closed());
        assert_eq!(series.head().unwrap().flush_reason, FlushReason::Aged);

        // Closing again must not overwrite the recorded reason.
        series.close_head(FlushReason::Immediate);
        assert_eq!(series.head().unwrap().flush_reason, FlushReason::Aged);

        // A new head opens the series again.
        series.push_chunk(chunk(3_000, 4_000, 4_000));
        assert!(!series.head_closed());
    }

    #[test]
    fn pop_front_drops_oldest() {
        let mut series = MemorySeries::new(labels("requests"));
        series.push_chunk(chunk(1_000, 2_000, 2_000));
        series.push_chunk(chunk(3_000, 4_000, 4_000));

        let popped = series.pop_front_chunk().unwrap();
        assert_eq!(popped.first_time, Time::from_timestamp_millis(1_000));
        assert_eq!(series.num_chunks(), 1);
        assert_eq!(series.first_time(), Some(Time::from_timestamp_millis(3_000)));
    }
}
