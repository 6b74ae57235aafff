//! The metric surface of the flush engine.
//!
//! Names are operator-facing and must not change.

use metric::{
    DurationHistogram, DurationHistogramOptions, F64Histogram, F64HistogramOptions, Metric,
    Registry, U64Counter, U64Gauge, U64Histogram, U64HistogramOptions, DURATION_MAX,
};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct FlushMetrics {
    /// Distribution of stored chunk utilization, recorded when stored.
    pub(crate) chunk_utilization: F64Histogram,
    /// Distribution of stored chunk sample counts, recorded when stored.
    pub(crate) chunk_length: U64Histogram,
    /// Distribution of stored chunk sizes, recorded when stored.
    pub(crate) chunk_size: U64Histogram,
    /// Distribution of chunk ages, recorded when stored.
    pub(crate) chunk_age: DurationHistogram,
    /// Chunks stored, per user.
    pub(crate) chunks_stored: Metric<U64Counter>,
    /// Bytes stored in chunks, per user.
    pub(crate) chunk_stored_bytes: Metric<U64Counter>,
    /// Chunks currently held in memory. The write path increments this as it
    /// cuts chunks; the flush engine only decrements.
    pub(crate) memory_chunks: U64Gauge,
    /// Series scheduled for flushing, per reason. Bumped once per actual
    /// enqueue, not per sweep.
    pub(crate) flush_reasons: Metric<U64Counter>,
    /// Chunks dropped instead of stored because they carried too few
    /// samples.
    pub(crate) dropped_chunks: U64Counter,
    /// Unix timestamp of the oldest unflushed chunk in memory, 0 when none.
    pub(crate) oldest_unflushed_chunk_timestamp: U64Gauge,
}

impl FlushMetrics {
    pub(crate) fn new(registry: &Registry) -> Self {
        Self {
            chunk_utilization: registry
                .register_metric_with_options::<F64Histogram, _>(
                    "chunk_utilization",
                    "Distribution of stored chunk utilization (when stored).",
                    || F64HistogramOptions::new([0.0, 0.2, 0.4, 0.6, 0.8, 1.0]),
                )
                .recorder(&[]),
            chunk_length: registry
                .register_metric_with_options::<U64Histogram, _>(
                    "chunk_length",
                    "Distribution of stored chunk lengths (when stored).",
                    || U64HistogramOptions::new((0..11).map(|i| 5 << i).chain([u64::MAX])),
                )
                .recorder(&[]),
            chunk_size: registry
                .register_metric_with_options::<U64Histogram, _>(
                    "chunk_size_bytes",
                    "Distribution of stored chunk sizes (when stored).",
                    || U64HistogramOptions::new((0..5).map(|i| 500 << i).chain([u64::MAX])),
                )
                .recorder(&[]),
            chunk_age: registry
                .register_metric_with_options::<DurationHistogram, _>(
                    "chunk_age_seconds",
                    "Distribution of chunk ages (when stored).",
                    || {
                        // With default settings chunks flush between five
                        // minutes and twelve hours old.
                        DurationHistogramOptions::new(
                            [60, 300, 600, 1800, 3600, 7200, 14400, 36000, 43200, 57600]
                                .map(Duration::from_secs)
                                .into_iter()
                                .chain([DURATION_MAX]),
                        )
                    },
                )
                .recorder(&[]),
            chunks_stored: registry
                .register_metric("chunks_stored_total", "Total stored chunks per user."),
            chunk_stored_bytes: registry.register_metric(
                "chunk_stored_bytes_total",
                "Total bytes stored in chunks per user.",
            ),
            memory_chunks: registry
                .register_metric::<U64Gauge>(
                    "memory_chunks",
                    "The total number of chunks in memory.",
                )
                .recorder(&[]),
            flush_reasons: registry.register_metric(
                "flush_reasons",
                "Total number of series scheduled for flushing, with reasons.",
            ),
            dropped_chunks: registry
                .register_metric::<U64Counter>(
                    "dropped_chunks_total",
                    "Total number of chunks dropped from flushing because they have too few samples.",
                )
                .recorder(&[]),
            oldest_unflushed_chunk_timestamp: registry
                .register_metric::<U64Gauge>(
                    "oldest_unflushed_chunk_timestamp_seconds",
                    "Unix timestamp of the oldest unflushed chunk in the memory.",
                )
                .recorder(&[]),
        }
    }
}
