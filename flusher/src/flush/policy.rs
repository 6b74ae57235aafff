//! Pure flush decisions: when does a series or chunk need to go?

use crate::chunk::{ChunkDesc, Fingerprint};
use crate::flush::FlushConfig;
use crate::series::MemorySeries;
use clock::TimeProvider;
use std::sync::Arc;
use std::time::Duration;

/// Why a series or chunk was (or was not) scheduled for flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    NoFlush,
    Immediate,
    MultipleChunksInSeries,
    Aged,
    Idle,
    Stale,
    /// Stamped by the write path when it pre-closes a head chunk to spread
    /// flush load; never produced by the policy itself.
    Spread,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFlush => "NoFlush",
            Self::Immediate => "Immediate",
            Self::MultipleChunksInSeries => "MultipleChunksInSeries",
            Self::Aged => "Aged",
            Self::Idle => "Idle",
            Self::Stale => "Stale",
            Self::Spread => "Spread",
        }
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision rules, shared by the sweeper and the flush workers.
///
/// Pure: reads only the series/chunk handed in and the clock, so the workers
/// can re-evaluate an op whose series changed while it sat in the queue.
#[derive(Debug, Clone)]
pub(crate) struct FlushPolicy {
    config: FlushConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl FlushPolicy {
    pub(crate) fn new(config: FlushConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
        }
    }

    /// Decides whether `series` should be scheduled for flushing.
    pub(crate) fn should_flush_series(
        &self,
        series: &MemorySeries,
        fp: Fingerprint,
        immediate: bool,
    ) -> FlushReason {
        let Some(first) = series.chunk_descs().front() else {
            return FlushReason::NoFlush;
        };
        if immediate {
            return FlushReason::Immediate;
        }

        // More than one chunk with the oldest still unflushed: flush, carrying
        // the reason recorded when that chunk's head was closed if there is
        // one.
        if series.num_chunks() > 1 && !first.flushed {
            if first.flush_reason != FlushReason::NoFlush {
                return first.flush_reason;
            }
            return FlushReason::MultipleChunksInSeries;
        }

        // Otherwise look at the first chunk in detail.
        self.should_flush_chunk(first, fp, series.is_stale())
    }

    /// Decides whether a single chunk should be flushed.
    pub(crate) fn should_flush_chunk(
        &self,
        chunk: &ChunkDesc,
        fp: Fingerprint,
        last_value_is_stale: bool,
    ) -> FlushReason {
        if chunk.flushed {
            return FlushReason::NoFlush;
        }

        // Deterministic per-series reduction of the age limit, spreading
        // age-based flushes over time.
        let jitter = if self.config.chunk_age_jitter > Duration::ZERO {
            Duration::from_nanos(fp.0 % self.config.chunk_age_jitter.as_nanos() as u64)
        } else {
            Duration::ZERO
        };
        let span = chunk
            .last_time
            .checked_duration_since(chunk.first_time)
            .unwrap_or_default();
        if span > self.config.max_chunk_age.saturating_sub(jitter) {
            return FlushReason::Aged;
        }

        let idle = self
            .time_provider
            .now()
            .checked_duration_since(chunk.last_update)
            .unwrap_or_default();
        if idle > self.config.max_chunk_idle {
            return FlushReason::Idle;
        }

        if let Some(max_stale_idle) = self.config.max_stale_chunk_idle {
            if last_value_is_stale && idle > max_stale_idle {
                return FlushReason::Stale;
            }
        }

        FlushReason::NoFlush
    }
}
