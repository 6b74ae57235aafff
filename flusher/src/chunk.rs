//! Chunk descriptors and the opaque encoded payload they carry.

use crate::flush::FlushReason;
use bytes::Bytes;
use clock::Time;
use std::sync::Arc;
use thiserror::Error;

/// Identifies a series within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The payload could not be serialized for the store.
#[derive(Debug, Error)]
#[error("chunk encoding failed: {0}")]
pub struct EncodeError(pub String);

/// The encoded sample block of one chunk.
///
/// Chunk encoding is owned by the write path; the flush engine only inspects
/// sizes and asks for the wire form.
pub trait ChunkPayload: std::fmt::Debug + Send + Sync {
    /// Number of samples in the chunk.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In-memory size in bytes.
    fn size(&self) -> usize;

    /// Fraction of the chunk's capacity in use, in `0.0..=1.0`.
    fn utilization(&self) -> f64;

    /// Serializes the payload for the store.
    fn encode(&self) -> Result<Bytes, EncodeError>;
}

/// One in-memory chunk of a series.
///
/// Mutated only under the owning series' guard.
#[derive(Debug, Clone)]
pub struct ChunkDesc {
    pub payload: Arc<dyn ChunkPayload>,
    /// Timestamp of the first sample.
    pub first_time: Time,
    /// Timestamp of the last sample.
    pub last_time: Time,
    /// Wall-clock time of the last append, or of the flush once flushed.
    pub last_update: Time,
    /// Whether the store has durably accepted this chunk.
    pub flushed: bool,
    /// The reason the head was closed, stamped by
    /// [`MemorySeries::close_head`](crate::series::MemorySeries::close_head).
    pub flush_reason: FlushReason,
}

impl ChunkDesc {
    pub fn new(
        payload: Arc<dyn ChunkPayload>,
        first_time: Time,
        last_time: Time,
        last_update: Time,
    ) -> Self {
        Self {
            payload,
            first_time,
            last_time,
            last_update,
            flushed: false,
            flush_reason: FlushReason::NoFlush,
        }
    }
}
