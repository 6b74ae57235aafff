//! Builders shared by the test modules.

use crate::chunk::{ChunkDesc, ChunkPayload, EncodeError};
use crate::series::Labels;
use bytes::Bytes;
use clock::Time;
use std::sync::Arc;

/// A [`ChunkPayload`] with scripted properties.
#[derive(Debug, Clone)]
pub(crate) struct TestPayload {
    pub(crate) samples: usize,
    pub(crate) bytes: usize,
    pub(crate) utilization: f64,
    pub(crate) fail_encode: bool,
}

impl Default for TestPayload {
    fn default() -> Self {
        Self {
            samples: 120,
            bytes: 1024,
            utilization: 0.6,
            fail_encode: false,
        }
    }
}

impl ChunkPayload for TestPayload {
    fn len(&self) -> usize {
        self.samples
    }

    fn size(&self) -> usize {
        self.bytes
    }

    fn utilization(&self) -> f64 {
        self.utilization
    }

    fn encode(&self) -> Result<Bytes, EncodeError> {
        if self.fail_encode {
            return Err(EncodeError("scripted failure".into()));
        }
        Ok(Bytes::from(vec![0xc4; self.bytes.min(16)]))
    }
}

/// A label set carrying only a metric name.
pub(crate) fn labels(name: &str) -> Labels {
    [("__name__".to_string(), name.to_string())]
        .into_iter()
        .collect()
}

/// An unflushed chunk with default payload and the given times, all in
/// milliseconds since the epoch.
pub(crate) fn chunk(first_millis: i64, last_millis: i64, update_millis: i64) -> ChunkDesc {
    chunk_with_payload(
        TestPayload::default(),
        first_millis,
        last_millis,
        update_millis,
    )
}

pub(crate) fn chunk_with_payload(
    payload: TestPayload,
    first_millis: i64,
    last_millis: i64,
    update_millis: i64,
) -> ChunkDesc {
    ChunkDesc::new(
        Arc::new(payload),
        Time::from_timestamp_millis(first_millis),
        Time::from_timestamp_millis(last_millis),
        Time::from_timestamp_millis(update_millis),
    )
}
