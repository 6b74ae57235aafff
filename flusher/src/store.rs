//! The durable chunk store boundary.

use crate::chunk::Fingerprint;
use crate::series::Labels;
use async_trait::async_trait;
use bytes::Bytes;
use clock::Time;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a [`ChunkStore`] put.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The put did not complete within the configured deadline.
    #[error("chunk store put timed out")]
    Timeout,

    /// The store rejected or failed the request.
    #[error("chunk store: {0}")]
    Request(String),
}

/// A fully encoded chunk ready for the store.
#[derive(Debug, Clone)]
pub struct WireChunk {
    pub user_id: Arc<str>,
    pub fingerprint: Fingerprint,
    pub labels: Labels,
    pub data: Bytes,
    pub first_time: Time,
    pub last_time: Time,
}

/// Durable chunk storage.
///
/// Implementations must apply a batch all-or-nothing and be idempotent on
/// `(user_id, fingerprint, first_time, last_time)`: the flush engine delivers
/// at-least-once and retries whole batches after failures.
#[async_trait]
pub trait ChunkStore: std::fmt::Debug + Send + Sync {
    async fn put(&self, chunks: Vec<WireChunk>) -> Result<(), StoreError>;
}

pub mod mock {
    //! An in-memory [`ChunkStore`] recording every put, with injectable
    //! failures.

    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct State {
        chunks: Vec<WireChunk>,
        puts: usize,
        fail_next: usize,
    }

    #[derive(Debug, Default)]
    pub struct MockChunkStore {
        state: Mutex<State>,
    }

    impl MockChunkStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every chunk accepted so far, in arrival order.
        pub fn chunks(&self) -> Vec<WireChunk> {
            self.state.lock().chunks.clone()
        }

        /// Number of put calls observed, including failed ones.
        pub fn put_count(&self) -> usize {
            self.state.lock().puts
        }

        /// Makes the next `n` puts fail with [`StoreError::Request`].
        pub fn fail_next_puts(&self, n: usize) {
            self.state.lock().fail_next = n;
        }
    }

    #[async_trait]
    impl ChunkStore for MockChunkStore {
        async fn put(&self, chunks: Vec<WireChunk>) -> Result<(), StoreError> {
            let mut state = self.state.lock();
            state.puts += 1;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(StoreError::Request("injected failure".into()));
            }
            state.chunks.extend(chunks);
            Ok(())
        }
    }
}
