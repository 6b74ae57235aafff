//! Bounded waiting for futures in tests.

use std::future::Future;
use std::time::Duration;

/// Extension trait adding deadline helpers to any [`Future`].
pub trait FutureTimeout: Future + Sized {
    /// Wraps `self`, yielding `Err(Elapsed)` if it does not complete within
    /// `duration`.
    fn with_timeout(self, duration: Duration) -> tokio::time::Timeout<Self> {
        tokio::time::timeout(duration, self)
    }

    /// As [`FutureTimeout::with_timeout`] but panics on timeout, for tests
    /// that would otherwise hang forever on a bug.
    fn with_timeout_panic(self, duration: Duration) -> impl Future<Output = Self::Output> {
        async move {
            self.with_timeout(duration)
                .await
                .expect("future timed out")
        }
    }
}

impl<F: Future + Sized> FutureTimeout for F {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeout_elapses() {
        let pending = std::future::pending::<()>();
        pending
            .with_timeout(Duration::from_millis(10))
            .await
            .expect_err("should have timed out");
    }

    #[tokio::test]
    async fn timeout_passes_output_through() {
        let value = async { 42 }
            .with_timeout(Duration::from_secs(1))
            .await
            .expect("should complete");
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "future timed out")]
    async fn timeout_panic_panics() {
        std::future::pending::<()>()
            .with_timeout_panic(Duration::from_millis(10))
            .await;
    }
}
