//! HTTP trigger for operator-initiated flushes.

use crate::flush::Flusher;
use hyper::{Body, Request, Response, StatusCode};
use tracing::info;

/// Handles a flush-all request: schedules every series for an immediate
/// flush and replies `204 No Content` regardless of per-series outcomes.
///
/// Routing is left to the embedding server; mount this wherever suits,
/// typically `POST /flush`. Mainly used for local testing.
pub async fn flush_handler(flusher: &Flusher, _request: Request<Body>) -> Response<Body> {
    info!("starting to flush all the chunks");
    flusher.sweep_users(true);
    info!("flushing of chunks complete");

    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("building an empty response never fails")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Fingerprint;
    use crate::flush::FlushConfig;
    use crate::limits::FixedLimits;
    use crate::series::MemorySeries;
    use crate::state::UserStates;
    use crate::store::mock::MockChunkStore;
    use crate::test_util::{chunk, labels};
    use clock::{MockProvider, Time};
    use std::sync::Arc;

    #[tokio::test]
    async fn replies_no_content_and_schedules_everything() {
        let user_states = Arc::new(UserStates::new());
        let state = user_states.get_or_create("tenant-a");
        let mut series = MemorySeries::new(labels("requests"));
        series.push_chunk(chunk(0, 1_000, 1_000));
        state.insert(Fingerprint(1), series);

        let flusher = Flusher::new(
            FlushConfig {
                concurrent_flushes: 1,
                ..Default::default()
            },
            Arc::clone(&user_states),
            Arc::new(FixedLimits::default()),
            Arc::new(MockChunkStore::new()),
            Arc::new(MockProvider::new(Time::from_timestamp_millis(2_000))),
            &metric::Registry::new(),
        );

        // The engine is deliberately not started: the handler only sweeps.
        let response = flush_handler(&flusher, Request::new(Body::empty())).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(flusher.queue_len(0), 1);
    }
}
