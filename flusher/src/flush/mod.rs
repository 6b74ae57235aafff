//! The flush engine: policy, shard queues, sweeper, workers, and the
//! retention reaper.

pub(crate) mod metrics;
pub mod policy;
pub(crate) mod queue;

pub use policy::FlushReason;

use crate::chunk::{ChunkDesc, Fingerprint};
use crate::limits::Limits;
use crate::series::{Labels, MemorySeries};
use crate::state::{UserState, UserStates};
use crate::store::{ChunkStore, StoreError, WireChunk};
use clock::{Time, TimeProvider};
use metrics::FlushMetrics;
use parking_lot::Mutex;
use policy::FlushPolicy;
use queue::{FlushOp, FlushQueue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Backoff applied when re-queueing a failed shutdown flush. Counts for
/// queue position only, not wall-clock time.
const FLUSH_BACKOFF: Duration = Duration::from_secs(1);

/// Tunables of the flush engine.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Number of shard queues, and of the workers draining them.
    pub concurrent_flushes: usize,
    /// How often the sweeper re-evaluates every series.
    pub flush_check_period: Duration,
    /// Deadline for a single store put.
    pub flush_op_timeout: Duration,
    /// Sample-time span above which a chunk is flushed as `Aged`.
    pub max_chunk_age: Duration,
    /// Upper bound of the deterministic per-series reduction of
    /// `max_chunk_age` that spreads age-based flushes. Zero disables.
    pub chunk_age_jitter: Duration,
    /// Wall-clock idle span above which a chunk is flushed as `Idle`.
    pub max_chunk_idle: Duration,
    /// Idle span for series whose last sample is a staleness marker.
    /// `None` disables the early flush of stale series.
    pub max_stale_chunk_idle: Option<Duration>,
    /// How long flushed chunks stay in memory for readers.
    pub retain_period: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            concurrent_flushes: 50,
            flush_check_period: Duration::from_secs(60),
            flush_op_timeout: Duration::from_secs(60),
            max_chunk_age: Duration::from_secs(12 * 3600),
            chunk_age_jitter: Duration::from_secs(20 * 60),
            max_chunk_idle: Duration::from_secs(5 * 60),
            max_stale_chunk_idle: None,
            retain_period: Duration::from_secs(5 * 60),
        }
    }
}

/// Errors from one flush attempt.
///
/// Nothing is marked flushed when these occur, so the op stays eligible for
/// re-scheduling by the next sweep.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Encode(#[from] crate::chunk::EncodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The flush engine.
///
/// Owns one [`FlushQueue`] per worker; a series' fingerprint pins it to
/// queue `fp % n`, so at most one worker ever flushes a given series and
/// there is at most one in-flight put per `(user, fingerprint)`.
///
/// Construct with [`Flusher::new`], then call [`Flusher::start`] to spawn
/// the workers and the periodic sweeper. [`Flusher::shutdown`] flushes
/// everything and stops both.
pub struct Flusher {
    config: FlushConfig,
    policy: FlushPolicy,
    user_states: Arc<UserStates>,
    limits: Arc<dyn Limits>,
    store: Arc<dyn ChunkStore>,
    time_provider: Arc<dyn TimeProvider>,
    queues: Vec<FlushQueue>,
    pub(crate) metrics: FlushMetrics,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pre_flush_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl std::fmt::Debug for Flusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flusher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Flusher {
    /// Builds a flush engine over `user_states`, writing to `store`.
    ///
    /// No tasks run until [`Flusher::start`] is called.
    ///
    /// # Panics
    ///
    /// Panics if `config.concurrent_flushes` is zero.
    pub fn new(
        config: FlushConfig,
        user_states: Arc<UserStates>,
        limits: Arc<dyn Limits>,
        store: Arc<dyn ChunkStore>,
        time_provider: Arc<dyn TimeProvider>,
        registry: &metric::Registry,
    ) -> Arc<Self> {
        assert!(
            config.concurrent_flushes > 0,
            "concurrent_flushes must be non-zero"
        );

        let queues = (0..config.concurrent_flushes)
            .map(|_| FlushQueue::new())
            .collect();

        Arc::new(Self {
            policy: FlushPolicy::new(config.clone(), Arc::clone(&time_provider)),
            config,
            user_states,
            limits,
            store,
            time_provider,
            queues,
            metrics: FlushMetrics::new(registry),
            workers: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
            cancel: CancellationToken::new(),
            pre_flush_hook: Mutex::new(None),
        })
    }

    /// Spawns the flush workers and the periodic sweeper. Must be called
    /// from within a tokio runtime, at most once.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        assert!(workers.is_empty(), "flush engine already started");

        for index in 0..self.config.concurrent_flushes {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.flush_loop(index).await }));
        }

        let this = Arc::clone(self);
        *self.sweeper.lock() = Some(tokio::spawn(async move { this.sweep_loop().await }));

        info!(
            concurrent_flushes = self.config.concurrent_flushes,
            flush_check_period = ?self.config.flush_check_period,
            "started flush engine"
        );
    }

    /// Flushes every series and stops the engine: cancels the sweeper, runs
    /// a final immediate sweep, then drains and closes the queues.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(error) = sweeper.await {
                error!(%error, "sweeper task panicked");
            }
        }
        self.flush().await;
    }

    /// Schedules every series for an immediate flush, closes the shard
    /// queues, and waits for the workers to drain them.
    pub async fn flush(&self) {
        info!("starting to flush all the chunks");
        self.sweep_users(true);
        info!("flushing of chunks complete");

        // Close the flush queues, to unblock waiting workers.
        for queue in &self.queues {
            queue.close();
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(error) = worker.await {
                error!(%error, "flush worker panicked");
            }
        }
    }

    async fn sweep_loop(&self) {
        let mut interval = tokio::time::interval(self.config.flush_check_period);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_users(false),
                _ = self.cancel.cancelled() => {
                    info!("sweeper shutdown");
                    return;
                }
            }
        }
    }

    /// One pass over every tenant and series: schedules eligible series for
    /// flushing, evicts chunks past their retention, garbage-collects
    /// tenants with no series left, and refreshes the oldest-unflushed
    /// gauge.
    pub fn sweep_users(&self, immediate: bool) {
        let mut oldest: Option<Time> = None;

        for (user_id, state) in self.user_states.cp() {
            for (fp, series) in state.series() {
                let first = {
                    let mut series = series.lock();
                    self.sweep_series(&user_id, fp, &series, immediate);
                    self.remove_flushed_chunks(&state, fp, &mut series);
                    series.first_unflushed_chunk_time()
                };
                if let Some(first) = first {
                    oldest = Some(match oldest {
                        Some(oldest) if oldest <= first => oldest,
                        _ => first,
                    });
                }
            }
            if state.is_empty() {
                self.user_states.remove_if_empty(&user_id);
            }
        }

        self.metrics
            .oldest_unflushed_chunk_timestamp
            .set(oldest.map_or(0, |t| t.timestamp().max(0) as u64));
    }

    /// Enqueues `series` on its shard if the policy says so.
    ///
    /// The head chunk is NOT closed here: the op may sit in its queue for a
    /// while, and every sample appended in the meantime makes the chunk
    /// fuller.
    fn sweep_series(
        &self,
        user_id: &Arc<str>,
        fp: Fingerprint,
        series: &MemorySeries,
        immediate: bool,
    ) {
        let Some(first_time) = series.first_time() else {
            return;
        };

        let reason = self.policy.should_flush_series(series, fp, immediate);
        if reason == FlushReason::NoFlush {
            return;
        }

        let index = self.queue_index(fp);
        let enqueued = self.queues[index].enqueue(FlushOp {
            from: first_time,
            user_id: Arc::clone(user_id),
            fp,
            immediate,
        });
        if enqueued {
            self.metrics
                .flush_reasons
                .recorder(&[("reason", reason.as_str())])
                .inc(1);
            debug!(
                user_id = %user_id,
                %reason,
                first_time = %first_time,
                %fp,
                series = %series.labels(),
                queue = index,
                "add to flush queue"
            );
        }
    }

    /// The shard a fingerprint is pinned to.
    fn queue_index(&self, fp: Fingerprint) -> usize {
        (fp.0 % self.config.concurrent_flushes as u64) as usize
    }

    /// Evicts chunks that have been flushed and retained long enough, then
    /// removes the series entirely if nothing is left. Caller holds the
    /// series guard.
    fn remove_flushed_chunks(
        &self,
        state: &UserState,
        fp: Fingerprint,
        series: &mut MemorySeries,
    ) {
        let now = self.time_provider.now();
        loop {
            let evict = series.chunk_descs().front().is_some_and(|first| {
                first.flushed
                    && now
                        .checked_duration_since(first.last_update)
                        .is_some_and(|held| held > self.config.retain_period)
            });
            if !evict {
                break;
            }
            series.pop_front_chunk();
            self.metrics.memory_chunks.dec(1);
        }

        if series.chunk_descs().is_empty() {
            state.remove_series(fp, series.labels());
        }
    }

    /// Worker loop for shard `index`; exits when its queue closes.
    async fn flush_loop(&self, index: usize) {
        while let Some(op) = self.queues[index].dequeue().await {
            if let Err(error) = self.flush_user_series(index, &op).await {
                error!(user_id = %op.user_id, fp = %op.fp, %error, "failed to flush user series");

                // On the shutdown path a failed op goes back in the queue,
                // ordered after fresher work.
                if op.immediate {
                    let mut retry = op;
                    retry.from = retry.from + FLUSH_BACKOFF;
                    self.queues[index].enqueue(retry);
                }
            }
        }
        debug!(queue = index, "flush loop exited");
    }

    /// Flushes one series: re-checks the policy, selects the chunk range,
    /// ships it to the store, and marks the shipped chunks flushed.
    async fn flush_user_series(&self, queue_index: usize, op: &FlushOp) -> Result<(), FlushError> {
        if let Some(hook) = self.pre_flush_hook.lock().as_ref() {
            hook();
        }

        // Tenant or series gone: the op is stale, nothing to do.
        let Some(state) = self.user_states.get(&op.user_id) else {
            return Ok(());
        };
        let Some(series) = state.get(op.fp) else {
            return Ok(());
        };

        let (reason, labels, to_flush) = {
            let mut series = series.lock();

            // Re-check under the guard: the series may have been appended
            // to, flushed, or reaped while the op sat in its queue.
            let reason = self.policy.should_flush_series(&series, op.fp, op.immediate);
            if reason == FlushReason::NoFlush {
                return Ok(());
            }

            // The policy guarantees at least one chunk. Decide the head's
            // fate: ship it closed, or step back by one and keep filling it.
            let mut count = series.num_chunks();
            if op.immediate {
                series.close_head(FlushReason::Immediate);
            } else {
                let head = series.head().expect("series has chunks");
                let head_reason = self.policy.should_flush_chunk(head, op.fp, series.is_stale());
                if head_reason != FlushReason::NoFlush {
                    series.close_head(head_reason);
                } else {
                    count -= 1;
                }
            }

            // Sparsely written series produce many tiny chunks; dropping
            // them on idle/stale saves the store writes.
            if matches!(reason, FlushReason::Idle | FlushReason::Stale) && series.head_closed() {
                let min_chunk_length = self.limits.min_chunk_length(&op.user_id);
                if min_chunk_length > 0 {
                    let chunk_length: usize = series
                        .chunk_descs()
                        .iter()
                        .take(count)
                        .map(|c| c.payload.len())
                        .sum();
                    if chunk_length < min_chunk_length {
                        state.remove_series(op.fp, series.labels());
                        self.metrics.memory_chunks.dec(count as u64);
                        self.metrics.dropped_chunks.inc(count as u64);
                        debug!(
                            user_id = %op.user_id,
                            num_chunks = count,
                            chunk_length,
                            fp = %op.fp,
                            series = %series.labels(),
                            queue = queue_index,
                            "dropped chunks"
                        );
                        return Ok(());
                    }
                }
            }

            if count == 0 {
                return Ok(());
            }

            // Snapshot what ships; the guard is not held over the store rpc.
            let to_flush: Vec<ChunkDesc> =
                series.chunk_descs().iter().take(count).cloned().collect();
            (reason, series.labels().clone(), to_flush)
        };

        debug!(
            user_id = %op.user_id,
            %reason,
            num_chunks = to_flush.len(),
            first_time = %to_flush[0].first_time,
            fp = %op.fp,
            series = %labels,
            queue = queue_index,
            "flush chunks"
        );

        let num_chunks = to_flush.len();
        self.flush_chunks(&op.user_id, op.fp, &labels, &to_flush)
            .instrument(info_span!("flush_user_series", user_id = %op.user_id))
            .await?;

        let mut series = series.lock();
        if op.immediate {
            state.remove_series(op.fp, series.labels());
            self.metrics.memory_chunks.dec(num_chunks as u64);
        } else {
            // Mark the chunks flushed so the reaper can evict them once the
            // retain period passes.
            series.mark_flushed(num_chunks, self.time_provider.now());
        }
        Ok(())
    }

    /// Encodes `descs` and ships them in one store put. Statistics are
    /// recorded only when the put succeeded.
    async fn flush_chunks(
        &self,
        user_id: &Arc<str>,
        fp: Fingerprint,
        labels: &Labels,
        descs: &[ChunkDesc],
    ) -> Result<(), FlushError> {
        let mut wire_chunks = Vec::with_capacity(descs.len());
        for desc in descs {
            wire_chunks.push(WireChunk {
                user_id: Arc::clone(user_id),
                fingerprint: fp,
                labels: labels.clone(),
                data: desc.payload.encode()?,
                first_time: desc.first_time,
                last_time: desc.last_time,
            });
        }

        match tokio::time::timeout(self.config.flush_op_timeout, self.store.put(wire_chunks)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout.into()),
        }

        let stored = self
            .metrics
            .chunks_stored
            .recorder([("user", user_id.to_string())]);
        let stored_bytes = self
            .metrics
            .chunk_stored_bytes
            .recorder([("user", user_id.to_string())]);
        let now = self.time_provider.now();
        for desc in descs {
            let utilization = desc.payload.utilization();
            let length = desc.payload.len();
            let size = desc.payload.size();
            debug!(
                user_id = %user_id,
                %fp,
                series = %labels,
                utilization,
                length,
                size,
                first_time = %desc.first_time,
                last_time = %desc.last_time,
                "chunk flushed"
            );
            self.metrics.chunk_utilization.record(utilization);
            self.metrics.chunk_length.record(length as u64);
            self.metrics.chunk_size.record(size as u64);
            stored.inc(1);
            stored_bytes.inc(size as u64);
            self.metrics.chunk_age.record(
                now.checked_duration_since(desc.first_time)
                    .unwrap_or_default(),
            );
        }

        Ok(())
    }

    /// Installs a hook invoked at the top of every flush attempt.
    #[cfg(test)]
    pub(crate) fn set_pre_flush_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.pre_flush_hook.lock() = Some(hook);
    }

    /// Number of ops queued on shard `index`.
    #[cfg(test)]
    pub(crate) fn queue_len(&self, index: usize) -> usize {
        self.queues[index].len()
    }
}
