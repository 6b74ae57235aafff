//! Per-shard flush queues: priority-ordered, de-duplicating, closable.

use crate::chunk::Fingerprint;
use clock::Time;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

/// A request to flush one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FlushOp {
    /// Start time of the series' oldest chunk at enqueue time. Earlier means
    /// higher priority; shutdown retries push it forward as a backoff.
    pub(crate) from: Time,
    pub(crate) user_id: Arc<str>,
    pub(crate) fp: Fingerprint,
    pub(crate) immediate: bool,
}

impl FlushOp {
    fn key(&self) -> FlushKey {
        FlushKey {
            user_id: Arc::clone(&self.user_id),
            fp: self.fp,
            immediate: self.immediate,
        }
    }
}

/// Identity of a queued op, for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlushKey {
    user_id: Arc<str>,
    fp: Fingerprint,
    immediate: bool,
}

/// Heap entry: earliest `from` first, arrival order among equals.
#[derive(Debug)]
struct QueuedOp {
    op: FlushOp,
    seq: u64,
}

impl Ord for QueuedOp {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest `from`, then the
        // earliest arrival.
        other
            .op
            .from
            .cmp(&self.op.from)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedOp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedOp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedOp {}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedOp>,
    queued: HashSet<FlushKey>,
    next_seq: u64,
    closed: bool,
}

/// One shard of the flush schedule.
///
/// Ops de-duplicate on `(user, fingerprint, immediate)` while queued, so a
/// sweep cannot pile up work for a series a worker is already behind on.
/// Delivery is earliest-`from` first so the oldest in-memory data leaves
/// first, FIFO among equal `from` values. Safe for any number of concurrent
/// producers and consumers.
#[derive(Debug, Default)]
pub(crate) struct FlushQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl FlushQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts `op` unless an op with the same key is already queued or the
    /// queue is closed. Returns whether the op was inserted.
    pub(crate) fn enqueue(&self, op: FlushOp) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if !state.queued.insert(op.key()) {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueuedOp { op, seq });
        }
        self.notify.notify_waiters();
        true
    }

    /// The highest-priority op, waiting while the queue is empty. Returns
    /// `None` once the queue is closed and drained.
    pub(crate) async fn dequeue(&self) -> Option<FlushOp> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for a wake-up before checking state, so an enqueue or
            // close between the check and the await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(queued) = state.heap.pop() {
                    state.queued.remove(&queued.op.key());
                    return Some(queued.op);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue, waking every blocked consumer. Already-queued ops
    /// remain dequeueable; new ones are refused.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Number of ops currently queued.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_helpers::timeout::FutureTimeout;

    fn op(from_millis: i64, user_id: &str, fp: u64) -> FlushOp {
        FlushOp {
            from: Time::from_timestamp_millis(from_millis),
            user_id: Arc::from(user_id),
            fp: Fingerprint(fp),
            immediate: false,
        }
    }

    #[tokio::test]
    async fn delivers_oldest_first() {
        let queue = FlushQueue::new();
        assert!(queue.enqueue(op(3_000, "a", 1)));
        assert!(queue.enqueue(op(1_000, "a", 2)));
        assert!(queue.enqueue(op(2_000, "a", 3)));

        assert_eq!(queue.dequeue().await.unwrap().fp, Fingerprint(2));
        assert_eq!(queue.dequeue().await.unwrap().fp, Fingerprint(3));
        assert_eq!(queue.dequeue().await.unwrap().fp, Fingerprint(1));
    }

    #[tokio::test]
    async fn fifo_among_equal_priorities() {
        let queue = FlushQueue::new();
        for fp in 0..8 {
            assert!(queue.enqueue(op(1_000, "a", fp)));
        }
        for fp in 0..8 {
            assert_eq!(queue.dequeue().await.unwrap().fp, Fingerprint(fp));
        }
    }

    #[tokio::test]
    async fn duplicate_keys_are_refused_while_queued() {
        let queue = FlushQueue::new();
        assert!(queue.enqueue(op(1_000, "a", 1)));
        // Same key, even with a different priority.
        assert!(!queue.enqueue(op(9_000, "a", 1)));
        assert_eq!(queue.len(), 1);

        // Different fingerprint, user, or immediate flag: different key.
        assert!(queue.enqueue(op(1_000, "a", 2)));
        assert!(queue.enqueue(op(1_000, "b", 1)));
        let mut immediate = op(1_000, "a", 1);
        immediate.immediate = true;
        assert!(queue.enqueue(immediate));
        assert_eq!(queue.len(), 4);

        // Dequeueing releases the key for re-use.
        let first = queue.dequeue().await.unwrap();
        assert_eq!((first.fp, first.immediate), (Fingerprint(1), false));
        assert!(queue.enqueue(op(1_000, "a", 1)));
    }

    #[tokio::test]
    async fn dequeue_blocks_until_enqueue() {
        let queue = Arc::new(FlushQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        // Give the consumer a chance to block.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        assert!(queue.enqueue(op(1_000, "a", 1)));
        let received = consumer
            .with_timeout(Duration::from_secs(5))
            .await
            .expect("consumer should wake on enqueue")
            .unwrap();
        assert_eq!(received.unwrap().fp, Fingerprint(1));
    }

    #[tokio::test]
    async fn close_wakes_consumers_and_drains() {
        let queue = Arc::new(FlushQueue::new());
        assert!(queue.enqueue(op(1_000, "a", 1)));
        queue.close();

        // Still drains what was queued before the close.
        assert_eq!(queue.dequeue().await.unwrap().fp, Fingerprint(1));
        // Then reports closed.
        assert_eq!(queue.dequeue().await, None);

        // New work is refused after close.
        assert!(!queue.enqueue(op(1_000, "a", 2)));

        // A consumer blocked at close time wakes up with `None`.
        let open = Arc::new(FlushQueue::new());
        let consumer = {
            let open = Arc::clone(&open);
            tokio::spawn(async move { open.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        open.close();
        let received = consumer
            .with_timeout(Duration::from_secs(5))
            .await
            .expect("consumer should wake on close")
            .unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn concurrent_producers_and_consumers() {
        let queue = Arc::new(FlushQueue::new());

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(op) = queue.dequeue().await {
                        got.push(op.fp);
                    }
                    got
                })
            })
            .collect();

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for i in 0..100u64 {
                        queue.enqueue(op(i as i64, "a", p * 100 + i));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }
        // Wait for the queue to drain before closing so no op is lost.
        while queue.len() > 0 {
            tokio::task::yield_now().await;
        }
        queue.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(
                consumer
                    .with_timeout(Duration::from_secs(5))
                    .await
                    .expect("consumers should finish after close")
                    .unwrap(),
            );
        }
        all.sort_unstable();
        let want: Vec<_> = (0..400).map(Fingerprint).collect();
        assert_eq!(all, want);
    }
}
