//! Per-stream record queues.
//!
//! Each stream gets one unbounded multi-producer/single-consumer FIFO.
//! Producers never block; the consuming worker blocks in [`take`] until an
//! item arrives. A distinguished [`QueueItem::Close`] sentinel is the only
//! legitimate exit condition for a worker's loop — an empty queue simply
//! blocks.
//!
//! Invariant: once the sentinel is enqueued, no further records are
//! accepted. Both operations go through one mutex so the invariant holds
//! under any producer interleaving.
//!
//! Every dequeued item (sentinel included) is acknowledged via
//! [`QueueConsumer::task_done`], so [`RecordQueue::pending`] can answer
//! "has everything handed over been handled" regardless of delivery
//! outcome.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::Record;

/// An entry in a record queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// A record awaiting delivery.
    Record(Record),

    /// No more records will be enqueued; the consumer should exit.
    Close,
}

/// Error returned when enqueueing onto a queue that has been closed or
/// whose consumer is gone.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("record queue is closed")]
pub struct QueueClosed;

struct QueueShared {
    /// Items handed to the consumer but not yet acknowledged, plus items
    /// still sitting in the channel.
    outstanding: AtomicUsize,
}

/// Producer-side state guarded by one lock so "closed" and "send" cannot
/// interleave badly.
struct Producer {
    tx: mpsc::UnboundedSender<QueueItem>,
    closed: bool,
}

/// Producer handle for one stream's queue. Cheap to clone; the ingestion
/// gateway and the engine each hold one.
#[derive(Clone)]
pub struct RecordQueue {
    producer: Arc<Mutex<Producer>>,
    shared: Arc<QueueShared>,
}

/// Consumer handle; owned exclusively by the stream's worker.
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    shared: Arc<QueueShared>,
}

/// Creates a connected producer/consumer pair.
pub fn channel() -> (RecordQueue, QueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(QueueShared {
        outstanding: AtomicUsize::new(0),
    });
    let queue = RecordQueue {
        producer: Arc::new(Mutex::new(Producer { tx, closed: false })),
        shared: shared.clone(),
    };
    let consumer = QueueConsumer { rx, shared };
    (queue, consumer)
}

impl RecordQueue {
    /// Enqueues a record without blocking.
    ///
    /// Fails if the close sentinel has already been enqueued or the
    /// consumer (worker) has exited and dropped its receiver.
    pub fn put(&self, record: Record) -> Result<(), QueueClosed> {
        let producer = self.producer.lock().expect("queue lock poisoned");
        if producer.closed {
            return Err(QueueClosed);
        }
        producer
            .tx
            .send(QueueItem::Record(record))
            .map_err(|_| QueueClosed)?;
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Enqueues the close sentinel. Idempotent; records are rejected from
    /// this point on.
    pub fn close_signal(&self) {
        let mut producer = self.producer.lock().expect("queue lock poisoned");
        if producer.closed {
            return;
        }
        producer.closed = true;
        if producer.tx.send(QueueItem::Close).is_ok() {
            self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// True while the consuming worker still holds its receiver.
    ///
    /// The ingestion gateway uses this to detect a dead worker and drop
    /// (with a report) instead of queueing behind it forever.
    pub fn is_alive(&self) -> bool {
        let producer = self.producer.lock().expect("queue lock poisoned");
        !producer.closed && !producer.tx.is_closed()
    }

    /// Number of enqueued items not yet acknowledged by the consumer.
    pub fn pending(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }
}

impl QueueConsumer {
    /// Waits for the next item.
    ///
    /// Blocks (asynchronously) while the queue is empty. If every producer
    /// handle has been dropped the channel can yield no more items, which
    /// is reported as [`QueueItem::Close`].
    pub async fn take(&mut self) -> QueueItem {
        self.rx.recv().await.unwrap_or(QueueItem::Close)
    }

    /// Acknowledges one previously taken item, success or not.
    pub fn task_done(&self) {
        // Saturating: a spurious extra call must not wrap the counter.
        let _ = self
            .shared
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;
    use proptest::prelude::*;

    // ─── Basic operations ───

    #[tokio::test]
    async fn items_come_out_in_insertion_order() {
        let (queue, mut consumer) = channel();

        queue.put(record(10)).unwrap();
        queue.put(record(20)).unwrap();
        queue.put(record(30)).unwrap();

        for expected in [10, 20, 30] {
            match consumer.take().await {
                QueueItem::Record(r) => assert_eq!(r.timestamp().as_secs(), expected),
                QueueItem::Close => panic!("unexpected close"),
            }
            consumer.task_done();
        }
    }

    #[tokio::test]
    async fn close_sentinel_arrives_after_earlier_records() {
        let (queue, mut consumer) = channel();

        queue.put(record(10)).unwrap();
        queue.close_signal();

        assert!(matches!(consumer.take().await, QueueItem::Record(_)));
        consumer.task_done();
        assert!(matches!(consumer.take().await, QueueItem::Close));
        consumer.task_done();
    }

    #[tokio::test]
    async fn put_after_close_is_rejected() {
        let (queue, _consumer) = channel();

        queue.close_signal();
        assert_eq!(queue.put(record(10)), Err(QueueClosed));
    }

    #[tokio::test]
    async fn close_signal_is_idempotent() {
        let (queue, mut consumer) = channel();

        queue.close_signal();
        queue.close_signal();

        assert!(matches!(consumer.take().await, QueueItem::Close));
        consumer.task_done();
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn dropped_consumer_makes_queue_dead() {
        let (queue, consumer) = channel();

        assert!(queue.is_alive());
        drop(consumer);
        assert!(!queue.is_alive());
        assert_eq!(queue.put(record(10)), Err(QueueClosed));
    }

    #[tokio::test]
    async fn take_on_abandoned_channel_reports_close() {
        let (queue, mut consumer) = channel();
        drop(queue);
        assert!(matches!(consumer.take().await, QueueItem::Close));
    }

    // ─── Drain tracking ───

    #[tokio::test]
    async fn pending_tracks_acknowledgements() {
        let (queue, mut consumer) = channel();

        queue.put(record(10)).unwrap();
        queue.put(record(20)).unwrap();
        assert_eq!(queue.pending(), 2);

        let _ = consumer.take().await;
        // Taken but not yet acknowledged.
        assert_eq!(queue.pending(), 2);
        consumer.task_done();
        assert_eq!(queue.pending(), 1);

        let _ = consumer.take().await;
        consumer.task_done();
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn extra_task_done_does_not_underflow() {
        let (queue, consumer) = channel();
        consumer.task_done();
        assert_eq!(queue.pending(), 0);
    }

    // ─── Property tests ───

    proptest! {
        /// FIFO order holds for arbitrary timestamp sequences and the
        /// sentinel always arrives last.
        #[test]
        fn prop_fifo_order_with_close(timestamps in prop::collection::vec(0i64..1_000_000, 0..50)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (queue, mut consumer) = channel();

                for ts in &timestamps {
                    queue.put(record(*ts)).unwrap();
                }
                queue.close_signal();

                for ts in &timestamps {
                    match consumer.take().await {
                        QueueItem::Record(r) => {
                            prop_assert_eq!(r.timestamp().as_secs(), *ts)
                        }
                        QueueItem::Close => prop_assert!(false, "close arrived early"),
                    }
                    consumer.task_done();
                }
                prop_assert!(matches!(consumer.take().await, QueueItem::Close));
                consumer.task_done();
                prop_assert_eq!(queue.pending(), 0);
                Ok(())
            })?;
        }
    }
}
