//! Host-facing ingestion gateway.
//!
//! The host calls [`IngestGateway::on_archive_record`] and
//! [`IngestGateway::on_loop_packet`] synchronously from its own event
//! dispatch thread as observations arrive. Both paths only mutate a queue
//! and log — never any network I/O — so the host is back in control
//! immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, error, trace};

use crate::queue::RecordQueue;
use crate::types::Record;

/// Sentinel for "no loop packet seen yet".
const NO_PACKET_SEEN: i64 = i64::MIN;

/// Cloneable handle through which the host feeds the engine.
///
/// A stream that was not configured simply discards its events.
#[derive(Clone)]
pub struct IngestGateway {
    archive: Option<RecordQueue>,
    raw: Option<RecordQueue>,

    /// `dateTime` of the last loop packet enqueued. The host re-emits a
    /// packet with the same timestamp right after archive processing
    /// pauses live sampling; sending it again would only draw a
    /// duplicate-key error from the remote.
    last_loop_timestamp: Arc<AtomicI64>,
}

impl IngestGateway {
    pub(crate) fn new(archive: Option<RecordQueue>, raw: Option<RecordQueue>) -> Self {
        IngestGateway {
            archive,
            raw,
            last_loop_timestamp: Arc::new(AtomicI64::new(NO_PACKET_SEEN)),
        }
    }

    /// Handles a new archive record from the host.
    ///
    /// Enqueues the record for the archive worker if the worker is still
    /// running; otherwise drops it with an error report. Queueing behind a
    /// dead worker would only grow memory without bound, and the archive
    /// data remains in the local store for the next backfill.
    pub fn on_archive_record(&self, record: Record) {
        let Some(queue) = &self.archive else {
            trace!("archive sync not configured, ignoring archive record");
            return;
        };

        let ts = record.timestamp();
        match queue.put(record) {
            Ok(()) => {
                debug!(timestamp = %ts, "queued archive record");
            }
            Err(_) => {
                error!(
                    timestamp = %ts,
                    when = %ts.to_rfc3339(),
                    "not syncing archive record due to previous error: archive sync worker is not running"
                );
            }
        }
    }

    /// Handles a new loop packet from the host.
    ///
    /// Packets repeating the previous packet's `dateTime` are dropped
    /// (deduplication, not reordering — the queue stays FIFO by arrival).
    /// Failures to enqueue are silent beyond trace level: loop packets
    /// arrive every few seconds and the archive path already reports the
    /// worker's death.
    pub fn on_loop_packet(&self, record: Record) {
        let Some(queue) = &self.raw else {
            return;
        };

        let ts = record.timestamp().as_secs();
        if ts == self.last_loop_timestamp.load(Ordering::Acquire) {
            trace!(timestamp = ts, "skipping loop packet with repeated timestamp");
            return;
        }

        match queue.put(record) {
            Ok(()) => {
                self.last_loop_timestamp.store(ts, Ordering::Release);
                trace!(timestamp = ts, "queued loop packet");
            }
            Err(_) => {
                trace!(timestamp = ts, "dropping loop packet: raw sync worker is not running");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{self, QueueItem};
    use crate::test_support::record;

    #[tokio::test]
    async fn archive_records_flow_into_the_queue() {
        let (archive_queue, mut consumer) = queue::channel();
        let gateway = IngestGateway::new(Some(archive_queue), None);

        gateway.on_archive_record(record(10));
        gateway.on_archive_record(record(20));

        for expected in [10, 20] {
            match consumer.take().await {
                QueueItem::Record(r) => assert_eq!(r.timestamp().as_secs(), expected),
                QueueItem::Close => panic!("unexpected close"),
            }
            consumer.task_done();
        }
    }

    #[tokio::test]
    async fn archive_record_dropped_when_worker_is_gone() {
        let (archive_queue, consumer) = queue::channel();
        let gateway = IngestGateway::new(Some(archive_queue.clone()), None);

        drop(consumer);
        gateway.on_archive_record(record(10));

        assert_eq!(archive_queue.pending(), 0);
    }

    #[tokio::test]
    async fn repeated_loop_timestamp_is_deduplicated() {
        let (raw_queue, mut consumer) = queue::channel();
        let gateway = IngestGateway::new(None, Some(raw_queue.clone()));

        gateway.on_loop_packet(record(100));
        gateway.on_loop_packet(record(100));
        gateway.on_loop_packet(record(101));
        // A repeat of an *older* timestamp is not deduplicated; only the
        // immediately preceding one is tracked.
        gateway.on_loop_packet(record(100));

        let mut delivered = Vec::new();
        raw_queue.close_signal();
        loop {
            match consumer.take().await {
                QueueItem::Record(r) => delivered.push(r.timestamp().as_secs()),
                QueueItem::Close => break,
            }
            consumer.task_done();
        }
        assert_eq!(delivered, vec![100, 101, 100]);
    }

    #[tokio::test]
    async fn unconfigured_streams_discard_events() {
        let gateway = IngestGateway::new(None, None);
        // Nothing to assert beyond "does not panic".
        gateway.on_archive_record(record(10));
        gateway.on_loop_packet(record(10));
    }
}
