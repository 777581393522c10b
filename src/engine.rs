//! Engine composition and the shutdown coordinator.
//!
//! `SyncEngine::start` wires queues, workers, the watermark, and the
//! backfill reconciler together and spawns one tokio task per enabled
//! stream. The host keeps only two handles: the cloneable
//! [`IngestGateway`] for feeding events, and the engine itself for
//! shutdown.
//!
//! Shutdown sequence: cancel the engine token (wakes every retry sleep
//! and queue wait), enqueue the close sentinel on each queue, then join
//! each task under a bounded timeout. A task that misses the deadline is
//! logged as leaked and abandoned, never aborted mid-request.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backfill::{BackfillOutcome, BackfillReconciler, BackfillSummary};
use crate::config::SyncConfig;
use crate::ingest::IngestGateway;
use crate::queue::{self, RecordQueue};
use crate::remote::transport::RemoteEndpoint;
use crate::store::HistoryStore;
use crate::types::Stream;
use crate::watermark::SyncWatermark;
use crate::worker::{ArchiveWorker, RawWorker, WorkerExit};

/// Errors starting the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Neither stream has a target; there is nothing to sync.
    #[error("no sync streams configured: set an archive and/or raw stream target")]
    NoStreamsConfigured,
}

/// Handle to one running stream worker.
struct StreamHandle {
    stream: Stream,
    queue: RecordQueue,
    task: JoinHandle<WorkerExit>,
}

/// The running sync engine.
pub struct SyncEngine {
    cancel: CancellationToken,
    gateway: IngestGateway,
    watermark: Arc<SyncWatermark>,
    workers: Vec<StreamHandle>,
    backfill_task: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl SyncEngine {
    /// Starts workers for every configured stream.
    ///
    /// Must be called from within a tokio runtime. With the default
    /// sequential backfill mode, the archive task runs the backfill
    /// reconciliation to completion before consuming its queue (records
    /// queue up in the meantime and the watermark suppresses anything the
    /// backfill already covered). With `concurrent_backfill`, the
    /// reconciler runs as its own task alongside live delivery.
    pub fn start<R, S>(
        config: SyncConfig,
        store: Arc<S>,
        remote: Arc<R>,
    ) -> Result<SyncEngine, EngineError>
    where
        R: RemoteEndpoint,
        S: HistoryStore,
    {
        if config.archive.is_none() && config.raw.is_none() {
            return Err(EngineError::NoStreamsConfigured);
        }

        let cancel = CancellationToken::new();
        let watermark = Arc::new(SyncWatermark::unset());
        let mut workers = Vec::new();
        let mut backfill_task = None;

        let archive_queue = match config.archive.clone() {
            Some(target) => {
                let (record_queue, consumer) = queue::channel();

                let reconciler = BackfillReconciler::new(
                    remote.clone(),
                    store.clone(),
                    watermark.clone(),
                    target.clone(),
                    config.backfill_retry,
                    config.batch_size,
                    config.batch_send_interval,
                    config.backfill_limit,
                    cancel.child_token(),
                );
                let worker = ArchiveWorker::new(
                    remote.clone(),
                    consumer,
                    target,
                    config.archive_retry,
                    config.failure_retry_interval,
                    watermark.clone(),
                    cancel.child_token(),
                );

                let task = if config.concurrent_backfill {
                    backfill_task = Some(tokio::spawn(async move {
                        log_backfill_summary(&reconciler.run().await);
                    }));
                    tokio::spawn(worker.run())
                } else {
                    tokio::spawn(async move {
                        log_backfill_summary(&reconciler.run().await);
                        worker.run().await
                    })
                };

                info!("will sync archive records");
                workers.push(StreamHandle {
                    stream: Stream::Archive,
                    queue: record_queue.clone(),
                    task,
                });
                Some(record_queue)
            }
            None => {
                info!("won't sync archive records (no archive stream target configured)");
                None
            }
        };

        let raw_queue = match config.raw.clone() {
            Some(target) => {
                let (record_queue, consumer) = queue::channel();
                let worker = RawWorker::new(
                    remote.clone(),
                    consumer,
                    target,
                    config.raw_retry,
                    cancel.child_token(),
                );

                info!("will sync raw records");
                workers.push(StreamHandle {
                    stream: Stream::Raw,
                    queue: record_queue.clone(),
                    task: tokio::spawn(worker.run()),
                });
                Some(record_queue)
            }
            None => {
                info!("won't sync raw records (no raw stream target configured)");
                None
            }
        };

        Ok(SyncEngine {
            cancel,
            gateway: IngestGateway::new(archive_queue, raw_queue),
            watermark,
            workers,
            backfill_task,
            join_timeout: config.join_timeout,
        })
    }

    /// The handle through which the host feeds new observations.
    pub fn gateway(&self) -> IngestGateway {
        self.gateway.clone()
    }

    /// The shared archive sync watermark.
    pub fn watermark(&self) -> Arc<SyncWatermark> {
        self.watermark.clone()
    }

    /// Shuts the engine down, blocking until workers are joined or the
    /// per-worker timeout elapses.
    pub async fn shutdown(mut self) {
        info!("shutting down sync engine");

        // Wake every blocked wait first, then let each queue drain to its
        // sentinel.
        self.cancel.cancel();
        for handle in &self.workers {
            handle.queue.close_signal();
        }

        if let Some(task) = self.backfill_task.take() {
            match tokio::time::timeout(self.join_timeout, task).await {
                Ok(Ok(())) => debug!("backfill task stopped"),
                Ok(Err(e)) => error!(error = %e, "backfill task panicked"),
                Err(_) => error!(
                    timeout_secs = self.join_timeout.as_secs_f64(),
                    "unable to shut down backfill task within the join timeout"
                ),
            }
        }

        for handle in self.workers {
            match tokio::time::timeout(self.join_timeout, handle.task).await {
                Ok(Ok(exit)) => match exit {
                    WorkerExit::CloseSignalled | WorkerExit::Cancelled => {
                        debug!(stream = %handle.stream, ?exit, "sync worker stopped");
                    }
                    WorkerExit::Fatal { reason } => {
                        warn!(
                            stream = %handle.stream,
                            %reason,
                            "sync worker had already stopped on a fatal error"
                        );
                    }
                },
                Ok(Err(e)) => {
                    error!(stream = %handle.stream, error = %e, "sync worker panicked");
                }
                Err(_) => {
                    error!(
                        stream = %handle.stream,
                        timeout_secs = self.join_timeout.as_secs_f64(),
                        "unable to shut down sync worker within the join timeout"
                    );
                }
            }
        }
    }
}

/// Reports how a backfill run ended, at the severity the outcome calls
/// for.
fn log_backfill_summary(summary: &BackfillSummary) {
    match &summary.outcome {
        BackfillOutcome::Completed => info!(
            records_sent = summary.records_sent,
            batches_sent = summary.batches_sent,
            "backfill finished"
        ),
        BackfillOutcome::NothingToSend => debug!("backfill found nothing to send"),
        BackfillOutcome::SkippedOverLimit { pending, limit } => error!(
            pending,
            limit, "backfill skipped: gap exceeds the configured record limit"
        ),
        BackfillOutcome::Aborted { reason } => error!(
            records_sent = summary.records_sent,
            %reason,
            "backfill aborted; continuing with live sync"
        ),
        BackfillOutcome::Cancelled => debug!("backfill cancelled by shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::retry::RetryPolicy;
    use crate::remote::transport::HttpResponse;
    use crate::store::MemoryHistory;
    use crate::test_support::{FakeRemote, record};
    use crate::types::Timestamp;

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::new("https://wx.example.org/meso/")
            .with_archive("weewx_archive", "archive-key")
            .with_raw("weewx_raw", "raw-key");
        // Keep every wait short so tests run in milliseconds.
        config.archive_retry = RetryPolicy::new(2, Duration::from_millis(1));
        config.raw_retry = RetryPolicy::RAW;
        config.backfill_retry = RetryPolicy::new(3, Duration::from_millis(1));
        config.failure_retry_interval = Duration::from_millis(5);
        config.batch_send_interval = Duration::from_millis(1);
        config.join_timeout = Duration::from_secs(5);
        config
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn start_requires_at_least_one_stream() {
        let config = SyncConfig::new("https://wx.example.org/meso/");
        let result = SyncEngine::start(
            config,
            Arc::new(MemoryHistory::new()),
            Arc::new(FakeRemote::new()),
        );
        assert!(matches!(result, Err(EngineError::NoStreamsConfigured)));
    }

    #[tokio::test]
    async fn live_records_flow_through_both_streams() {
        let remote = Arc::new(FakeRemote::new());
        let engine = SyncEngine::start(
            test_config(),
            Arc::new(MemoryHistory::new()),
            remote.clone(),
        )
        .unwrap();
        let gateway = engine.gateway();

        gateway.on_archive_record(record(60));
        gateway.on_loop_packet(record(61));
        settle().await;
        engine.shutdown().await;

        let mut batches = remote.posted_batches();
        batches.sort();
        assert_eq!(batches, vec![vec![60], vec![61]]);
    }

    #[tokio::test]
    async fn backfill_drains_history_before_live_delivery() {
        let remote = Arc::new(FakeRemote::new());
        let store = Arc::new(MemoryHistory::from_records(
            [10, 20, 30, 40, 50].map(record),
        ));
        let engine = SyncEngine::start(test_config(), store, remote.clone()).unwrap();
        settle().await;
        engine.shutdown().await;

        // Remote reported no data, so everything goes in one batch.
        assert_eq!(remote.posted_batches(), vec![vec![10, 20, 30, 40, 50]]);
    }

    #[tokio::test]
    async fn live_record_covered_by_backfill_is_skipped() {
        let remote = Arc::new(FakeRemote::new());
        let store = Arc::new(MemoryHistory::from_records(
            [10, 20, 30, 40, 50].map(record),
        ));
        let engine = SyncEngine::start(test_config(), store, remote.clone()).unwrap();
        let gateway = engine.gateway();

        // Queued while backfill is still running: 45 is inside the gap
        // backfill will cover, 60 is genuinely new.
        gateway.on_archive_record(record(45));
        gateway.on_archive_record(record(60));
        settle().await;

        let watermark = engine.watermark();
        engine.shutdown().await;

        let batches = remote.posted_batches();
        assert_eq!(batches[0], vec![10, 20, 30, 40, 50]);
        assert!(!batches.contains(&vec![45]), "45 was re-sent: {batches:?}");
        assert!(batches.contains(&vec![60]));
        assert_eq!(watermark.get(), Some(Timestamp(60)));
    }

    #[tokio::test]
    async fn shutdown_is_prompt_even_during_retry_sleeps() {
        let remote = Arc::new(FakeRemote::new());
        let mut config = test_config();
        config.raw = None;
        // A retry interval far longer than the test: shutdown must cut it.
        config.archive_retry = RetryPolicy::new(5, Duration::from_secs(3600));

        remote.script_post(Ok(HttpResponse::new(500, "Internal Server Error")));
        remote.script_post(Ok(HttpResponse::new(500, "Internal Server Error")));

        let engine =
            SyncEngine::start(config, Arc::new(MemoryHistory::new()), remote.clone()).unwrap();
        engine.gateway().on_archive_record(record(60));
        settle().await;

        let started = std::time::Instant::now();
        engine.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn gateway_reports_dead_archive_worker() {
        let remote = Arc::new(FakeRemote::new());
        let mut config = test_config();
        config.raw = None;

        // The first record hits a configuration error and kills the
        // archive worker.
        remote.script_post(Ok(HttpResponse::new(403, "Forbidden")));

        let engine =
            SyncEngine::start(config, Arc::new(MemoryHistory::new()), remote.clone()).unwrap();
        let gateway = engine.gateway();

        gateway.on_archive_record(record(60));
        settle().await;

        // Worker is gone: this record is dropped with a report, not
        // queued behind a dead consumer.
        gateway.on_archive_record(record(70));
        engine.shutdown().await;

        assert_eq!(remote.posted_batches(), vec![vec![60]]);
    }

    #[tokio::test]
    async fn concurrent_backfill_mode_also_converges() {
        let remote = Arc::new(FakeRemote::new());
        let mut config = test_config();
        config.raw = None;
        config.concurrent_backfill = true;

        let store = Arc::new(MemoryHistory::from_records([10, 20, 30].map(record)));
        let engine = SyncEngine::start(config, store, remote.clone()).unwrap();
        let gateway = engine.gateway();

        gateway.on_archive_record(record(60));
        settle().await;

        let watermark = engine.watermark();
        engine.shutdown().await;

        // Every timestamp reached the remote exactly once across the two
        // concurrent paths.
        let mut sent: Vec<i64> = remote.posted_batches().into_iter().flatten().collect();
        sent.sort();
        assert_eq!(sent, vec![10, 20, 30, 60]);
        assert_eq!(watermark.get(), Some(Timestamp(60)));
    }
}
