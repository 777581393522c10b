//! Ordered, never-lossy delivery worker for the archive stream.

use std::slice;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::StreamTarget;
use crate::queue::{QueueConsumer, QueueItem};
use crate::remote::retry::{DeliveryError, RetryPolicy, deliver_with_retry, sleep_unless_cancelled};
use crate::remote::transport::RemoteEndpoint;
use crate::remote::ConnectFailurePolicy;
use crate::types::Record;
use crate::watermark::SyncWatermark;

use super::WorkerExit;

/// Drains the archive queue in order, consulting the shared watermark to
/// skip records the backfill reconciler already delivered, and advancing
/// it after every acknowledged send.
pub struct ArchiveWorker<R> {
    remote: Arc<R>,
    consumer: QueueConsumer,
    target: StreamTarget,
    policy: RetryPolicy,
    failure_retry_interval: Duration,
    watermark: Arc<SyncWatermark>,
    cancel: CancellationToken,
}

impl<R: RemoteEndpoint> ArchiveWorker<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote: Arc<R>,
        consumer: QueueConsumer,
        target: StreamTarget,
        policy: RetryPolicy,
        failure_retry_interval: Duration,
        watermark: Arc<SyncWatermark>,
        cancel: CancellationToken,
    ) -> Self {
        ArchiveWorker {
            remote,
            consumer,
            target,
            policy,
            failure_retry_interval,
            watermark,
            cancel,
        }
    }

    /// Runs the delivery loop until the close sentinel, cancellation, or a
    /// fatal configuration-class failure.
    pub async fn run(self) -> WorkerExit {
        let ArchiveWorker {
            remote,
            mut consumer,
            target,
            policy,
            failure_retry_interval,
            watermark,
            cancel,
        } = self;

        info!(entity = %target.entity_id, "archive sync worker waiting for records");

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("cancellation signaled, exiting archive sync loop");
                    return WorkerExit::Cancelled;
                }
                item = consumer.take() => item,
            };

            let record = match item {
                QueueItem::Close => {
                    consumer.task_done();
                    debug!("close signal received, exiting archive sync loop");
                    return WorkerExit::CloseSignalled;
                }
                QueueItem::Record(record) => record,
            };

            let exit = sync_one(
                remote.as_ref(),
                &target,
                policy,
                failure_retry_interval,
                &watermark,
                &cancel,
                &record,
            )
            .await;
            consumer.task_done();
            if let Some(exit) = exit {
                return exit;
            }
        }
    }
}

/// Delivers one archive record, retrying through cooldowns until it is
/// acknowledged. Returns `Some` only when the worker should stop.
async fn sync_one<R: RemoteEndpoint>(
    remote: &R,
    target: &StreamTarget,
    policy: RetryPolicy,
    failure_retry_interval: Duration,
    watermark: &SyncWatermark,
    cancel: &CancellationToken,
    record: &Record,
) -> Option<WorkerExit> {
    let ts = record.timestamp();

    // Most likely delivered by the backfill reconciler racing the live
    // feed at startup.
    if watermark.covers(ts) {
        debug!(
            timestamp = %ts,
            "skipping archive record already covered by the sync watermark"
        );
        return None;
    }

    loop {
        let attempt = deliver_with_retry(policy, ConnectFailurePolicy::Transient, cancel, || {
            remote.post_update(
                &target.entity_id,
                &target.security_key,
                slice::from_ref(record),
            )
        })
        .await;

        match attempt {
            Ok(receipt) => {
                if receipt.was_duplicate() {
                    debug!(
                        timestamp = %ts,
                        "remote already had archive record (duplicate entry)"
                    );
                }
                watermark.advance_to(ts);
                info!(
                    timestamp = %ts,
                    when = %ts.to_rfc3339(),
                    attempts = receipt.attempts,
                    "synchronized archive record"
                );
                return None;
            }
            Err(DeliveryError::Exhausted {
                attempts,
                last_reason,
            }) => {
                // Archive records are never dropped: cool down, then
                // re-attempt this same record.
                error!(
                    timestamp = %ts,
                    attempts,
                    reason = %last_reason,
                    cooldown_secs = failure_retry_interval.as_secs_f64(),
                    "archive synchronization failed, starting over after cooldown"
                );
                if !sleep_unless_cancelled(failure_retry_interval, cancel).await {
                    return Some(WorkerExit::Cancelled);
                }
            }
            Err(DeliveryError::Fatal { reason }) => {
                error!(
                    timestamp = %ts,
                    %reason,
                    "fatal archive synchronization error; archive sync disabled until restart"
                );
                return Some(WorkerExit::Fatal { reason });
            }
            Err(DeliveryError::Cancelled) => return Some(WorkerExit::Cancelled),
        }
    }
}
