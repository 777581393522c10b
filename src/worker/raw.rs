//! Best-effort delivery worker for the raw (loop packet) stream.

use std::slice;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::StreamTarget;
use crate::queue::{QueueConsumer, QueueItem};
use crate::remote::retry::{DeliveryError, RetryPolicy, deliver_with_retry};
use crate::remote::transport::RemoteEndpoint;
use crate::remote::ConnectFailurePolicy;
use crate::types::Record;

use super::WorkerExit;

/// Drains the raw queue, attempting each record once (by default) and
/// moving on. Failed records are logged and never re-queued.
pub struct RawWorker<R> {
    remote: Arc<R>,
    consumer: QueueConsumer,
    target: StreamTarget,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<R: RemoteEndpoint> RawWorker<R> {
    pub fn new(
        remote: Arc<R>,
        consumer: QueueConsumer,
        target: StreamTarget,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        RawWorker {
            remote,
            consumer,
            target,
            policy,
            cancel,
        }
    }

    /// Runs the delivery loop until the close sentinel or cancellation.
    pub async fn run(self) -> WorkerExit {
        let RawWorker {
            remote,
            mut consumer,
            target,
            policy,
            cancel,
        } = self;

        info!(entity = %target.entity_id, "raw sync worker waiting for records");

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("cancellation signaled, exiting raw sync loop");
                    return WorkerExit::Cancelled;
                }
                item = consumer.take() => item,
            };

            let record = match item {
                QueueItem::Close => {
                    consumer.task_done();
                    debug!("close signal received, exiting raw sync loop");
                    return WorkerExit::CloseSignalled;
                }
                QueueItem::Record(record) => record,
            };

            let exit = send_one(remote.as_ref(), &target, policy, &cancel, &record).await;
            consumer.task_done();
            if let Some(exit) = exit {
                return exit;
            }
        }
    }
}

/// Attempts one raw record. Returns `Some` only when the worker should
/// stop (cancellation); every failure outcome is drop-and-continue.
async fn send_one<R: RemoteEndpoint>(
    remote: &R,
    target: &StreamTarget,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    record: &Record,
) -> Option<WorkerExit> {
    let ts = record.timestamp();

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
                debug!(timestamp = %ts, "remote already had raw record (duplicate entry)");
            } else {
                trace!(timestamp = %ts, "synchronized raw record");
            }
            None
        }
        Err(DeliveryError::Exhausted {
            attempts,
            last_reason,
        }) => {
            error!(
                timestamp = %ts,
                attempts,
                reason = %last_reason,
                "unable to sync raw record, skipping"
            );
            None
        }
        Err(DeliveryError::Fatal { reason }) => {
            error!(
                timestamp = %ts,
                %reason,
                "unable to sync raw record, skipping"
            );
            None
        }
        Err(DeliveryError::Cancelled) => Some(WorkerExit::Cancelled),
    }
}
