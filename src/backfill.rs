//! Startup backfill reconciliation.
//!
//! Runs once, at or near engine start: ask the remote for the latest
//! archive timestamp it holds, then stream everything newer from the
//! local historical store in fixed-size ascending batches, advancing the
//! shared watermark as each batch is acknowledged.
//!
//! Failure posture is deliberately conservative — backfill is a
//! convenience, live sync is the product:
//!
//! - If the remote cannot be queried (down, unreachable, nonsense body),
//!   the reconciliation point becomes "now", the computed gap is empty,
//!   and nothing is resent against a server that may simply be down.
//! - If the gap exceeds the configured limit, backfill is skipped
//!   entirely with an error report; a human decides how to move that much
//!   history.
//! - If a batch ultimately fails, backfill aborts; the watermark reflects
//!   exactly the batches the remote acknowledged.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::StreamTarget;
use crate::remote::retry::{
    DeliveryError, RetryPolicy, deliver_with_retry, sleep_unless_cancelled,
};
use crate::remote::transport::{RemoteEndpoint, parse_latest_timestamp};
use crate::remote::ConnectFailurePolicy;
use crate::store::HistoryStore;
use crate::types::Timestamp;
use crate::watermark::SyncWatermark;

/// How a backfill run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Every gap record was acknowledged by the remote.
    Completed,

    /// The remote was already up to date (or unreachable, which pins the
    /// reconciliation point to now).
    NothingToSend,

    /// The gap exceeded the configured limit; nothing was sent.
    SkippedOverLimit { pending: u64, limit: u64 },

    /// A batch or store query failed; the watermark covers exactly what
    /// was acknowledged before the failure.
    Aborted { reason: String },

    /// Shutdown was signaled mid-run.
    Cancelled,
}

/// Result of one backfill run.
#[derive(Debug)]
pub struct BackfillSummary {
    pub records_sent: u64,
    pub batches_sent: u64,
    pub outcome: BackfillOutcome,
}

/// One-shot reconciler between the local history and the remote archive
/// entity.
pub struct BackfillReconciler<R, S> {
    remote: Arc<R>,
    store: Arc<S>,
    watermark: Arc<SyncWatermark>,
    target: StreamTarget,
    policy: RetryPolicy,
    batch_size: usize,
    batch_send_interval: Duration,
    backfill_limit: u64,
    cancel: CancellationToken,
}

impl<R: RemoteEndpoint, S: HistoryStore> BackfillReconciler<R, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote: Arc<R>,
        store: Arc<S>,
        watermark: Arc<SyncWatermark>,
        target: StreamTarget,
        policy: RetryPolicy,
        batch_size: usize,
        batch_send_interval: Duration,
        backfill_limit: u64,
        cancel: CancellationToken,
    ) -> Self {
        BackfillReconciler {
            remote,
            store,
            watermark,
            target,
            policy,
            batch_size,
            batch_send_interval,
            backfill_limit,
            cancel,
        }
    }

    /// Runs the reconciliation to completion (or early, well-defined
    /// abort).
    #[instrument(skip(self), fields(entity = %self.target.entity_id))]
    pub async fn run(&self) -> BackfillSummary {
        let since = match self.reconciliation_point().await {
            Ok(since) => since,
            Err(()) => return self.summary(0, 0, BackfillOutcome::Cancelled),
        };

        // Seed the watermark so the live archive worker skips anything
        // the remote already holds even if we send nothing below.
        if let Some(ts) = since {
            self.watermark.advance_to(ts);
        }

        let pending = match self.store.count_newer(since) {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "could not count the backfill gap");
                return self.summary(
                    0,
                    0,
                    BackfillOutcome::Aborted {
                        reason: e.to_string(),
                    },
                );
            }
        };
        info!(
            pending,
            since = ?since.map(|t| t.as_secs()),
            "archive records to sync since last remote record"
        );

        if pending == 0 {
            debug!("remote archive is up to date, no backfill needed");
            return self.summary(0, 0, BackfillOutcome::NothingToSend);
        }

        if self.backfill_limit != 0 && pending > self.backfill_limit {
            error!(
                pending,
                limit = self.backfill_limit,
                "too many records to backfill; skipping backfill entirely and continuing with live sync only"
            );
            return self.summary(
                0,
                0,
                BackfillOutcome::SkippedOverLimit {
                    pending,
                    limit: self.backfill_limit,
                },
            );
        }

        info!(pending, "backfilling archive records");
        self.stream_gap(since).await
    }

    /// Streams the gap in ascending batches, pausing between batches.
    async fn stream_gap(&self, since: Option<Timestamp>) -> BackfillSummary {
        let mut cursor = since;
        let mut records_sent = 0u64;
        let mut batches_sent = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return self.summary(records_sent, batches_sent, BackfillOutcome::Cancelled);
            }

            let batch = match self.store.next_batch(cursor, self.batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "history query failed mid-backfill");
                    return self.summary(
                        records_sent,
                        batches_sent,
                        BackfillOutcome::Aborted {
                            reason: e.to_string(),
                        },
                    );
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            let batch_through = last.timestamp();

            let attempt =
                deliver_with_retry(self.policy, ConnectFailurePolicy::Fatal, &self.cancel, || {
                    self.remote.post_update(
                        &self.target.entity_id,
                        &self.target.security_key,
                        &batch,
                    )
                })
                .await;

            match attempt {
                Ok(receipt) => {
                    if receipt.was_duplicate() {
                        debug!(
                            through = %batch_through,
                            "remote already had part of this batch (duplicate entry)"
                        );
                    }
                    records_sent += batch.len() as u64;
                    batches_sent += 1;
                    self.watermark.advance_to(batch_through);
                    cursor = Some(batch_through);
                    info!(
                        total_sent = records_sent,
                        through = %batch_through,
                        "backfilled batch"
                    );
                }
                Err(DeliveryError::Cancelled) => {
                    return self.summary(records_sent, batches_sent, BackfillOutcome::Cancelled);
                }
                Err(e) => {
                    error!(error = %e, "backfill aborted");
                    return self.summary(
                        records_sent,
                        batches_sent,
                        BackfillOutcome::Aborted {
                            reason: e.to_string(),
                        },
                    );
                }
            }

            // Breathe between batches so a large gap does not bombard the
            // remote; shutdown cuts the pause short.
            if !sleep_unless_cancelled(self.batch_send_interval, &self.cancel).await {
                return self.summary(records_sent, batches_sent, BackfillOutcome::Cancelled);
            }
        }

        info!(records_sent, batches_sent, "backfill complete");
        self.summary(records_sent, batches_sent, BackfillOutcome::Completed)
    }

    /// Determines the timestamp everything newer than which must be sent.
    ///
    /// `Ok(None)` means the remote is empty and everything goes. Query
    /// failures resolve to the current wall-clock time so a down server
    /// gets an empty gap instead of a resend storm. `Err(())` means
    /// shutdown interrupted the query.
    async fn reconciliation_point(&self) -> Result<Option<Timestamp>, ()> {
        let attempt =
            deliver_with_retry(self.policy, ConnectFailurePolicy::Fatal, &self.cancel, || {
                self.remote.query_latest(&self.target.entity_id)
            })
            .await;

        match attempt {
            Ok(receipt) => match parse_latest_timestamp(&receipt.response.body) {
                Ok(latest) => {
                    debug!(latest = ?latest.map(|t| t.as_secs()), "received latest remote timestamp");
                    Ok(latest)
                }
                Err(e) => {
                    error!(
                        error = %e,
                        "could not interpret the latest-timestamp response; using current time to halt backfill"
                    );
                    Ok(Some(Timestamp::now()))
                }
            },
            Err(DeliveryError::Cancelled) => Err(()),
            Err(e) => {
                error!(
                    error = %e,
                    "could not query latest remote timestamp; using current time to halt backfill (is the server running?)"
                );
                Ok(Some(Timestamp::now()))
            }
        }
    }

    fn summary(&self, records_sent: u64, batches_sent: u64, outcome: BackfillOutcome) -> BackfillSummary {
        BackfillSummary {
            records_sent,
            batches_sent,
            outcome,
        }
    }
}
