//! Fixed-interval retry loop around delivery attempts.
//!
//! Each stream wraps its HTTP calls in this loop with its own policy:
//!
//! - Archive live delivery: 10 tries, 60s apart (losing archive data is
//!   not acceptable, so be patient).
//! - Raw live delivery: 1 try, no wait (losing a high-rate sample is
//!   cheaper than stalling the queue).
//! - Backfill: 3 tries, back to back (a wrong URL at boot should fail
//!   fast rather than stall startup).
//!
//! The sleep between attempts races the engine's cancellation token so a
//! shutdown mid-retry unwinds immediately without further network calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::{ConnectFailurePolicy, DeliveryOutcome, classify_attempt};
use super::transport::{HttpResponse, TransportError};

/// Per-stream retry policy: total attempts and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts (not "retries after the first"); a value
    /// of 0 is treated as 1.
    pub max_tries: u32,

    /// Pause between consecutive attempts.
    pub retry_interval: Duration,
}

impl RetryPolicy {
    /// Archive live delivery: 10 tries, one minute apart.
    pub const ARCHIVE: Self = Self {
        max_tries: 10,
        retry_interval: Duration::from_secs(60),
    };

    /// Raw live delivery: a single attempt.
    pub const RAW: Self = Self {
        max_tries: 1,
        retry_interval: Duration::ZERO,
    };

    /// Backfill batches and the latest-timestamp query: 3 tries, no pause.
    pub const BACKFILL: Self = Self {
        max_tries: 3,
        retry_interval: Duration::ZERO,
    };

    /// Creates a policy with explicit values.
    pub fn new(max_tries: u32, retry_interval: Duration) -> Self {
        RetryPolicy {
            max_tries,
            retry_interval,
        }
    }

    fn effective_max_tries(&self) -> u32 {
        self.max_tries.max(1)
    }
}

/// A completed delivery: which flavor of success, the raw response, and
/// how many attempts it took.
#[derive(Debug)]
pub struct DeliveryReceipt {
    /// `Success` or `DuplicateTreatedAsSuccess`; never a failure.
    pub outcome: DeliveryOutcome,

    /// The response that concluded the cycle (the latest-timestamp query
    /// needs its body).
    pub response: HttpResponse,

    /// Attempts made, including the successful one.
    pub attempts: u32,
}

impl DeliveryReceipt {
    /// True if the cycle concluded via a duplicate-key response rather
    /// than a plain 200.
    pub fn was_duplicate(&self) -> bool {
        self.outcome == DeliveryOutcome::DuplicateTreatedAsSuccess
    }
}

/// Why a delivery attempt cycle did not produce a receipt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Every attempt failed with a retryable error.
    #[error("delivery failed after {attempts} attempts: {last_reason}")]
    Exhausted { attempts: u32, last_reason: String },

    /// A configuration-class failure ended the cycle early.
    #[error("fatal delivery failure: {reason}")]
    Fatal { reason: String },

    /// Shutdown was signaled while waiting to retry (or before the first
    /// attempt). Not a failure; the caller unwinds quietly.
    #[error("delivery aborted by shutdown")]
    Cancelled,
}

/// Runs delivery attempts until success, a fatal failure, exhaustion, or
/// cancellation.
///
/// `attempt` is invoked once per try and should perform exactly one HTTP
/// exchange. Classification of the result is handled here; callers only
/// see the final receipt or error.
pub async fn deliver_with_retry<F, Fut>(
    policy: RetryPolicy,
    connect_policy: ConnectFailurePolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<DeliveryReceipt, DeliveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HttpResponse, TransportError>>,
{
    let max_tries = policy.effective_max_tries();
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }

        let result = attempt().await;
        attempts += 1;

        match classify_attempt(&result, connect_policy) {
            outcome @ (DeliveryOutcome::Success | DeliveryOutcome::DuplicateTreatedAsSuccess) => {
                // classify_attempt only yields success outcomes for Ok results.
                let response = match result {
                    Ok(response) => response,
                    Err(_) => unreachable!("success outcome from transport error"),
                };
                return Ok(DeliveryReceipt {
                    outcome,
                    response,
                    attempts,
                });
            }
            DeliveryOutcome::FatalFailure(reason) => {
                return Err(DeliveryError::Fatal { reason });
            }
            DeliveryOutcome::RetryableFailure(reason) => {
                warn!(attempt = attempts, max_tries, %reason, "delivery attempt failed");
                if attempts >= max_tries {
                    return Err(DeliveryError::Exhausted {
                        attempts,
                        last_reason: reason,
                    });
                }
                debug!(
                    interval_secs = policy.retry_interval.as_secs_f64(),
                    "waiting before retry"
                );
                if !sleep_unless_cancelled(policy.retry_interval, cancel).await {
                    return Err(DeliveryError::Cancelled);
                }
            }
        }
    }
}

/// Sleeps for `duration` unless the cancellation token fires first.
///
/// Returns `true` if the full duration elapsed, `false` on cancellation.
/// Every wait in the engine (retry pauses, cooldowns, inter-batch gaps)
/// goes through here so shutdown is never blocked on a timer.
pub(crate) async fn sleep_unless_cancelled(
    duration: Duration,
    cancel: &CancellationToken,
) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
