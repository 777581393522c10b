//! Classification of delivery attempts.
//!
//! Every HTTP attempt resolves to exactly one [`DeliveryOutcome`]. The
//! distinction drives the retry loop:
//!
//! - **Success** and **DuplicateTreatedAsSuccess** end the attempt cycle.
//!   A duplicate-key response means the remote already holds the record,
//!   which is functionally indistinguishable from a successful insert.
//! - **RetryableFailure** is retried per the stream's policy (5xx without
//!   the duplicate marker, timeouts, resets).
//! - **FatalFailure** is a configuration-class error (bad entity, wrong
//!   security key, wrong URL) that almost never self-heals; it
//!   short-circuits the retry loop immediately.
//!
//! Connection-refused/DNS failures sit in between: during live delivery
//! they are usually a momentary outage (retryable), but at backfill time a
//! server that was never reachable is usually a misconfigured URL (fatal).
//! Callers pick via [`ConnectFailurePolicy`].

use super::transport::{HttpResponse, TransportError, TransportErrorKind};

/// Marker substring the remote includes in a ≥500 response body when the
/// posted record violates its uniqueness constraint.
pub const DUPLICATE_KEY_MARKER: &str = "Duplicate entry";

/// The tagged result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// HTTP 200: the remote accepted the records.
    Success,

    /// The remote reported a uniqueness violation: the data is already
    /// present, so there is nothing left to deliver.
    DuplicateTreatedAsSuccess,

    /// A transient failure worth retrying.
    RetryableFailure(String),

    /// A configuration-class failure; retrying within this attempt cycle
    /// would only repeat it.
    FatalFailure(String),
}

impl DeliveryOutcome {
    /// Returns true if the record needs no further delivery attempts.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Success | DeliveryOutcome::DuplicateTreatedAsSuccess
        )
    }
}

/// How to treat a connection that could not be established at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailurePolicy {
    /// Treat as a momentary outage and retry (live workers).
    Transient,

    /// Treat as a setup error and fail the attempt cycle (backfill).
    Fatal,
}

/// Classifies an HTTP response into a delivery outcome.
pub fn classify_response(response: &HttpResponse) -> DeliveryOutcome {
    let status = response.status;

    if status == 200 {
        return DeliveryOutcome::Success;
    }

    if status >= 500 {
        if response.body.contains(DUPLICATE_KEY_MARKER) {
            return DeliveryOutcome::DuplicateTreatedAsSuccess;
        }
        return DeliveryOutcome::RetryableFailure(format!(
            "server returned status {status}: {}",
            truncate_body(&response.body)
        ));
    }

    // Everything else is a configuration-class failure. The three statuses
    // the remote is known to produce get targeted diagnostics.
    let hint = match status {
        403 => " Security key mismatch? Check that the entity security keys match.",
        404 => " Is the remote URL correct?",
        400 => " Check the entity configuration.",
        _ => "",
    };
    DeliveryOutcome::FatalFailure(format!(
        "server returned status {status}: {}.{hint}",
        truncate_body(&response.body)
    ))
}

/// Classifies a transport-level error into a delivery outcome.
pub fn classify_transport_error(
    error: &TransportError,
    connect_policy: ConnectFailurePolicy,
) -> DeliveryOutcome {
    match error.kind {
        TransportErrorKind::Connect => match connect_policy {
            ConnectFailurePolicy::Transient => {
                DeliveryOutcome::RetryableFailure(error.to_string())
            }
            ConnectFailurePolicy::Fatal => DeliveryOutcome::FatalFailure(error.to_string()),
        },
        TransportErrorKind::Timeout => DeliveryOutcome::RetryableFailure(error.to_string()),
        TransportErrorKind::InvalidUrl => DeliveryOutcome::FatalFailure(error.to_string()),
        TransportErrorKind::Other => DeliveryOutcome::RetryableFailure(error.to_string()),
    }
}

/// Classifies a whole attempt result (response or transport error).
pub fn classify_attempt(
    result: &Result<HttpResponse, TransportError>,
    connect_policy: ConnectFailurePolicy,
) -> DeliveryOutcome {
    match result {
        Ok(response) => classify_response(response),
        Err(error) => classify_transport_error(error, connect_policy),
    }
}

/// Bounds response bodies quoted into diagnostics; error pages can be
/// arbitrarily large HTML.
fn truncate_body(body: &str) -> &str {
    let limit = 200;
    match body.char_indices().nth(limit) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::transport::TransportError;
    use proptest::prelude::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status, body)
    }

    // ─── Response classification ───

    #[test]
    fn ok_is_success() {
        assert_eq!(
            classify_response(&response(200, "OK")),
            DeliveryOutcome::Success
        );
    }

    #[test]
    fn server_error_with_duplicate_marker_is_duplicate_success() {
        let body = "SQLSTATE[23000]: Integrity constraint violation: \
                    1062 Duplicate entry '1700000000' for key 'PRIMARY'";
        assert_eq!(
            classify_response(&response(500, body)),
            DeliveryOutcome::DuplicateTreatedAsSuccess
        );
    }

    #[test]
    fn server_error_without_marker_is_retryable() {
        let outcome = classify_response(&response(503, "Service Unavailable"));
        assert!(matches!(outcome, DeliveryOutcome::RetryableFailure(_)));
    }

    #[test]
    fn forbidden_names_security_key_mismatch() {
        let outcome = classify_response(&response(403, "Forbidden"));
        match outcome {
            DeliveryOutcome::FatalFailure(reason) => {
                assert!(reason.contains("Security key mismatch"), "{reason}");
            }
            other => panic!("expected fatal failure, got {other:?}"),
        }
    }

    #[test]
    fn not_found_names_the_url() {
        let outcome = classify_response(&response(404, "Not Found"));
        match outcome {
            DeliveryOutcome::FatalFailure(reason) => {
                assert!(reason.contains("remote URL"), "{reason}");
            }
            other => panic!("expected fatal failure, got {other:?}"),
        }
    }

    #[test]
    fn bad_request_names_entity_configuration() {
        let outcome = classify_response(&response(400, "Bad Request"));
        match outcome {
            DeliveryOutcome::FatalFailure(reason) => {
                assert!(reason.contains("entity configuration"), "{reason}");
            }
            other => panic!("expected fatal failure, got {other:?}"),
        }
    }

    #[test]
    fn unexpected_statuses_are_fatal() {
        assert!(matches!(
            classify_response(&response(302, "Found")),
            DeliveryOutcome::FatalFailure(_)
        ));
        assert!(matches!(
            classify_response(&response(418, "teapot")),
            DeliveryOutcome::FatalFailure(_)
        ));
    }

    #[test]
    fn huge_error_bodies_are_truncated_in_diagnostics() {
        let body = "x".repeat(10_000);
        match classify_response(&response(500, &body)) {
            DeliveryOutcome::RetryableFailure(reason) => assert!(reason.len() < 300),
            other => panic!("expected retryable failure, got {other:?}"),
        }
    }

    // ─── Transport error classification ───

    #[test]
    fn connect_failure_respects_policy() {
        let err = TransportError::connect_without_source("http://x/", "connection refused");

        assert!(matches!(
            classify_transport_error(&err, ConnectFailurePolicy::Transient),
            DeliveryOutcome::RetryableFailure(_)
        ));
        assert!(matches!(
            classify_transport_error(&err, ConnectFailurePolicy::Fatal),
            DeliveryOutcome::FatalFailure(_)
        ));
    }

    #[test]
    fn timeout_is_retryable_under_both_policies() {
        let err = TransportError::timeout_without_source("http://x/", "deadline elapsed");

        for policy in [ConnectFailurePolicy::Transient, ConnectFailurePolicy::Fatal] {
            assert!(matches!(
                classify_transport_error(&err, policy),
                DeliveryOutcome::RetryableFailure(_)
            ));
        }
    }

    // ─── Property tests ───

    proptest! {
        /// Classification is total and consistent for every status/body pair:
        /// exactly one outcome, and it is the one the status band dictates.
        #[test]
        fn classification_is_total(status in 100u16..600, body in ".{0,300}") {
            let outcome = classify_response(&response(status, &body));
            match status {
                200 => prop_assert_eq!(outcome, DeliveryOutcome::Success),
                s if s >= 500 && body.contains(DUPLICATE_KEY_MARKER) => {
                    prop_assert_eq!(outcome, DeliveryOutcome::DuplicateTreatedAsSuccess)
                }
                s if s >= 500 => {
                    prop_assert!(matches!(outcome, DeliveryOutcome::RetryableFailure(_)))
                }
                _ => prop_assert!(matches!(outcome, DeliveryOutcome::FatalFailure(_))),
            }
        }
    }
}
