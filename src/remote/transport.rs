//! Pooled HTTP transport for the remote data-collection endpoint.
//!
//! The remote API is a pair of form-POST endpoints: an update endpoint
//! accepting `entity_id` / `security_key` / `data` (a JSON-encoded array of
//! records), and a query endpoint answering "what is the latest timestamp
//! you hold for this entity". Responses come back as raw status + body and
//! are interpreted by [`crate::remote::outcome`]; the transport itself
//! never decides whether a request "worked".

use std::fmt;
use std::future::Future;

use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::SyncConfig;
use crate::types::{EntityId, Record, SecurityKey, Timestamp};

/// User agent sent on every request; some hosting providers reject
/// requests without one.
pub const USER_AGENT: &str = concat!("meso-sync/", env!("CARGO_PKG_VERSION"));

/// The raw result of one HTTP exchange: status plus full response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }
}

/// The kind of transport-level failure, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established at all (refused, DNS
    /// failure, TLS handshake). Whether this is retryable depends on the
    /// caller: a server unreachable at boot is usually a configuration
    /// error, mid-run it is usually an outage.
    Connect,

    /// The request was in flight but timed out or was reset.
    Timeout,

    /// The configured remote URL does not parse.
    InvalidUrl,

    /// Any other client-side failure (request build, body read).
    Other,
}

/// A transport-level error with categorization for retry decisions.
///
/// The underlying `reqwest` error is kept as a source when one exists;
/// tests construct these without a source.
#[derive(Debug, Error)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub url: String,
    pub message: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Connect => {
                write!(f, "failed to connect to {}: {}", self.url, self.message)
            }
            TransportErrorKind::Timeout => {
                write!(f, "request to {} timed out: {}", self.url, self.message)
            }
            TransportErrorKind::InvalidUrl => {
                write!(f, "invalid remote URL {}: {}", self.url, self.message)
            }
            TransportErrorKind::Other => {
                write!(f, "request to {} failed: {}", self.url, self.message)
            }
        }
    }
}

impl TransportError {
    /// Categorizes a `reqwest` error for the request that produced it.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else {
            TransportErrorKind::Other
        };
        TransportError {
            kind,
            url: url.to_string(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Creates a connect-failure error without a reqwest source.
    pub fn connect_without_source(url: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError {
            kind: TransportErrorKind::Connect,
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a timeout error without a reqwest source.
    pub fn timeout_without_source(url: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError {
            kind: TransportErrorKind::Timeout,
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    fn invalid_url(url: &str, message: impl Into<String>) -> Self {
        TransportError {
            kind: TransportErrorKind::InvalidUrl,
            url: url.to_string(),
            message: message.into(),
            source: None,
        }
    }
}

/// A response body from the latest-timestamp query that could not be
/// interpreted. The backfill reconciler treats this the same way it
/// treats an unreachable remote.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed latest-timestamp response: {0}")]
pub struct MalformedResponse(pub String);

/// The outbound contract with the remote data-collection endpoint.
///
/// The production implementation is [`HttpTransport`]; tests substitute a
/// scripted fake. Both methods return the raw exchange result so that
/// classification stays in one place.
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// POSTs one or more records to an entity on the remote endpoint.
    fn post_update(
        &self,
        entity: &EntityId,
        key: &SecurityKey,
        records: &[Record],
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;

    /// Queries the remote endpoint for the latest timestamp it holds for
    /// an entity. The body is interpreted by [`parse_latest_timestamp`].
    fn query_latest(
        &self,
        entity: &EntityId,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

/// Parses the latest-timestamp query response.
///
/// The remote answers with a JSON array of rows ordered newest-first; the
/// first row's first column is the timestamp. An empty array means the
/// remote holds no data yet.
pub fn parse_latest_timestamp(body: &str) -> Result<Option<Timestamp>, MalformedResponse> {
    let rows: Vec<Vec<Value>> =
        serde_json::from_str(body).map_err(|e| MalformedResponse(e.to_string()))?;
    match rows.first() {
        None => Ok(None),
        Some(row) => row
            .first()
            .and_then(Value::as_i64)
            .map(|secs| Some(Timestamp(secs)))
            .ok_or_else(|| MalformedResponse(format!("first row has no integer timestamp: {body}"))),
    }
}

/// Pooled HTTP client for the remote endpoint.
///
/// The connection pool is shared by every worker that holds a clone of the
/// surrounding `Arc`; its capacity is sized by the engine to cover all
/// concurrent callers. Requests carry a finite timeout and the crate's
/// identifying `User-Agent`.
pub struct HttpTransport {
    client: reqwest::Client,
    update_url: Url,
    data_url: Url,
}

impl HttpTransport {
    /// Builds the transport from engine configuration.
    ///
    /// Fails if either remote URL does not parse or the client cannot be
    /// constructed (e.g., no TLS backend available).
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let update_raw = config.update_url();
        let update_url = Url::parse(&update_raw)
            .map_err(|e| TransportError::invalid_url(&update_raw, e.to_string()))?;
        let data_raw = config.data_url();
        let data_url = Url::parse(&data_raw)
            .map_err(|e| TransportError::invalid_url(&data_raw, e.to_string()))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_capacity())
            .build()
            .map_err(|e| TransportError::from_reqwest(config.remote_server_url.as_str(), e))?;

        Ok(HttpTransport {
            client,
            update_url,
            data_url,
        })
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(url.as_str(), e))?;

        Ok(HttpResponse { status, body })
    }
}

impl RemoteEndpoint for HttpTransport {
    fn post_update(
        &self,
        entity: &EntityId,
        key: &SecurityKey,
        records: &[Record],
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        async move {
            let data = serde_json::to_string(records).map_err(|e| TransportError {
                kind: TransportErrorKind::Other,
                url: self.update_url.to_string(),
                message: format!("could not encode records: {e}"),
                source: None,
            })?;
            debug!(
                entity = %entity,
                records = records.len(),
                bytes = data.len(),
                "posting update"
            );
            self.post_form(
                &self.update_url,
                &[
                    ("entity_id", entity.as_str()),
                    ("security_key", key.as_str()),
                    ("data", &data),
                ],
            )
            .await
        }
    }

    fn query_latest(
        &self,
        entity: &EntityId,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        async move {
            debug!(entity = %entity, url = %self.data_url, "requesting latest remote timestamp");
            self.post_form(
                &self.data_url,
                &[
                    ("entity_id", entity.as_str()),
                    ("data", "dateTime"),
                    ("order", "desc"),
                    ("limit", "1"),
                ],
            )
            .await
        }
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("update_url", &self.update_url.as_str())
            .field("data_url", &self.data_url.as_str())
            .finish_non_exhaustive()
    }
}
