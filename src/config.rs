//! Engine configuration.
//!
//! Defaults match the original deployment constants: batch size 200,
//! half-second inter-batch pause, 15-minute archive cooldown, 20-second
//! shutdown join timeout. Per-stream retry policies live in
//! [`crate::remote::retry::RetryPolicy`] and are carried here so a host
//! can override them in one place.

use std::time::Duration;

use thiserror::Error;

use crate::remote::retry::RetryPolicy;
use crate::types::{EntityId, SecurityKey};

/// Default path of the update API under the remote base URL.
const DEFAULT_UPDATE_PATH: &str = "updateData.php";

/// Default path of the data query API under the remote base URL.
const DEFAULT_DATA_PATH: &str = "data.php";

/// Default number of records per backfill POST.
const DEFAULT_BATCH_SIZE: usize = 200;

/// Default pause between backfill batches.
const DEFAULT_BATCH_SEND_INTERVAL: Duration = Duration::from_millis(500);

/// Default archive cooldown after an exhausted retry cycle (15 minutes).
const DEFAULT_FAILURE_RETRY_INTERVAL: Duration = Duration::from_secs(900);

/// Default bound on joining workers at shutdown.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Default per-request timeout; the HTTP client must never wait forever.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The remote base URL variable is not set.
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// A stream has an entity id but no security key (or vice versa).
    #[error("incomplete {stream} stream configuration: set both entity id and security key")]
    IncompleteStream { stream: &'static str },

    /// A variable is present but does not parse.
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// The remote-side identity of one stream: which entity to post into and
/// the secret that authorizes the posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub entity_id: EntityId,
    pub security_key: SecurityKey,
}

impl StreamTarget {
    pub fn new(entity_id: impl Into<String>, security_key: impl Into<String>) -> Self {
        StreamTarget {
            entity_id: EntityId::new(entity_id),
            security_key: SecurityKey::new(security_key),
        }
    }
}

/// Full engine configuration.
///
/// A stream is enabled by giving it a [`StreamTarget`]; a `None` stream is
/// simply not synced (and no worker is spawned for it).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote server, e.g. `https://wx.example.org/meso/`.
    pub remote_server_url: String,

    /// Path of the update API under the base URL.
    pub update_path: String,

    /// Path of the data query API under the base URL.
    pub data_path: String,

    /// Archive stream target, if archive syncing is enabled.
    pub archive: Option<StreamTarget>,

    /// Raw stream target, if raw syncing is enabled.
    pub raw: Option<StreamTarget>,

    /// Retry policy for live archive delivery.
    pub archive_retry: RetryPolicy,

    /// Retry policy for live raw delivery.
    pub raw_retry: RetryPolicy,

    /// Retry policy for backfill batches and the latest-timestamp query.
    pub backfill_retry: RetryPolicy,

    /// Cooldown before the archive worker re-attempts a record whose
    /// retry cycle was exhausted.
    pub failure_retry_interval: Duration,

    /// Maximum number of records backfill will attempt; 0 means no limit.
    /// Exceeding the limit skips backfill entirely (live-only sync).
    pub backfill_limit: u64,

    /// Records per backfill POST.
    pub batch_size: usize,

    /// Pause between backfill batches, to avoid bursting the remote.
    pub batch_send_interval: Duration,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Bound on joining each worker at shutdown.
    pub join_timeout: Duration,

    /// Run backfill concurrently with live archive delivery instead of
    /// before it. Correctness under concurrency rests on the shared
    /// monotonic watermark.
    pub concurrent_backfill: bool,
}

impl SyncConfig {
    /// Creates a configuration with deployment defaults and no streams
    /// enabled.
    pub fn new(remote_server_url: impl Into<String>) -> Self {
        SyncConfig {
            remote_server_url: remote_server_url.into(),
            update_path: DEFAULT_UPDATE_PATH.to_string(),
            data_path: DEFAULT_DATA_PATH.to_string(),
            archive: None,
            raw: None,
            archive_retry: RetryPolicy::ARCHIVE,
            raw_retry: RetryPolicy::RAW,
            backfill_retry: RetryPolicy::BACKFILL,
            failure_retry_interval: DEFAULT_FAILURE_RETRY_INTERVAL,
            backfill_limit: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_send_interval: DEFAULT_BATCH_SEND_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            concurrent_backfill: false,
        }
    }

    /// Enables the archive stream.
    pub fn with_archive(mut self, entity_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.archive = Some(StreamTarget::new(entity_id, key));
        self
    }

    /// Enables the raw stream.
    pub fn with_raw(mut self, entity_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.raw = Some(StreamTarget::new(entity_id, key));
        self
    }

    /// Reads configuration from `MESO_SYNC_*` environment variables.
    ///
    /// Required: `MESO_SYNC_REMOTE_URL`. Streams are enabled by
    /// `MESO_SYNC_ARCHIVE_ENTITY_ID` + `MESO_SYNC_ARCHIVE_SECURITY_KEY`
    /// (and the `RAW` equivalents). Optional knobs:
    /// `MESO_SYNC_BACKFILL_LIMIT`, `MESO_SYNC_BATCH_SIZE`,
    /// `MESO_SYNC_CONCURRENT_BACKFILL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("MESO_SYNC_REMOTE_URL")
            .map_err(|_| ConfigError::MissingVar("MESO_SYNC_REMOTE_URL"))?;
        let mut config = SyncConfig::new(url);

        config.archive = stream_from_env(
            "archive",
            "MESO_SYNC_ARCHIVE_ENTITY_ID",
            "MESO_SYNC_ARCHIVE_SECURITY_KEY",
        )?;
        config.raw = stream_from_env(
            "raw",
            "MESO_SYNC_RAW_ENTITY_ID",
            "MESO_SYNC_RAW_SECURITY_KEY",
        )?;

        if let Some(value) = env_parse::<u64>("MESO_SYNC_BACKFILL_LIMIT")? {
            config.backfill_limit = value;
        }
        if let Some(value) = env_parse::<usize>("MESO_SYNC_BATCH_SIZE")? {
            config.batch_size = value;
        }
        if let Some(value) = env_parse::<bool>("MESO_SYNC_CONCURRENT_BACKFILL")? {
            config.concurrent_backfill = value;
        }

        Ok(config)
    }

    /// Full URL of the update API.
    pub fn update_url(&self) -> String {
        join_url(&self.remote_server_url, &self.update_path)
    }

    /// Full URL of the data query API.
    pub fn data_url(&self) -> String {
        join_url(&self.remote_server_url, &self.data_path)
    }

    /// Connection-pool capacity: one slot per concurrent user of the
    /// transport (two live workers, plus backfill when it runs alongside
    /// them).
    pub fn pool_capacity(&self) -> usize {
        if self.concurrent_backfill { 3 } else { 2 }
    }
}

fn join_url(base: &str, path: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn stream_from_env(
    stream: &'static str,
    entity_var: &str,
    key_var: &str,
) -> Result<Option<StreamTarget>, ConfigError> {
    let entity = std::env::var(entity_var).ok();
    let key = std::env::var(key_var).ok();
    match (entity, key) {
        (Some(entity), Some(key)) => Ok(Some(StreamTarget::new(entity, key))),
        (None, None) => Ok(None),
        _ => Err(ConfigError::IncompleteStream { stream }),
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_constants() {
        let config = SyncConfig::new("https://wx.example.org/meso/");

        assert_eq!(config.batch_size, 200);
        assert_eq!(config.batch_send_interval, Duration::from_millis(500));
        assert_eq!(config.failure_retry_interval, Duration::from_secs(900));
        assert_eq!(config.join_timeout, Duration::from_secs(20));
        assert_eq!(config.backfill_limit, 0);
        assert!(!config.concurrent_backfill);
        assert!(config.archive.is_none());
        assert!(config.raw.is_none());
    }

    #[test]
    fn urls_join_with_and_without_trailing_slash() {
        let with_slash = SyncConfig::new("https://wx.example.org/meso/");
        assert_eq!(
            with_slash.update_url(),
            "https://wx.example.org/meso/updateData.php"
        );

        let without_slash = SyncConfig::new("https://wx.example.org/meso");
        assert_eq!(
            without_slash.data_url(),
            "https://wx.example.org/meso/data.php"
        );
    }

    #[test]
    fn builders_enable_streams() {
        let config = SyncConfig::new("https://wx.example.org/")
            .with_archive("weewx_archive", "archive-key")
            .with_raw("weewx_raw", "raw-key");

        assert_eq!(
            config.archive.as_ref().unwrap().entity_id,
            EntityId::new("weewx_archive")
        );
        assert_eq!(
            config.raw.as_ref().unwrap().security_key,
            SecurityKey::new("raw-key")
        );
    }

    #[test]
    fn pool_capacity_covers_concurrent_backfill() {
        let mut config = SyncConfig::new("https://wx.example.org/");
        assert_eq!(config.pool_capacity(), 2);
        config.concurrent_backfill = true;
        assert_eq!(config.pool_capacity(), 3);
    }
}
