//! Standalone relay daemon.
//!
//! Reads newline-delimited JSON archive records from stdin and replicates
//! them to the remote endpoint configured via `MESO_SYNC_*` environment
//! variables. Useful for manual publishing and for driving the engine
//! outside a weather-station host.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meso_sync::config::SyncConfig;
use meso_sync::engine::SyncEngine;
use meso_sync::remote::transport::HttpTransport;
use meso_sync::store::MemoryHistory;
use meso_sync::types::Record;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meso_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let remote = match HttpTransport::new(&config) {
        Ok(remote) => Arc::new(remote),
        Err(e) => {
            tracing::error!(error = %e, "could not build HTTP transport");
            std::process::exit(2);
        }
    };

    let engine = match SyncEngine::start(config, Arc::new(MemoryHistory::new()), remote) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "could not start sync engine");
            std::process::exit(2);
        }
    };
    let gateway = engine.gateway();

    tracing::info!("reading records from stdin (one JSON object per line)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Record>(line) {
                        Ok(record) => gateway.on_archive_record(record),
                        Err(e) => tracing::warn!(error = %e, "skipping unparseable record"),
                    }
                }
                Ok(None) => {
                    tracing::info!("stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "error reading stdin");
                    break;
                }
            }
        }
    }

    engine.shutdown().await;
}
