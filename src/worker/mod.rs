//! Per-stream delivery workers.
//!
//! Each enabled stream gets one long-lived tokio task that drains its
//! record queue through the retry loop and transport. The two workers
//! share the same skeleton (block on the queue, exit on the close
//! sentinel or cancellation, acknowledge every item) and differ only in
//! failure tolerance:
//!
//! - [`RawWorker`] logs and drops a record whose attempt cycle fails; a
//!   lost high-rate sample is cheaper than a stalled queue.
//! - [`ArchiveWorker`] never drops: an exhausted cycle triggers a long
//!   cooldown and the same record is attempted again, indefinitely. Only
//!   a configuration-class failure stops it, loudly.

mod archive;
mod raw;


pub use archive::ArchiveWorker;
pub use raw::RawWorker;

/// Why a worker's run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The close sentinel was dequeued; a clean drain.
    CloseSignalled,

    /// The engine-wide cancellation token fired mid-wait.
    Cancelled,

    /// A configuration-class failure ended the stream. The ingestion
    /// gateway will drop (and report) further records for it.
    Fatal { reason: String },
}
