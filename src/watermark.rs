//! The shared archive sync watermark.
//!
//! The watermark is the highest `dateTime` the remote endpoint is known to
//! hold for the archive stream. The backfill reconciler writes it (initial
//! remote query, then after each acknowledged batch) and the live archive
//! worker both reads it (to skip records backfill already sent) and writes
//! it (after each acknowledged record).
//!
//! It is the only cross-task mutable state besides the queues, so the
//! whole API is two operations on one atomic: `get` and a monotonic
//! `advance_to`. "Never move backward" is enforced here, not by caller
//! discipline.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::Timestamp;

/// Sentinel for "no timestamp known yet". `i64::MIN` is far outside any
/// plausible epoch value and loses every `fetch_max`.
const UNSET: i64 = i64::MIN;

/// Monotonically advancing archive sync watermark.
#[derive(Debug)]
pub struct SyncWatermark(AtomicI64);

impl SyncWatermark {
    /// A watermark with no known remote timestamp.
    pub fn unset() -> Self {
        SyncWatermark(AtomicI64::new(UNSET))
    }

    /// A watermark seeded at a known timestamp.
    pub fn at(ts: Timestamp) -> Self {
        SyncWatermark(AtomicI64::new(ts.as_secs()))
    }

    /// The current watermark, if any timestamp is known.
    pub fn get(&self) -> Option<Timestamp> {
        match self.0.load(Ordering::Acquire) {
            UNSET => None,
            secs => Some(Timestamp(secs)),
        }
    }

    /// Advances the watermark to `ts` if that moves it forward.
    ///
    /// Returns `true` if this call advanced the value, `false` if an equal
    /// or newer timestamp was already recorded (e.g., by a concurrent
    /// backfill batch).
    pub fn advance_to(&self, ts: Timestamp) -> bool {
        let previous = self.0.fetch_max(ts.as_secs(), Ordering::AcqRel);
        previous < ts.as_secs()
    }

    /// True if `ts` is already covered: the remote is known to hold a
    /// record at or after it.
    pub fn covers(&self, ts: Timestamp) -> bool {
        match self.get() {
            Some(watermark) => ts <= watermark,
            None => false,
        }
    }
}

impl Default for SyncWatermark {
    fn default() -> Self {
        Self::unset()
    }
}
