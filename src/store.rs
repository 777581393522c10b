//! The local historical archive store the backfill reconciler reads from.
//!
//! The store itself (the weather station's archive database) is an external
//! collaborator; this module only pins down the two queries backfill
//! needs: a gap count and ordered keyset-paginated batches. The in-memory
//! implementation backs tests and the standalone daemon.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use thiserror::Error;

use crate::types::{Record, Timestamp};

/// Errors surfaced by history store queries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying query failed.
    #[error("history store query failed: {0}")]
    Query(String),
}

/// Read-only contract with the local archive history.
pub trait HistoryStore: Send + Sync + 'static {
    /// Number of records with `dateTime` strictly greater than `since`
    /// (all records when `since` is `None`).
    fn count_newer(&self, since: Option<Timestamp>) -> Result<u64, StoreError>;

    /// The next ascending batch of at most `limit` records with
    /// `dateTime` strictly greater than `after` (from the beginning when
    /// `after` is `None`). An empty batch means the iteration is done.
    fn next_batch(&self, after: Option<Timestamp>, limit: usize) -> Result<Vec<Record>, StoreError>;
}

/// In-memory history keyed by timestamp.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<BTreeMap<Timestamp, Record>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history from records in any order.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let history = Self::new();
        for record in records {
            history.insert(record);
        }
        history
    }

    /// Inserts a record, replacing any record with the same timestamp.
    pub fn insert(&self, record: Record) {
        let mut records = self.records.lock().expect("history lock poisoned");
        records.insert(record.timestamp(), record);
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistory {
    fn count_newer(&self, since: Option<Timestamp>) -> Result<u64, StoreError> {
        let records = self.records.lock().expect("history lock poisoned");
        let count = match since {
            None => records.len(),
            Some(since) => records
                .range((Bound::Excluded(since), Bound::Unbounded))
                .count(),
        };
        Ok(count as u64)
    }

    fn next_batch(&self, after: Option<Timestamp>, limit: usize) -> Result<Vec<Record>, StoreError> {
        let records = self.records.lock().expect("history lock poisoned");
        let lower = match after {
            None => Bound::Unbounded,
            Some(after) => Bound::Excluded(after),
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;

    fn history(timestamps: &[i64]) -> MemoryHistory {
        MemoryHistory::from_records(timestamps.iter().map(|ts| record(*ts)))
    }

    #[test]
    fn count_newer_is_strictly_greater() {
        let store = history(&[10, 20, 30, 40, 50]);

        assert_eq!(store.count_newer(None).unwrap(), 5);
        assert_eq!(store.count_newer(Some(Timestamp(30))).unwrap(), 2);
        assert_eq!(store.count_newer(Some(Timestamp(50))).unwrap(), 0);
        assert_eq!(store.count_newer(Some(Timestamp(0))).unwrap(), 5);
    }

    #[test]
    fn batches_paginate_ascending_by_cursor() {
        let store = history(&[50, 10, 40, 20, 30]);

        let first = store.next_batch(None, 2).unwrap();
        let stamps: Vec<_> = first.iter().map(|r| r.timestamp().as_secs()).collect();
        assert_eq!(stamps, vec![10, 20]);

        let second = store.next_batch(Some(Timestamp(20)), 2).unwrap();
        let stamps: Vec<_> = second.iter().map(|r| r.timestamp().as_secs()).collect();
        assert_eq!(stamps, vec![30, 40]);

        let third = store.next_batch(Some(Timestamp(40)), 2).unwrap();
        let stamps: Vec<_> = third.iter().map(|r| r.timestamp().as_secs()).collect();
        assert_eq!(stamps, vec![50]);

        assert!(store.next_batch(Some(Timestamp(50)), 2).unwrap().is_empty());
    }

    #[test]
    fn duplicate_timestamp_replaces_record() {
        let store = history(&[10]);
        store.insert(record(10));
        assert_eq!(store.len(), 1);
    }
}
