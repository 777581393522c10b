//! Shared test fixtures: record builders and a scriptable remote endpoint.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use serde_json::json;

use crate::remote::transport::{HttpResponse, RemoteEndpoint, TransportError};
use crate::types::{EntityId, Record, SecurityKey};

/// Builds a plausible archive record with the given timestamp.
pub fn record(ts: i64) -> Record {
    let value = json!({
        "dateTime": ts,
        "outTemp": 21.4,
        "barometer": 1013.2,
        "windSpeed": null,
    });
    match value {
        serde_json::Value::Object(fields) => Record::from_fields(fields).unwrap(),
        _ => unreachable!(),
    }
}

/// One recorded `post_update` call.
#[derive(Debug, Clone)]
pub struct PostCall {
    pub entity: EntityId,
    pub records: Vec<Record>,
}

impl PostCall {
    /// The timestamps in this call, in posted order.
    pub fn timestamps(&self) -> Vec<i64> {
        self.records
            .iter()
            .map(|r| r.timestamp().as_secs())
            .collect()
    }
}

/// A scriptable [`RemoteEndpoint`].
///
/// Responses are consumed front-to-back from per-method scripts; once a
/// script runs dry the fake answers success (HTTP 200 for posts, an empty
/// `[]` row set for queries). Every post is recorded for assertions.
#[derive(Default)]
pub struct FakeRemote {
    post_script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    latest_script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    posts: Mutex<Vec<PostCall>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next `post_update` result.
    pub fn script_post(&self, result: Result<HttpResponse, TransportError>) {
        self.post_script.lock().unwrap().push_back(result);
    }

    /// Queues the next `query_latest` result.
    pub fn script_latest(&self, result: Result<HttpResponse, TransportError>) {
        self.latest_script.lock().unwrap().push_back(result);
    }

    /// Convenience: remote reports `ts` as its latest archive timestamp.
    pub fn latest_is(&self, ts: i64) {
        self.script_latest(Ok(HttpResponse::new(200, format!("[[{ts}]]"))));
    }

    /// All recorded posts.
    pub fn posts(&self) -> Vec<PostCall> {
        self.posts.lock().unwrap().clone()
    }

    /// Timestamps of each recorded post, one `Vec` per call.
    pub fn posted_batches(&self) -> Vec<Vec<i64>> {
        self.posts().iter().map(PostCall::timestamps).collect()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

impl RemoteEndpoint for FakeRemote {
    fn post_update(
        &self,
        entity: &EntityId,
        _key: &SecurityKey,
        records: &[Record],
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        self.posts.lock().unwrap().push(PostCall {
            entity: entity.clone(),
            records: records.to_vec(),
        });
        let result = self
            .post_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::new(200, "OK")));
        async move { result }
    }

    fn query_latest(
        &self,
        _entity: &EntityId,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        let result = self
            .latest_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::new(200, "[]")));
        async move { result }
    }
}
