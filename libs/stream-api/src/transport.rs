use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::format::{DependencyKind, FormatId};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// What a bounded subscription channel does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): drop the record and log it if the channel is full.
    Drop,
    /// .send().await: wait for room (back-pressure).
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ════════════════════════════════════════════════════════════════
//  Broker record
// ════════════════════════════════════════════════════════════════

/// One broker record: raw key/value bytes plus topic metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Milliseconds since the Unix epoch.
    pub ts_ms: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

// ════════════════════════════════════════════════════════════════
//  Transport traits
// ════════════════════════════════════════════════════════════════

/// Incoming records of one subscription.
pub trait RecordSubscription: Send {
    /// Next record. `None` once the subscription is closed.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<RawRecord, StreamError>>> + Send + '_>>;
}

/// Pub/sub broker (Kafka, in-memory).
///
/// A transport never interprets the bytes; decoding belongs to the codec.
pub trait StreamTransport: Send + Sync {
    /// Subscribe to a set of topics with one subscription.
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        topics: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn RecordSubscription>, StreamError>> + Send + '_>>;

    /// Publish a record. `Transport` error if the broker is unreachable.
    fn publish(
        &self,
        topic: &str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}

/// Called once for every incoming record of a topic.
pub trait RecordHandler: Send + Sync {
    fn handle(&self, record: RawRecord) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  Dependency service
// ════════════════════════════════════════════════════════════════

/// Remote store of hash-identified dependency documents.
pub trait DependencyClient: Send + Sync {
    /// Fetch a document. `UnresolvedFormat` if unknown or unreachable.
    fn get(
        &self,
        kind: DependencyKind,
        id: &FormatId,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, StreamError>> + Send + '_>>;

    /// Store a document and return its id.
    fn put(
        &self,
        kind: DependencyKind,
        document: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<FormatId, StreamError>> + Send + '_>>;
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
