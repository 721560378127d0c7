use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use stream_api::{Key, Message, RecordHandler, StreamError, StreamTransport};
use stream_codec::MessageCodec;

use crate::pipeline::TopicStream;

/// Counters returned by [`StreamClient::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    /// Records handed to a handler without error.
    pub handled: u64,
    /// Bad input records (decode / unresolved format), logged and skipped.
    pub skipped: u64,
    /// Handler or transport errors, logged.
    pub failed: u64,
    /// Records for topics without a handler.
    pub unrouted: u64,
}

/// Topic-level adapter over a [`StreamTransport`].
///
/// Handlers are registered per topic; [`run`](Self::run) drives a single
/// polling loop over all of them.
pub struct StreamClient {
    transport: Arc<dyn StreamTransport>,
    codec: Arc<MessageCodec>,
    handlers: RwLock<HashMap<String, Arc<dyn RecordHandler>>>,
}

impl StreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>, codec: Arc<MessageCodec>) -> Self {
        Self {
            transport,
            codec,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn codec(&self) -> &Arc<MessageCodec> {
        &self.codec
    }

    pub fn transport(&self) -> &Arc<dyn StreamTransport> {
        &self.transport
    }

    /// Register the handler for `topic`. Replaces a previous one.
    pub fn subscribe(&self, topic: impl Into<String>, handler: Arc<dyn RecordHandler>) {
        let topic = topic.into();
        let mut guard = match self.handlers.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("stream client handler lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if guard.insert(topic.clone(), handler).is_some() {
            tracing::debug!(%topic, "replaced topic handler");
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.snapshot().into_keys().collect();
        topics.sort();
        topics
    }

    /// Publish encoded bytes as one record.
    pub async fn publish(&self, topic: &str, key: Vec<u8>, value: Vec<u8>) -> Result<(), StreamError> {
        self.transport
            .publish(topic, key, value)
            .await
            .map_err(|e| e.with_context(format!("publish to '{topic}'")))
    }

    /// Encode with the client's codec and publish.
    pub async fn publish_message(&self, topic: &str, key: &Key, message: &Message) -> Result<(), StreamError> {
        let (key_bytes, value_bytes) = self.codec.encode(key, message).await?;
        self.publish(topic, key_bytes, value_bytes).await
    }

    /// Per-session pipeline over `topic`; see [`TopicStream::into`].
    pub fn stream_topic(&self, topic: impl Into<String>) -> TopicStream {
        TopicStream::new(self.transport.clone(), self.codec.clone(), topic.into())
    }

    /// Polling loop: receive → handler of the record's topic → repeat.
    ///
    /// Ends when `token` is cancelled or the subscription closes.
    /// Errors from individual records never stop the loop.
    pub async fn run(&self, token: CancellationToken) -> Result<ConsumeStats, StreamError> {
        let handlers = self.snapshot();
        if handlers.is_empty() {
            return Err(StreamError::config("no topic handlers registered"));
        }

        let topics: Vec<String> = handlers.keys().cloned().collect();
        let mut subscription = self.transport.subscribe(&topics).await?;
        tracing::info!(topics = ?topics, "consumer started");

        let mut stats = ConsumeStats::default();
        loop {
            let next = tokio::select! {
                next = subscription.recv() => next,
                _ = token.cancelled() => break,
            };

            let record = match next {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    stats.failed += 1;
                    tracing::warn!(error = %e, "receive error");
                    continue;
                }
                None => {
                    tracing::info!("subscription closed");
                    break;
                }
            };

            let Some(handler) = handlers.get(&record.topic) else {
                stats.unrouted += 1;
                tracing::trace!(topic = %record.topic, "no handler for topic, dropping");
                continue;
            };

            let topic = record.topic.clone();
            let offset = record.offset;
            match handler.handle(record).await {
                Ok(()) => stats.handled += 1,
                Err(e) if e.is_skippable() => {
                    stats.skipped += 1;
                    tracing::warn!(%topic, offset, error = %e, "bad record, skipping");
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(%topic, offset, error = %e, "handler error");
                }
            }
        }

        tracing::info!(
            handled = stats.handled,
            skipped = stats.skipped,
            failed = stats.failed,
            "consumer finished"
        );
        Ok(stats)
    }

    fn snapshot(&self) -> HashMap<String, Arc<dyn RecordHandler>> {
        let guard = match self.handlers.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("stream client handler lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }
}
