use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stream_api::{Key, Message, MessageKind, RawRecord, RecordHandler, SessionInfo, StreamError, TSamples, TelemetryData};
use stream_codec::MessageCodec;

use crate::client::StreamClient;

type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send>>;
type Callback = Arc<dyn Fn(Key, Message) -> CallbackFuture + Send + Sync>;

/// Dispatches decoded messages to callbacks keyed by `(topic, kind)`.
///
/// Messages without a callback are dropped silently.
pub struct MessageRouter {
    codec: Arc<MessageCodec>,
    routes: HashMap<(String, MessageKind), Callback>,
}

impl MessageRouter {
    pub fn new(codec: Arc<MessageCodec>) -> Self {
        Self {
            codec,
            routes: HashMap::new(),
        }
    }

    /// Register `callback` for `kind` messages on `topic`. Replaces a previous one.
    pub fn on<F, Fut>(&mut self, topic: impl Into<String>, kind: MessageKind, callback: F) -> &mut Self
    where
        F: Fn(Key, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let callback: Callback =
            Arc::new(move |key: Key, message: Message| -> CallbackFuture { Box::pin(callback(key, message)) });
        self.insert(topic.into(), kind, callback)
    }

    pub fn on_tsamples<F, Fut>(&mut self, topic: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(Key, TSamples) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |key: Key, message: Message| -> CallbackFuture {
            match message {
                Message::TSamples(ts) => Box::pin(callback(key, ts)),
                other => mismatched(MessageKind::TSamples, &other),
            }
        });
        self.insert(topic.into(), MessageKind::TSamples, callback)
    }

    pub fn on_tdata<F, Fut>(&mut self, topic: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(Key, TelemetryData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |key: Key, message: Message| -> CallbackFuture {
            match message {
                Message::TData(data) => Box::pin(callback(key, data)),
                other => mismatched(MessageKind::TData, &other),
            }
        });
        self.insert(topic.into(), MessageKind::TData, callback)
    }

    pub fn on_session<F, Fut>(&mut self, topic: impl Into<String>, callback: F) -> &mut Self
    where
        F: Fn(Key, SessionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |key: Key, message: Message| -> CallbackFuture {
            match message {
                Message::Session(info) => Box::pin(callback(key, info)),
                other => mismatched(MessageKind::Session, &other),
            }
        });
        self.insert(topic.into(), MessageKind::Session, callback)
    }

    pub fn has_route(&self, topic: &str, kind: MessageKind) -> bool {
        self.routes.contains_key(&(topic.to_string(), kind))
    }

    /// Topics with at least one callback, sorted.
    pub fn topics(&self) -> Vec<String> {
        let topics: BTreeSet<&String> = self.routes.keys().map(|(topic, _)| topic).collect();
        topics.into_iter().cloned().collect()
    }

    /// Invoke the callback for `(topic, message.kind())`.
    ///
    /// `Ok(false)` if nothing is registered.
    pub async fn dispatch(&self, topic: &str, key: Key, message: Message) -> Result<bool, StreamError> {
        let kind = message.kind();
        let Some(callback) = self.routes.get(&(topic.to_string(), kind)).cloned() else {
            tracing::trace!(%topic, %kind, "no route, dropping message");
            return Ok(false);
        };
        callback(key, message)
            .await
            .map_err(|e| e.with_context(format!("{kind} callback on '{topic}'")))?;
        Ok(true)
    }

    /// Register this router as the handler of each of its topics.
    pub fn attach(self: &Arc<Self>, client: &StreamClient) {
        for topic in self.topics() {
            tracing::debug!(%topic, "router attached");
            client.subscribe(topic, self.clone() as Arc<dyn RecordHandler>);
        }
    }

    fn insert(&mut self, topic: String, kind: MessageKind, callback: Callback) -> &mut Self {
        if self.routes.insert((topic.clone(), kind), callback).is_some() {
            tracing::debug!(%topic, %kind, "replaced route");
        }
        self
    }

    async fn route(&self, record: RawRecord) -> Result<(), StreamError> {
        let key = MessageCodec::record_key(&record)?;
        if !self.has_route(&record.topic, key.kind) {
            tracing::trace!(topic = %record.topic, kind = %key.kind, "no route, skipping decode");
            return Ok(());
        }
        let value = record
            .value
            .as_deref()
            .ok_or_else(|| StreamError::decode(format!("record {key} has no value")))?;
        let message = self.codec.decode_value(key.kind, value).await?;
        self.dispatch(&record.topic, key, message).await?;
        Ok(())
    }
}

fn mismatched(expected: MessageKind, got: &Message) -> CallbackFuture {
    let err = StreamError::handler(format!("expected {expected} message, got {}", got.kind()));
    Box::pin(async move { Err(err) })
}

impl RecordHandler for MessageRouter {
    fn handle(&self, record: RawRecord) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        Box::pin(self.route(record))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dependency_client::{DataFormatClient, MemoryDependencyClient};
    use stream_api::{SessionState, Uuid};

    use super::*;

    fn router() -> MessageRouter {
        let formats = Arc::new(DataFormatClient::new(Arc::new(MemoryDependencyClient::new())));
        MessageRouter::new(Arc::new(MessageCodec::new(formats)))
    }

    fn session(identifier: &str) -> Message {
        Message::Session(SessionInfo {
            identifier: identifier.into(),
            state: SessionState::Open,
            data_format_id: None,
            atlas_configuration_id: None,
        })
    }

    #[tokio::test]
    async fn dispatch_by_topic_and_kind() {
        let mut router = router();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.on_session("MIST", move |_, info| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(info.identifier);
                Ok(())
            }
        });

        let key = Key::new(MessageKind::Session, Uuid::new_v4());
        assert!(router.dispatch("MIST", key, session("FP1")).await.unwrap());
        assert!(!router.dispatch("OTHER", key, session("FP2")).await.unwrap());
        let tdata_key = Key::new(MessageKind::TData, Uuid::new_v4());
        let data = TelemetryData {
            data_format_id: None,
            feed: String::new(),
            parameters: vec![],
            time: vec![],
            values: vec![],
        };
        assert!(!router.dispatch("MIST", tdata_key, Message::TData(data)).await.unwrap());

        assert_eq!(*seen.lock().unwrap(), vec!["FP1".to_string()]);
        assert_eq!(router.topics(), vec!["MIST".to_string()]);
    }

    #[tokio::test]
    async fn unrouted_records_are_not_decoded() {
        let mut router = router();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        router.on("MIST", MessageKind::TSamples, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        // session key with a garbage value: no route, so no decode error
        let key = MessageCodec::encode_key(&Key::new(MessageKind::Session, Uuid::new_v4())).unwrap();
        let record = RawRecord {
            topic: "MIST".into(),
            partition: 0,
            offset: 7,
            ts_ms: 0,
            key: Some(key),
            value: Some(b"garbage".to_vec()),
        };
        router.handle(record).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_error_carries_context() {
        let mut router = router();
        router.on_session("MIST", |_, _| async { Err(StreamError::handler("boom")) });

        let key = Key::new(MessageKind::Session, Uuid::new_v4());
        let err = router.dispatch("MIST", key, session("FP1")).await.unwrap_err();
        assert!(matches!(err, StreamError::Handler(ref msg) if msg.contains("boom") && msg.contains("MIST")), "{err:?}");
    }
}
