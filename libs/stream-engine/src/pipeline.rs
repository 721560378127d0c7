use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stream_api::{Key, Message, RawRecord, RecordSubscription, SessionState, StreamError, StreamTransport};
use stream_codec::MessageCodec;

/// Where a record was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOrigin {
    pub topic: String,
    pub stream_id: String,
    pub partition: i32,
    pub offset: i64,
}

/// Session-scoped consumer, created lazily by a [`StreamPipeline`] factory.
pub trait StreamInput: Send {
    fn on_message<'a>(
        &'a mut self,
        origin: &'a MessageOrigin,
        key: &'a Key,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + 'a>>;

    /// The session ended (a `closed` session message, or the pipeline stopped).
    fn on_closed(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Lifecycle of a session seen by a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Counters returned when a pipeline finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub sessions: usize,
    pub delivered: u64,
    pub skipped: u64,
    pub dropped_closed: u64,
}

type Sessions = Arc<Mutex<BTreeMap<String, SessionStatus>>>;

// ═══════════════════════════════════════════════════════════════
//  TopicStream — builder
// ═══════════════════════════════════════════════════════════════

/// `client.stream_topic(topic).into(factory)`.
pub struct TopicStream {
    transport: Arc<dyn StreamTransport>,
    codec: Arc<MessageCodec>,
    topic: String,
}

impl TopicStream {
    pub(crate) fn new(transport: Arc<dyn StreamTransport>, codec: Arc<MessageCodec>, topic: String) -> Self {
        Self { transport, codec, topic }
    }

    /// Subscribe to the topic and start the pipeline.
    ///
    /// `factory(stream_id)` runs exactly once per new stream id; later records
    /// of that session go to the same input. The subscription exists before
    /// this returns, so records published afterwards are not lost.
    #[allow(clippy::should_implement_trait)]
    pub async fn into<F>(self, factory: F) -> Result<StreamPipeline, StreamError>
    where
        F: FnMut(&str) -> Box<dyn StreamInput> + Send + 'static,
    {
        let subscription = self.transport.subscribe(std::slice::from_ref(&self.topic)).await?;
        let token = CancellationToken::new();
        let sessions: Sessions = Arc::new(Mutex::new(BTreeMap::new()));

        let worker = PipelineWorker {
            topic: self.topic.clone(),
            codec: self.codec,
            factory: Box::new(factory),
            inputs: HashMap::new(),
            sessions: sessions.clone(),
            report: PipelineReport::default(),
        };
        let handle = tokio::spawn(worker.run(subscription, token.clone()));
        tracing::info!(topic = %self.topic, "stream pipeline started");

        Ok(StreamPipeline {
            topic: self.topic,
            token,
            handle,
            sessions,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  StreamPipeline — handle
// ═══════════════════════════════════════════════════════════════

pub struct StreamPipeline {
    topic: String,
    token: CancellationToken,
    handle: JoinHandle<PipelineReport>,
    sessions: Sessions,
}

impl StreamPipeline {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Snapshot of every session seen so far.
    pub fn sessions(&self) -> Vec<(String, SessionStatus)> {
        lock(&self.sessions).iter().map(|(id, s)| (id.clone(), *s)).collect()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel, close every open session, wait for the task.
    pub async fn stop(self) -> PipelineReport {
        self.token.cancel();
        self.join().await
    }

    /// Wait until the subscription closes or the token is cancelled.
    pub async fn join(self) -> PipelineReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "stream pipeline task failed");
                PipelineReport::default()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Worker
// ═══════════════════════════════════════════════════════════════

struct SessionSlot {
    input: Box<dyn StreamInput>,
    closed: bool,
}

struct PipelineWorker {
    topic: String,
    codec: Arc<MessageCodec>,
    factory: Box<dyn FnMut(&str) -> Box<dyn StreamInput> + Send>,
    inputs: HashMap<String, SessionSlot>,
    sessions: Sessions,
    report: PipelineReport,
}

impl PipelineWorker {
    async fn run(mut self, mut subscription: Box<dyn RecordSubscription>, token: CancellationToken) -> PipelineReport {
        loop {
            let next = tokio::select! {
                next = subscription.recv() => next,
                _ = token.cancelled() => break,
            };
            match next {
                Some(Ok(record)) => self.handle_record(record).await,
                Some(Err(e)) => tracing::warn!(topic = %self.topic, error = %e, "receive error"),
                None => break,
            }
        }

        for (stream_id, slot) in self.inputs.iter_mut() {
            if !slot.closed {
                slot.input.on_closed().await;
                slot.closed = true;
                lock(&self.sessions).insert(stream_id.clone(), SessionStatus::Closed);
            }
        }

        self.report.sessions = self.inputs.len();
        tracing::info!(
            topic = %self.topic,
            sessions = self.report.sessions,
            delivered = self.report.delivered,
            "stream pipeline finished"
        );
        self.report
    }

    async fn handle_record(&mut self, record: RawRecord) {
        let (key, message) = match self.codec.decode(&record).await {
            Ok(decoded) => decoded,
            Err(e) => {
                self.report.skipped += 1;
                tracing::warn!(topic = %self.topic, offset = record.offset, error = %e, "bad record, skipping");
                return;
            }
        };

        let stream_id = key.stream_id();
        let origin = MessageOrigin {
            topic: record.topic,
            stream_id: stream_id.clone(),
            partition: record.partition,
            offset: record.offset,
        };

        if !self.inputs.contains_key(&stream_id) {
            tracing::info!(topic = %self.topic, %stream_id, "streaming session");
            let input = (self.factory)(&stream_id);
            lock(&self.sessions).insert(stream_id.clone(), SessionStatus::Open);
            self.inputs.insert(stream_id.clone(), SessionSlot { input, closed: false });
        }
        let Some(slot) = self.inputs.get_mut(&stream_id) else {
            return;
        };

        if slot.closed {
            self.report.dropped_closed += 1;
            tracing::debug!(topic = %self.topic, %stream_id, "record for closed session, dropping");
            return;
        }

        match slot.input.on_message(&origin, &key, &message).await {
            Ok(()) => self.report.delivered += 1,
            Err(e) => tracing::error!(topic = %self.topic, %stream_id, error = %e, "stream input error"),
        }

        if matches!(&message, Message::Session(info) if info.state == SessionState::Closed) {
            slot.input.on_closed().await;
            slot.closed = true;
            lock(&self.sessions).insert(stream_id.clone(), SessionStatus::Closed);
            tracing::info!(topic = %self.topic, %stream_id, "session closed");
        }
    }
}

fn lock(sessions: &Sessions) -> std::sync::MutexGuard<'_, BTreeMap<String, SessionStatus>> {
    match sessions.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("pipeline session lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
