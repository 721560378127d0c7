use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dependency_client::DataFormatClient;
use stream_api::{Key, Message, SessionInfo, StreamError, TelemetryData};

use crate::pipeline::{MessageOrigin, StreamInput};

/// Default number of TelemetryData bundles a feed buffer keeps.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

// ═══════════════════════════════════════════════════════════════
//  Buffer
// ═══════════════════════════════════════════════════════════════

/// Ring buffer of received data. When full the oldest bundle is dropped.
#[derive(Debug)]
pub struct TelemetryDataBuffer {
    data: VecDeque<TelemetryData>,
    capacity: usize,
}

impl TelemetryDataBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity.min(65536)),
            capacity,
        }
    }

    /// Take the oldest buffered bundle.
    pub fn get(&mut self) -> Option<TelemetryData> {
        self.data.pop_front()
    }

    /// Take everything buffered, oldest first.
    pub fn drain(&mut self) -> Vec<TelemetryData> {
        self.data.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn push(&mut self, data: TelemetryData) {
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(data);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Feed
// ═══════════════════════════════════════════════════════════════

/// Passed to `data_buffered` listeners.
pub struct TelemetryDataFeedEventArgs<'a> {
    pub feed: &'a str,
    pub buffer: &'a mut TelemetryDataBuffer,
    pub origin: &'a MessageOrigin,
}

type DataBufferedListener = Box<dyn FnMut(&mut TelemetryDataFeedEventArgs<'_>) + Send>;

pub struct TelemetryDataFeed {
    name: String,
    buffer: TelemetryDataBuffer,
    listeners: Vec<DataBufferedListener>,
}

impl TelemetryDataFeed {
    fn new(name: String, capacity: usize) -> Self {
        Self {
            name,
            buffer: TelemetryDataBuffer::new(capacity),
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&mut self) -> &mut TelemetryDataBuffer {
        &mut self.buffer
    }

    /// Called after every bundle appended to this feed's buffer.
    pub fn on_data_buffered<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(&mut TelemetryDataFeedEventArgs<'_>) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
        self
    }

    fn push(&mut self, data: TelemetryData, origin: &MessageOrigin) {
        self.buffer.push(data);
        for listener in self.listeners.iter_mut() {
            let mut args = TelemetryDataFeedEventArgs {
                feed: &self.name,
                buffer: &mut self.buffer,
                origin,
            };
            listener(&mut args);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session input
// ═══════════════════════════════════════════════════════════════

/// Per-session telemetry input: routes `tdata` into bound feeds and tracks
/// the session's own lifecycle messages.
pub struct SessionTelemetryDataInput {
    stream_id: String,
    formats: Arc<DataFormatClient>,
    feeds: HashMap<String, TelemetryDataFeed>,
    buffer_capacity: usize,
    session: Option<SessionInfo>,
    closed: bool,
}

impl SessionTelemetryDataInput {
    pub fn new(stream_id: impl Into<String>, formats: Arc<DataFormatClient>) -> Self {
        Self {
            stream_id: stream_id.into(),
            formats,
            feeds: HashMap::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            session: None,
            closed: false,
        }
    }

    /// Capacity of feeds bound after this call.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn bind_default_feed(&mut self) -> &mut TelemetryDataFeed {
        self.bind_feed("")
    }

    /// Data for feeds that were never bound is dropped.
    pub fn bind_feed(&mut self, name: &str) -> &mut TelemetryDataFeed {
        let capacity = self.buffer_capacity;
        self.feeds
            .entry(name.to_string())
            .or_insert_with(|| TelemetryDataFeed::new(name.to_string(), capacity))
    }

    pub fn feed(&mut self, name: &str) -> Option<&mut TelemetryDataFeed> {
        self.feeds.get_mut(name)
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn handle(&mut self, origin: &MessageOrigin, message: &Message) -> Result<(), StreamError> {
        match message {
            Message::TData(data) => match self.feeds.get_mut(&data.feed) {
                Some(feed) => feed.push(data.clone(), origin),
                None => {
                    tracing::trace!(stream_id = %self.stream_id, feed = %data.feed, "data for unbound feed, dropping");
                }
            },
            Message::Session(info) => {
                if let Some(id) = &info.data_format_id {
                    // Warm the cache so this session's tdata decodes without a server round trip.
                    if let Err(e) = self.formats.resolve(id).await {
                        tracing::warn!(stream_id = %self.stream_id, format = %id, error = %e, "prefetch data format failed");
                    }
                }
                tracing::debug!(
                    stream_id = %self.stream_id,
                    identifier = %info.identifier,
                    state = ?info.state,
                    "session update"
                );
                self.session = Some(info.clone());
            }
            Message::TSamples(_) => {
                tracing::trace!(stream_id = %self.stream_id, "tsamples ignored by session telemetry input");
            }
        }
        Ok(())
    }
}

impl StreamInput for SessionTelemetryDataInput {
    fn on_message<'a>(
        &'a mut self,
        origin: &'a MessageOrigin,
        _key: &'a Key,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + 'a>> {
        Box::pin(self.handle(origin, message))
    }

    fn on_closed(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed = true;
            tracing::debug!(stream_id = %self.stream_id, "session input closed");
        })
    }
}
