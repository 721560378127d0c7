use std::sync::{Arc, Mutex, MutexGuard};

use stream_api::{FormatState, Key, Message, MessageKind, StreamError, TSamples, Uuid};

use crate::client::StreamClient;
use crate::router::MessageRouter;

/// Transformation applied to every relayed TSamples value.
pub trait SampleModel: Send + Sync {
    fn apply(&self, samples: TSamples) -> Result<TSamples, StreamError>;
}

/// Identity model: samples are re-published as received.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl SampleModel for Passthrough {
    fn apply(&self, samples: TSamples) -> Result<TSamples, StreamError> {
        Ok(samples)
    }
}

/// Receives `tsamples` on one topic and publishes the model's output on another
/// under a fixed key uid.
#[derive(Clone)]
pub struct TSampleRelay {
    client: Arc<StreamClient>,
    send_topic: String,
    key_uid: Uuid,
    model: Arc<dyn SampleModel>,
    formats: Arc<Mutex<FormatState>>,
}

impl TSampleRelay {
    pub fn new(client: Arc<StreamClient>, send_topic: impl Into<String>, key_uid: Uuid) -> Self {
        Self {
            client,
            send_topic: send_topic.into(),
            key_uid,
            model: Arc::new(Passthrough),
            formats: Arc::new(Mutex::new(FormatState::default())),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn SampleModel>) -> Self {
        self.model = model;
        self
    }

    pub fn send_topic(&self) -> &str {
        &self.send_topic
    }

    pub fn key_uid(&self) -> Uuid {
        self.key_uid
    }

    /// Format hashes produced by the relay so far.
    pub fn formats(&self) -> FormatState {
        self.state().clone()
    }

    /// Route `tsamples` arriving on `subscribe_topic` through this relay.
    pub fn attach(&self, router: &mut MessageRouter, subscribe_topic: impl Into<String>) {
        let subscribe_topic = subscribe_topic.into();
        tracing::info!(from = %subscribe_topic, to = %self.send_topic, key_uid = %self.key_uid, "tsamples relay attached");
        let relay = self.clone();
        router.on_tsamples(subscribe_topic, move |_, samples| {
            let relay = relay.clone();
            async move { relay.relay(samples).await }
        });
    }

    /// Apply the model, re-derive the data format and publish.
    pub async fn relay(&self, samples: TSamples) -> Result<(), StreamError> {
        let mut out = self.model.apply(samples)?;
        // the inbound hash does not describe the output
        out.data_format_id = None;

        let codec = self.client.codec();
        let id = codec.populate_data_format(&mut out).await?;
        self.state().data_format_id = Some(id.clone());

        let key = Key::new(MessageKind::TSamples, self.key_uid);
        self.client
            .publish_message(&self.send_topic, &key, &Message::TSamples(out))
            .await?;
        tracing::debug!(topic = %self.send_topic, format = %id, "tsamples relayed");
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, FormatState> {
        match self.formats.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("relay format state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
