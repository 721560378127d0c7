use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message as _;

use stream_api::{RawRecord, RecordSubscription, StreamError, StreamTransport, now_ms};

const OFFSET_RESETS: &[&str] = &["smallest", "earliest", "beginning", "largest", "latest", "end", "error"];

fn default_offset_reset() -> String {
    "latest".to_string()
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

/// `[kafka]` section.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub consumer_group: String,
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// Passed to librdkafka as-is, after the settings above.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            consumer_group: consumer_group.into(),
            auto_offset_reset: default_offset_reset(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            properties: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(StreamError::config("kafka: bootstrap_servers is empty"));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(StreamError::config("kafka: consumer_group is empty"));
        }
        if !OFFSET_RESETS.contains(&self.auto_offset_reset.as_str()) {
            return Err(StreamError::config(format!(
                "kafka: auto_offset_reset '{}' is not one of {}",
                self.auto_offset_reset,
                OFFSET_RESETS.join(", ")
            )));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    fn base(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config
    }

    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = self.base();
        config
            .set("group.id", &self.consumer_group)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.partition.eof", "false");
        for (k, v) in &self.properties {
            config.set(k, v);
        }
        config
    }

    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.base();
        config.set("message.timeout.ms", self.delivery_timeout_ms.to_string());
        for (k, v) in &self.properties {
            config.set(k, v);
        }
        config
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

fn to_record(message: &BorrowedMessage<'_>) -> RawRecord {
    RawRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        ts_ms: message.timestamp().to_millis().unwrap_or_else(now_ms),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
    }
}

impl RecordSubscription for KafkaSubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<RawRecord, StreamError>>> + Send + '_>> {
        Box::pin(async move {
            // A StreamConsumer never closes by itself, so this never yields None.
            match self.consumer.recv().await {
                Ok(message) => Some(Ok(to_record(&message))),
                Err(e) => Some(Err(StreamError::transport(format!("kafka receive: {e}")))),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transport
// ═══════════════════════════════════════════════════════════════

/// Kafka broker: one shared producer, one consumer per subscription.
pub struct KafkaTransport {
    config: KafkaConfig,
    producer: FutureProducer,
}

impl KafkaTransport {
    pub fn new(config: KafkaConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| StreamError::transport(format!("kafka producer: {e}")))?;
        tracing::info!(
            bootstrap_servers = %config.bootstrap_servers,
            group = %config.consumer_group,
            "kafka transport created"
        );
        Ok(Self { config, producer })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    fn consumer(&self, topics: &[String]) -> Result<StreamConsumer, StreamError> {
        if topics.is_empty() {
            return Err(StreamError::config("subscribe: no topics"));
        }
        let consumer: StreamConsumer = self
            .config
            .consumer_config()
            .create()
            .map_err(|e| StreamError::transport(format!("kafka consumer: {e}")))?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&names)
            .map_err(|e| StreamError::transport(format!("kafka subscribe {names:?}: {e}")))?;
        tracing::info!(topics = ?names, group = %self.config.consumer_group, "kafka consumer subscribed");
        Ok(consumer)
    }
}

impl StreamTransport for KafkaTransport {
    fn subscribe(
        &self,
        topics: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn RecordSubscription>, StreamError>> + Send + '_>> {
        let result = self
            .consumer(topics)
            .map(|consumer| Box::new(KafkaSubscription { consumer }) as Box<dyn RecordSubscription>);
        Box::pin(async move { result })
    }

    fn publish(
        &self,
        topic: &str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let record = FutureRecord::to(&topic).key(key.as_slice()).payload(value.as_slice());
            match self.producer.send(record, self.config.delivery_timeout()).await {
                Ok(_) => Ok(()),
                Err((e, _)) => Err(StreamError::transport(format!("kafka publish to '{topic}': {e}"))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg: KafkaConfig = serde_json::from_str(r#"{"bootstrap_servers":"localhost:9092","consumer_group":"dev"}"#).unwrap();
        assert_eq!(cfg, KafkaConfig::new("localhost:9092", "dev"));
        assert_eq!(cfg.auto_offset_reset, "latest");
        assert_eq!(cfg.delivery_timeout(), Duration::from_secs(5));
        cfg.validate().unwrap();
    }

    #[test]
    fn config_rejects_bad_values() {
        let mut cfg = KafkaConfig::new("", "dev");
        assert!(matches!(cfg.validate(), Err(StreamError::Config(_))));

        cfg.bootstrap_servers = "localhost:9092".into();
        cfg.auto_offset_reset = "yesterday".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("yesterday"), "{err}");
    }

    #[test]
    fn client_configs_carry_settings_and_properties() {
        let mut cfg = KafkaConfig::new("broker:9092", "relay");
        cfg.auto_offset_reset = "earliest".into();
        cfg.properties.insert("auto.offset.reset".into(), "latest".into());
        cfg.properties.insert("client.id".into(), "telemetry".into());

        let consumer = cfg.consumer_config();
        assert_eq!(consumer.get("bootstrap.servers"), Some("broker:9092"));
        assert_eq!(consumer.get("group.id"), Some("relay"));
        // properties win over typed settings
        assert_eq!(consumer.get("auto.offset.reset"), Some("latest"));
        assert_eq!(consumer.get("client.id"), Some("telemetry"));

        let producer = cfg.producer_config();
        assert_eq!(producer.get("message.timeout.ms"), Some("5000"));
        assert_eq!(producer.get("group.id"), None);
    }
}
