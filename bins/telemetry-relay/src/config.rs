use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

pub use transport_kafka::KafkaConfig;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "telemetry-relay", about = "Telemetry stream reader and tsamples relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read session tdata from a topic
    Read(RunArgs),
    /// Relay tsamples from one topic to another
    Relay(RunArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "TELEMETRY_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub dependency_server: DependencyServerConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub read: ReadConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize)]
pub struct DependencyServerConfig {
    pub uri: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl DependencyServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadConfig {
    #[serde(default = "default_read_topic")]
    pub topic: String,
    /// Buffer capacity of each feed.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            topic: default_read_topic(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_subscribe_topic")]
    pub subscribe_topic: String,
    #[serde(default = "default_send_topic")]
    pub send_topic: String,
    /// Random v4 when absent.
    #[serde(default)]
    pub key_uid: Option<Uuid>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subscribe_topic: default_subscribe_topic(),
            send_topic: default_send_topic(),
            key_uid: None,
        }
    }
}

fn default_group() -> String {
    "dev".to_string()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_read_topic() -> String {
    "test_topic".to_string()
}
fn default_buffer_capacity() -> usize {
    stream_engine::DEFAULT_BUFFER_CAPACITY
}
fn default_subscribe_topic() -> String {
    "MIST".to_string()
}
fn default_send_topic() -> String {
    "relay_out".to_string()
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &str) -> Result<Self, CliError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CliError::Config { context: "parse", detail: format!("'{path}': {e}") })?;
        config
            .kafka
            .validate()
            .map_err(|e| CliError::Config { context: "kafka", detail: e.to_string() })?;
        if config.read.buffer_capacity == 0 {
            return Err(CliError::Config {
                context: "read",
                detail: "buffer_capacity must be > 0".to_string(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[dependency_server]
uri = "http://localhost:8180/api/dependencies"
group = "dev"
timeout_ms = 2500

[kafka]
bootstrap_servers = "localhost:9092"
consumer_group = "dev"
auto_offset_reset = "earliest"

[kafka.properties]
"client.id" = "telemetry-relay"

[read]
topic = "test_topic"
buffer_capacity = 64

[relay]
subscribe_topic = "MIST"
send_topic = "MIST_OUT"
key_uid = "6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11"
"#;

    #[test]
    fn parses_full_config() {
        let cfg = AppConfig::parse(FULL, "test.toml").unwrap();
        assert_eq!(cfg.dependency_server.timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.kafka.auto_offset_reset, "earliest");
        assert_eq!(cfg.kafka.properties["client.id"], "telemetry-relay");
        assert_eq!(cfg.read.buffer_capacity, 64);
        assert_eq!(cfg.relay.send_topic, "MIST_OUT");
        assert_eq!(
            cfg.relay.key_uid.map(|u| u.to_string()).as_deref(),
            Some("6f2c1a52-2d6e-4b8e-9d43-6b8f2a9e0c11")
        );
    }

    #[test]
    fn sections_default() {
        let cfg = AppConfig::parse(
            r#"
[dependency_server]
uri = "http://deps"
[kafka]
bootstrap_servers = "k:9092"
consumer_group = "g"
"#,
            "min.toml",
        )
        .unwrap();
        assert_eq!(cfg.dependency_server.group, "dev");
        assert_eq!(cfg.read.topic, "test_topic");
        assert_eq!(cfg.relay.subscribe_topic, "MIST");
        assert!(cfg.relay.key_uid.is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = AppConfig::parse("[kafka]\nbootstrap_servers = 1", "bad.toml").unwrap_err();
        assert!(matches!(err, CliError::Config { context: "parse", .. }), "{err}");

        let bad_reset = FULL.replace("earliest", "tomorrow");
        let err = AppConfig::parse(&bad_reset, "bad.toml").unwrap_err();
        assert!(matches!(err, CliError::Config { context: "kafka", .. }), "{err}");
    }
}
