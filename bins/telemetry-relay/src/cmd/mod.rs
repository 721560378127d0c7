pub mod read;
pub mod relay;

use std::sync::Arc;

use dependency_client::{DataFormatClient, HttpDependencyClient};
use stream_codec::MessageCodec;
use stream_engine::StreamClient;
use transport_kafka::KafkaTransport;

use crate::config::AppConfig;
use crate::error::CliError;

/// Dependency server + Kafka → StreamClient.
fn connect(config: &AppConfig) -> Result<Arc<StreamClient>, CliError> {
    let deps = &config.dependency_server;
    let dependencies = HttpDependencyClient::with_timeout(&deps.uri, &deps.group, deps.timeout())?;
    tracing::info!(uri = %deps.uri, group = %deps.group, "dependency server");

    let formats = Arc::new(DataFormatClient::new(Arc::new(dependencies)));
    let codec = Arc::new(MessageCodec::new(formats));
    let transport = Arc::new(KafkaTransport::new(config.kafka.clone())?);
    Ok(Arc::new(StreamClient::new(transport, codec)))
}
