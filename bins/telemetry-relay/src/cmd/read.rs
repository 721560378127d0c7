use stream_engine::{SessionTelemetryDataInput, StreamInput};

use crate::config::{AppConfig, RunArgs};
use crate::error::CliError;

pub async fn run(args: RunArgs) -> Result<(), CliError> {
    let config = AppConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    let client = super::connect(&config)?;
    let formats = client.codec().formats().clone();
    let capacity = config.read.buffer_capacity;

    let pipeline = client
        .stream_topic(config.read.topic.clone())
        .into(move |stream_id: &str| -> Box<dyn StreamInput> {
            let mut input = SessionTelemetryDataInput::new(stream_id, formats.clone()).with_buffer_capacity(capacity);
            input.bind_default_feed().on_data_buffered(|args| {
                while let Some(data) = args.buffer.get() {
                    tracing::info!(
                        stream_id = %args.origin.stream_id,
                        feed = %args.feed,
                        parameters = data.parameters.len(),
                        samples = data.sample_count(),
                        "telemetry data"
                    );
                }
            });
            Box::new(input)
        })
        .await?;
    tracing::info!(topic = %config.read.topic, "reader ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    let report = pipeline.stop().await;
    tracing::info!(
        sessions = report.sessions,
        delivered = report.delivered,
        skipped = report.skipped,
        dropped_closed = report.dropped_closed,
        "shutdown complete"
    );
    Ok(())
}
