use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stream_engine::{MessageRouter, TSampleRelay};

use crate::config::{AppConfig, RunArgs};
use crate::error::CliError;

pub async fn run(args: RunArgs) -> Result<(), CliError> {
    let config = AppConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    let client = super::connect(&config)?;
    let key_uid = config.relay.key_uid.unwrap_or_else(Uuid::new_v4);
    let relay = TSampleRelay::new(client.clone(), config.relay.send_topic.clone(), key_uid);

    let mut router = MessageRouter::new(client.codec().clone());
    relay.attach(&mut router, config.relay.subscribe_topic.clone());
    Arc::new(router).attach(&client);

    let token = CancellationToken::new();
    let mut consumer = tokio::spawn({
        let client = client.clone();
        let token = token.clone();
        async move { client.run(token).await }
    });
    tracing::info!("relay ready");

    // --- Ожидание Ctrl+C или завершения consumer'а ---
    let stats = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            token.cancel();
            (&mut consumer).await??
        }
        result = &mut consumer => result??,
    };
    let formats = relay.formats();
    tracing::info!(
        handled = stats.handled,
        skipped = stats.skipped,
        failed = stats.failed,
        data_format_id = ?formats.data_format_id,
        "shutdown complete"
    );
    Ok(())
}
