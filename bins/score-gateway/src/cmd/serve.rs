use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, ServeArgs};
use crate::error::GatewayError;
use ingest_pipeline::{LogPublisher, TcpAcceptor, spawn_source};
use score_api::LogClient;
use score_log::PartitionedLog;

pub async fn run(args: ServeArgs) -> Result<(), GatewayError> {
    tracing::info!("score-gateway starting");

    // --- Load config ---
    let mut config = GatewayConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.log.data_dir = Some(dir);
    }
    config.validate()?;

    // --- Open log ---
    let log = Arc::new(PartitionedLog::open(&config.log)?);

    let pipeline = Arc::new(config.pipeline());
    let publisher = Arc::new(
        LogPublisher::new(log.clone(), &pipeline.publisher)
            .with_max_message_bytes(config.log.max_message_bytes),
    );
    tracing::info!(
        topic = %log.topic(),
        producer_id = publisher.producer_id(),
        ack_mode = ?pipeline.publisher.ack_mode,
        max_in_flight = pipeline.publisher.max_in_flight,
        "publisher ready"
    );

    // --- Listener ---
    let acceptor = TcpAcceptor::bind(&config.listen.addr()).await?;
    tracing::info!(addr = %acceptor.local_addr()?, "listening");

    let token = CancellationToken::new();
    let mut source = spawn_source(acceptor, publisher.clone(), pipeline, token.clone());
    tracing::info!("gateway ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    // Stop accepting; open connections finish their in-flight deliveries
    token.cancel();

    let drain = Duration::from_millis(config.shutdown.drain_timeout_ms);
    if tokio::time::timeout(drain, &mut source).await.is_err() {
        tracing::warn!(drain_ms = config.shutdown.drain_timeout_ms, "drain timeout, aborting");
        // takes the connection tasks down with it
        source.abort();
        let _ = source.await;
    }

    publisher.close();
    if let Err(e) = log.flush().await {
        tracing::error!(error = %e, "flush error");
    }
    log.close();

    tracing::info!("shutdown complete");
    Ok(())
}
