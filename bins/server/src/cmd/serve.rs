use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use channel_engine::ChannelRegistry;
use harness_api_server::AppState;
use harness_core::Harness;

use crate::config::{HarnessConfig, ServeArgs};
use crate::error::ServerError;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("harness-server starting");

    // --- Load config ---
    let config = HarnessConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Loopback channel + harness ---
    let registry = Arc::new(ChannelRegistry::with_faults(config.faults.clone()));
    let settings = config.settings();
    tracing::info!(
        event = %settings.event_name,
        buffer = settings.subscriber_buffer,
        overflow = ?settings.subscriber_overflow,
        max_in_flight = settings.max_in_flight,
        run_timeout_ms = settings.run_timeout.as_millis() as u64,
        "harness configured"
    );
    let harness = Arc::new(Harness::new(registry.clone(), registry.clone(), settings));

    // --- API server (HTTP) ---
    let api_port = args.port.unwrap_or(config.api_port);
    let state = AppState::new(harness);
    let api_token = token.clone();
    let mut api_handle = tokio::spawn(async move {
        if let Err(e) = harness_api_server::run(api_port, state, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!(port = api_port, "api server (http) listening");
    tracing::info!("server ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    // Drain: wait up to 5s for in-flight requests to finish
    if tokio::time::timeout(Duration::from_secs(5), &mut api_handle).await.is_err() {
        tracing::warn!("api server did not stop in time, aborting");
        api_handle.abort();
        let _ = api_handle.await;
    }

    // Held-back loopback events are released before channels go away
    for key in registry.channels().await {
        registry.close(&key).await;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
