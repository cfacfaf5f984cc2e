mod config;
mod error;
mod handlers;
mod models;
mod rate_limit;
mod router;
mod state;

use anyhow::Context;
use config::GatewayConfig;
use live_state::LiveState;
use live_state::ingestion::{self, ReplaySource};
use rate_limit::RateLimiter;
use router::create_router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env().context("invalid configuration")?;
    tracing::info!(bind_addr = %config.bind_addr, replay = ?config.replay_file, "Starting live timing gateway");

    let live = Arc::new(LiveState::with_config(config.live.clone())?);
    let (feed, channel_source) = ingestion::channel(config.ingest_queue);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One source drives the pipeline: a recorded session when configured,
    // otherwise whatever arrives through /v1/ingest.
    let pipeline = live.pipeline();
    let ingest_task = match &config.replay_file {
        Some(path) => {
            let source = ReplaySource::open(path, config.replay.clone()).await?;
            tokio::spawn(async move { pipeline.run(source, shutdown_rx).await })
        }
        None => tokio::spawn(async move { pipeline.run(channel_source, shutdown_rx).await }),
    };

    let state = AppState::new(Arc::clone(&live), feed)
        .with_rate_limiter(RateLimiter::new(config.connect_burst, config.connect_per_sec));

    let rate_limiter = Arc::clone(&state.rate_limiter);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let pruned = rate_limiter.prune_idle(RATE_LIMIT_PRUNE_INTERVAL);
            if pruned > 0 {
                tracing::debug!(
                    pruned,
                    remaining = rate_limiter.tracked_clients(),
                    "Pruned idle rate limit buckets"
                );
            }
        }
    });

    // Create router
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            // Ends open SSE and WebSocket streams so connections can drain.
            live.shutdown();
        })
        .await?;

    let stats = ingest_task.await?;
    tracing::info!(
        messages = stats.messages_received,
        bytes = stats.bytes_received,
        "Gateway stopped"
    );

    Ok(())
}
