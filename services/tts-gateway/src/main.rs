//! Text-to-speech gateway
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of upstream API keys
//! 2. Validates inbound synthesis requests
//! 3. Forwards them through the key pool, rotating keys on rate limits and
//!    backing off on gateway timeouts
//! 4. Returns the synthesized audio

mod config;
mod error;
mod metrics;
mod routes;
mod validation;

use anyhow::{Context, Result};
use key_pool::{KeyPool, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use synthesis::HttpSynthesizer;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::routes::{AppState, build_router};

/// How long in-flight requests get to finish once a shutdown signal arrives.
/// Covers a full rotation with backoff at default settings.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting tts-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream_url = %config.upstream.url,
        keys = config.api_keys.len(),
        "configuration loaded"
    );

    let pool = Arc::new(
        KeyPool::new(config.raw_api_keys(), config.pool.clone())
            .context("failed to build key pool")?,
    );

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let synthesizer = Arc::new(HttpSynthesizer::new(
        client,
        config.upstream.url.clone(),
        Duration::from_secs(config.upstream.timeout_secs),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        synthesizer,
        config.retry.clone(),
    ));

    let app_state = AppState {
        orchestrator,
        limits: Arc::new(config.limits.clone()),
        body_limit_bytes: config.server.body_limit_bytes,
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    // Pending recoveries would only re-enable keys in a pool nobody uses
    pool.shutdown().await;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
