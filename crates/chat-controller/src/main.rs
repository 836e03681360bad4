//! Chat Controller
//!
//! Stateful WebSocket signaling server for two-party chat and calls.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Connect to Redis (presence, message log, unread counters)
//! 3. Wire application state (presence, messages, call sessions)
//! 4. Bind the HTTP listener (WebSocket endpoint, API views, health probes)
//! 5. Serve until shutdown signal

#![warn(clippy::pedantic)]

use std::sync::Arc;

use anyhow::Context;
use chat_controller::app::{self, AppState};
use chat_controller::config::Config;
use chat_controller::observability::HealthState;
use chat_controller::store::{RedisStore, SharedStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Chat Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        http_bind_address = %config.http_bind_address,
        "Configuration loaded successfully"
    );

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Connect to Redis
    info!("Connecting to Redis...");
    let store: SharedStore = {
        use secrecy::ExposeSecret;
        Arc::new(
            RedisStore::new(config.redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?,
        )
    };
    info!("Redis connection established");

    // Wire application state and routes
    let state = AppState::new(store);
    let router = app::router(state, Arc::clone(&health_state));

    let listener = tokio::net::TcpListener::bind(&config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    health_state.set_ready();
    info!(
        bind_address = %config.http_bind_address,
        "Chat Controller listening"
    );

    // Serve until ctrl-c
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    let serve_health_state = Arc::clone(&health_state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            serve_health_state.set_not_ready();
        })
        .await?;

    info!("Chat Controller stopped");
    Ok(())
}
