//! Session Relay
//!
//! WebSocket coordination server for real-time multi-party sessions.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Spawn the registry actor
//! 3. Bind the HTTP/WebSocket listener
//! 4. Mark ready and serve until SIGTERM/Ctrl+C
//! 5. On shutdown: mark not-ready, stop accepting, cancel the actor tree

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use session_relay::actors::SessionRegistryHandle;
use session_relay::config::Config;
use session_relay::observability::HealthState;
use session_relay::routes::{build_routes, AppState};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting session relay");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        whiteboard_end_grace_seconds = config.whiteboard_end_grace_seconds,
        session_mailbox_capacity = config.session_mailbox_capacity,
        connection_buffer = config.connection_buffer,
        "Configuration loaded successfully"
    );

    let health_state = Arc::new(HealthState::new());
    let registry = SessionRegistryHandle::new(&config);

    let state = Arc::new(AppState {
        registry: registry.clone(),
        config: config.clone(),
    });
    let app = build_routes(state, Arc::clone(&health_state));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!(addr = %config.bind_address, "Listener bound successfully");

    health_state.set_ready();

    let shutdown_health = Arc::clone(&health_state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown...");
        // Stop routing new traffic here before the listener closes.
        shutdown_health.set_not_ready();
    });

    server.await.context("Server failed")?;

    // Cancel the actor tree and give in-flight teardown a moment.
    registry.shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics = registry.metrics();
    info!(
        sessions = metrics.session_count(),
        connections = metrics.connection_count(),
        frames_relayed = metrics.frames_relayed(),
        frames_dropped = metrics.frames_dropped(),
        "Session relay stopped"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
