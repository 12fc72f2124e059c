//! Workflow job relay web server.
//!
//! This binary:
//! - Receives `workflow_job` webhooks and verifies their signature
//! - Publishes one pool message per queued job
//! - Pulls and acknowledges one pool message per completed job
//!
//! On SIGINT/SIGTERM it stops accepting connections, gives in-flight
//! requests a bounded grace period, then exits.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal, sync::Notify};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobrelay::web::{router, AppState};
use jobrelay::{queue, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("relay_starting");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        port = config.port,
        backend = ?config.queue_backend,
        topic = %config.topic,
        subscription = %config.subscription,
        max_body_bytes = config.max_body_bytes,
        queue_timeout_ms = config.queue_timeout_ms,
        "config_loaded"
    );

    let queue_client = queue::connect(&config).context("Failed to create queue client")?;

    let grace = config.shutdown_grace();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(AppState::new(config, Arc::clone(&queue_client)));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "relay_listening");

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = Arc::clone(&shutdown);
        async move {
            shutdown_signal().await;
            shutdown.notify_one();
        }
    })
    .into_future();

    // In-flight requests get `grace` to finish once the signal arrives.
    let deadline = async {
        shutdown.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result.context("Server error")?,
        _ = deadline => {
            warn!(grace_ms = grace.as_millis() as u64, "relay_shutdown_grace_expired");
        }
    }

    queue_client.close().await;

    info!("relay_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("relay_shutting_down");
}
