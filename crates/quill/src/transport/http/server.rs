//! Listener setup and graceful shutdown for the quill HTTP server.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::service::GenerationService;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Bind the listen address. `host` may be a hostname, an IPv4 address, or
/// a bare IPv6 address; the first resolved address that accepts the bind wins.
async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))
}

/// Serve generation requests until a signal or `/shutdown` arrives.
///
/// Once shutdown begins the admission pool is closed, so queued requests
/// answer 503 and only in-flight generations hold the drain open.
pub async fn serve(config: ServerConfig, service: Arc<GenerationService>) -> anyhow::Result<()> {
    let listener = bind(&config).await?;
    let shutdown_rx = service.shutdown_rx();
    let app = routes(Arc::clone(&service));

    info!(
        addr = %listener.local_addr()?,
        capacity = service.pool().capacity(),
        max_waiters = ?service.pool().max_waiters(),
        "quill listening"
    );

    let draining = Arc::clone(&service);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_rx).await;
            draining.trigger_shutdown();
        })
        .await?;

    info!("quill stopped");

    Ok(())
}

/// Resolves on SIGINT, SIGTERM, or the shutdown flag flipping to `true`.
///
/// # Panics
///
/// Panics if the signal handlers cannot be registered.
async fn shutdown_signal(mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler - is tokio runtime configured correctly?");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler - is tokio runtime configured correctly?")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("SIGINT received, draining generations");
        }
        _ = terminate => {
            info!("SIGTERM received, draining generations");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested over HTTP, draining generations");
        }
    }
}
