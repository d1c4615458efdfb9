//! Server lifecycle management
//!
//! Starts the HTTP/WebSocket server and, on shutdown, flushes every open
//! log stream before the process exits.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use steplog_core::{bootstrap::Services, Config};

pub struct SteplogServer {
    config: Config,
    services: Services,
}

impl SteplogServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Start the server and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let http_handle = self.start_http_server(shutdown_rx).await?;
        info!("All servers started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Signal all components to shut down
        let _ = shutdown_tx.send(true);

        self.shutdown().await;
        Ok(())
    }

    /// Final flush of every open stream, bounded by the shutdown timeout
    async fn shutdown(&self) {
        let timeout = Duration::from_secs(self.config.server.shutdown_timeout_seconds);
        info!(
            "Flushing log streams (timeout {}s)...",
            timeout.as_secs()
        );

        match tokio::time::timeout(timeout, self.services.aggregator.shutdown()).await {
            Ok(closed) => info!("Closed {} log stream(s)", closed),
            Err(_) => warn!(
                "Shutdown timeout reached, {} stream(s) may lose buffered entries",
                self.services.aggregator.get_stats().active_streams
            ),
        }

        let stats = self.services.aggregator.get_stats();
        info!(
            entries_persisted = stats.entries_persisted,
            entries_lost = stats.entries_lost,
            "Steplog server stopped"
        );
    }

    /// Bind the listener and serve the router until shutdown
    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let http_router = steplog_api::create_router(
            self.services.aggregator.clone(),
            self.config.server.clone(),
        );

        info!("HTTP server listening on {}", http_addr);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
