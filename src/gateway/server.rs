//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::proxy::ProxyDispatcher;
use crate::{Error, Result};

/// Directory proxy server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared request orchestrator
    dispatcher: Arc<ProxyDispatcher>,
}

impl Gateway {
    /// Create a new gateway; builds the outbound pool and token providers once
    pub fn new(config: Config) -> Result<Self> {
        let dispatcher = Arc::new(ProxyDispatcher::from_config(&config)?);
        Ok(Self { config, dispatcher })
    }

    /// Router serving this gateway's state
    #[must_use]
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            api_prefix: self.config.server.api_prefix.clone(),
        });
        create_router(state, self.config.server.max_body_size)
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("DIRECTORY PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(prefix = %self.config.server.api_prefix, routes = self.config.routes.len(), "Proxying");
        for rule in &self.config.routes {
            info!("  {} -> {}", rule.match_prefix, rule.application_name);
        }
        info!(hosts = ?self.config.allowlist.hosts, "Outbound allow-list");
        info!("============================================================");

        self.serve(listener).await
    }

    /// Serve on an already-bound listener with graceful drain
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let app = self.router();
        let drain_timeout = self.config.server.shutdown_timeout;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
        });

        tokio::select! {
            result = &mut server => return flatten(result),
            () = shutdown_signal() => {}
        }

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(drain_timeout, server).await {
            Ok(result) => flatten(result),
            Err(_) => {
                warn!(timeout = ?drain_timeout, "In-flight requests did not drain in time");
                Ok(())
            }
        }
    }
}

fn flatten(
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(served) => served.map_err(Error::Io),
        Err(e) => Err(Error::Internal(format!("Server task failed: {e}"))),
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
