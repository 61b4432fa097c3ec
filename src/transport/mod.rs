//! Pooled keep-alive transport shared by every outbound call

use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::config::TransportConfig;
use crate::{Error, Result};

/// Keep-alive HTTP client plus a bound on concurrent outbound requests.
///
/// Built once at startup. Callers over the bound wait for a permit instead of
/// failing.
pub struct PooledTransport {
    /// HTTP client (connection pool)
    client: Client,
    /// One permit per allowed in-flight request
    permits: Semaphore,
    /// Configured bound
    max_sockets: usize,
}

impl PooledTransport {
    /// Build the pooled client from configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_sockets)
            .pool_idle_timeout(config.idle_timeout)
            .tcp_nodelay(true)
            // A redirect could leave the allow-list; callers see the 3xx instead
            .redirect(reqwest::redirect::Policy::none());

        if config.keep_alive {
            builder = builder.tcp_keepalive(Duration::from_secs(30));
        }

        if config.accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled for outbound requests");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        debug!(
            max_sockets = config.max_sockets,
            max_idle_sockets = config.max_idle_sockets,
            request_timeout = ?config.request_timeout,
            idle_timeout = ?config.idle_timeout,
            "Outbound connection pool ready"
        );

        Ok(Self {
            client,
            permits: Semaphore::new(config.max_sockets),
            max_sockets: config.max_sockets,
        })
    }

    /// Shared HTTP client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Wait for a free outbound slot
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("Transport semaphore closed".to_string()))
    }

    /// Slots currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured bound on concurrent outbound requests
    #[must_use]
    pub fn max_sockets(&self) -> usize {
        self.max_sockets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded_and_returned() {
        let config = TransportConfig {
            max_sockets: 2,
            ..Default::default()
        };
        let transport = PooledTransport::new(&config).unwrap();
        assert_eq!(transport.max_sockets(), 2);

        let a = transport.acquire().await.unwrap();
        let _b = transport.acquire().await.unwrap();
        assert_eq!(transport.available(), 0);

        // A third caller queues rather than failing
        let queued = tokio::time::timeout(Duration::from_millis(50), transport.acquire()).await;
        assert!(queued.is_err());

        drop(a);
        assert_eq!(transport.available(), 1);
        assert!(transport.acquire().await.is_ok());
    }
}
