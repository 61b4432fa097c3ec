//! Token provider with single-flight refresh

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::client::OAuthClientConfig;
use super::token::CachedToken;
use crate::Result;
use crate::transport::PooledTransport;

/// Obtains and caches bearer tokens for one [`OAuthClientConfig`].
///
/// Exactly one provider exists per configured actor for the process lifetime;
/// it is constructed at startup and injected where tokens are needed.
/// Refresh is single-flight: while one caller talks to the token endpoint,
/// every other caller waits on `refresh_lock` and then reads the fresh token.
pub struct OAuthTokenProvider {
    /// Client configuration
    config: OAuthClientConfig,

    /// Shared outbound pool; grant requests count against its bound
    transport: Arc<PooledTransport>,

    /// Current token (cached)
    current_token: RwLock<Option<CachedToken>>,

    /// Held for the duration of an upstream token request
    refresh_lock: Mutex<()>,

    /// Tokens are treated as expired this long before their real expiry
    expiry_skew: Duration,

    /// Number of upstream token requests issued
    upstream_requests: AtomicU64,
}

impl OAuthTokenProvider {
    /// Create a provider for one client configuration
    #[must_use]
    pub fn new(
        config: OAuthClientConfig,
        transport: Arc<PooledTransport>,
        expiry_skew: Duration,
    ) -> Self {
        Self {
            config,
            transport,
            current_token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            expiry_skew,
            upstream_requests: AtomicU64::new(0),
        }
    }

    /// Client configuration this provider serves
    #[must_use]
    pub fn config(&self) -> &OAuthClientConfig {
        &self.config
    }

    /// Get a valid bearer token, requesting a new one when absent or expired
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AuthProviderUnreachable`] or
    /// [`crate::Error::AuthCredentialsRejected`] when the grant request fails.
    /// Failures are not cached; the next call retries.
    pub async fn get_bearer_token(&self) -> Result<String> {
        if let Some(token) = self.cached() {
            debug!(client_id = %self.config.client_id, "Token cache hit");
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.cached() {
            debug!(client_id = %self.config.client_id, "Token refreshed by concurrent caller");
            return Ok(token);
        }

        let _permit = self.transport.acquire().await?;
        self.upstream_requests.fetch_add(1, Ordering::Relaxed);
        let token = self.config.request_token(self.transport.client()).await?;

        info!(
            client_id = %self.config.client_id,
            expires_in = ?token.time_until_expiry(),
            "Token refreshed"
        );

        let value = token.value.clone();
        *self.current_token.write() = Some(token);
        Ok(value)
    }

    /// Check if the provider holds a non-expired token
    #[must_use]
    pub fn has_valid_token(&self) -> bool {
        self.cached().is_some()
    }

    /// Drop the cached token; the next call requests a new one
    pub fn reset(&self) {
        *self.current_token.write() = None;
    }

    /// Number of grant requests sent to the token endpoint so far
    #[must_use]
    pub fn upstream_requests(&self) -> u64 {
        self.upstream_requests.load(Ordering::Relaxed)
    }

    fn cached(&self) -> Option<String> {
        let token = self.current_token.read();
        token
            .as_ref()
            .filter(|t| !t.is_expired(self.expiry_skew))
            .map(|t| t.value.clone())
    }
}
