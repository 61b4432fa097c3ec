//! Backbone session bridge
//!
//! For exactly one inbound path, the caller's alias and password are exchanged
//! with the backbone service for a session token. The password is bcrypt-hashed
//! before it leaves the proxy; the backbone call is authenticated with the
//! backbone OAuth identity.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::oauth::OAuthTokenProvider;
use crate::transport::PooledTransport;
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    alias: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(default)]
    token: Option<String>,
}

/// HTTP client bound to the backbone session endpoint
pub struct SessionClient {
    http_client: Client,
    url: String,
}

impl SessionClient {
    /// Bind a client to a session endpoint URL
    #[must_use]
    pub fn new(http_client: Client, url: String) -> Self {
        Self { http_client, url }
    }

    /// Session endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchange alias + hashed password for a session token.
    /// `Ok(None)` when the backbone answers without a token.
    pub async fn get_token(
        &self,
        alias: &str,
        hashed_password: &str,
        backbone_token: &str,
    ) -> Result<Option<String>> {
        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(backbone_token)
            .json(&SessionRequest {
                alias,
                password: hashed_password,
            })
            .send()
            .await
            .map_err(|e| Error::SessionExchangeFailed(format!("Backbone request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::SessionExchangeFailed(format!(
                "Backbone returned HTTP {status}"
            )));
        }

        let session: SessionResponse = response.json().await.map_err(|e| {
            Error::SessionExchangeFailed(format!("Failed to parse backbone response: {e}"))
        })?;

        Ok(session.token.filter(|t| !t.is_empty()))
    }
}

/// Produces session tokens for the configured session path
pub struct SessionBridge {
    /// Inbound path that triggers an exchange
    relative_path: String,
    /// Full session endpoint URL
    session_url: String,
    /// bcrypt cost
    hash_cost: u32,
    /// Backbone OAuth identity
    token_provider: Arc<OAuthTokenProvider>,
    /// Shared outbound pool; exchanges count against its bound
    transport: Arc<PooledTransport>,
    /// Created on first exchange
    client: OnceCell<SessionClient>,
}

impl SessionBridge {
    /// Build the bridge; `None` when no session path is configured
    #[must_use]
    pub fn from_config(
        config: &SessionConfig,
        token_provider: Arc<OAuthTokenProvider>,
        transport: Arc<PooledTransport>,
    ) -> Option<Self> {
        let relative_path = config.relative_path.clone()?;
        let backbone_url = config.backbone_url.as_deref()?;

        Some(Self {
            relative_path,
            session_url: format!("{}{}", backbone_url.trim_end_matches('/'), config.sub_path),
            hash_cost: config.hash_cost,
            token_provider,
            transport,
            client: OnceCell::new(),
        })
    }

    /// Whether `path` is exactly the session path
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        path == self.relative_path
    }

    /// Session path this bridge serves
    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Obtain a session token when `path` is the session path; `Ok(None)` otherwise
    ///
    /// # Errors
    ///
    /// [`Error::SessionExchangeFailed`] when the body lacks credentials or the
    /// backbone call fails; token acquisition errors propagate unchanged.
    pub async fn maybe_get_session_token(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<String>> {
        if !self.applies_to(path) {
            return Ok(None);
        }

        let (alias, password) = credentials(body)?;

        let backbone_token = self.token_provider.get_bearer_token().await?;
        let hashed = hash_password(password.to_string(), self.hash_cost).await?;

        let client = self.session_client().await;
        debug!(url = %client.url(), "Exchanging backbone session");

        let token = {
            let _permit = self.transport.acquire().await?;
            client.get_token(alias, &hashed, &backbone_token).await?
        };
        if token.is_some() {
            info!("Backbone session token obtained");
        } else {
            debug!("Backbone returned no session token");
        }
        Ok(token)
    }

    /// Lazily created session client; concurrent first callers share one instance
    async fn session_client(&self) -> &SessionClient {
        self.client
            .get_or_init(|| async {
                SessionClient::new(self.transport.client().clone(), self.session_url.clone())
            })
            .await
    }
}

fn credentials(body: Option<&Value>) -> Result<(&str, &str)> {
    let field = |name: &str| {
        body.and_then(|b| b.get(name))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::SessionExchangeFailed(format!("Request body lacks '{name}'")))
    };
    Ok((field("alias")?, field("password")?))
}

/// Slow salted hash; runs on the blocking pool
async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| Error::Internal(format!("Password hashing task failed: {e}")))?
        .map_err(|e| Error::SessionExchangeFailed(format!("Password hashing failed: {e}")))
}
