//! OAuth client configuration and the token grant request

use std::fmt;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::token::CachedToken;
use crate::{Error, Result};

/// How client credentials are presented to the token endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationType {
    /// `Authorization: Basic base64(client_id:client_secret)`
    Basic,
    /// `client_id` / `client_secret` as form fields
    #[default]
    #[serde(alias = "post", alias = "form")]
    Body,
}

impl AuthenticationType {
    /// Parse the free-form value used by legacy environment variables.
    /// Anything other than `basic` means form-body credentials.
    #[must_use]
    pub fn from_legacy(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("basic") {
            Self::Basic
        } else {
            Self::Body
        }
    }
}

/// Immutable configuration of one OAuth actor
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    /// Client ID
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Grant type (`client_credentials`, `password`)
    pub grant_type: String,
    /// Token endpoint
    pub token_url: String,
    /// Client authentication method
    pub authentication_type: AuthenticationType,
    /// Resource owner name (password grant)
    pub username: String,
    /// Resource owner password (password grant)
    pub password: String,
}

impl fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("grant_type", &self.grant_type)
            .field("token_url", &self.token_url)
            .field("authentication_type", &self.authentication_type)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl OAuthClientConfig {
    /// Effective grant type; an empty value means `client_credentials`
    #[must_use]
    pub fn grant_type(&self) -> &str {
        if self.grant_type.is_empty() {
            "client_credentials"
        } else {
            &self.grant_type
        }
    }

    /// Form fields of the grant request
    fn grant_form(&self) -> Vec<(&'static str, &str)> {
        let mut form = vec![("grant_type", self.grant_type())];

        if self.authentication_type == AuthenticationType::Body {
            form.push(("client_id", &self.client_id));
            form.push(("client_secret", &self.client_secret));
        }

        if self.grant_type() == "password" {
            form.push(("username", &self.username));
            form.push(("password", &self.password));
        }

        form
    }

    /// Perform one grant request against the token endpoint
    ///
    /// # Errors
    ///
    /// [`Error::AuthProviderUnreachable`] when the endpoint cannot be reached or
    /// answers with an unparseable body, [`Error::AuthCredentialsRejected`] on a
    /// non-success status.
    pub async fn request_token(&self, http_client: &Client) -> Result<CachedToken> {
        let mut request = http_client.post(&self.token_url).form(&self.grant_form());

        if self.authentication_type == AuthenticationType::Basic {
            request = request.basic_auth(&self.client_id, Some(&self.client_secret));
        }

        debug!(client_id = %self.client_id, token_url = %self.token_url, "Requesting token");

        let response = request
            .send()
            .await
            .map_err(|e| Error::AuthProviderUnreachable(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthCredentialsRejected(format!(
                "Token endpoint returned HTTP {status} - {body}"
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            Error::AuthProviderUnreachable(format!("Failed to parse token response: {e}"))
        })?;

        Ok(CachedToken::from_response(
            token_response.access_token,
            token_response.expires_in,
        ))
    }
}
