//! Error types for the directory proxy

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the directory proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Directory proxy errors
///
/// A backend answering with a non-2xx status is not an error: the dispatcher
/// relays it as an ordinary response.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No routing rule matched, or the matched application is not registered
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Resolved target failed the scheme/host allow-list
    #[error("Disallowed target: {0}")]
    DisallowedTarget(String),

    /// Token endpoint could not be reached or returned garbage
    #[error("Auth provider unreachable: {0}")]
    AuthProviderUnreachable(String),

    /// Token endpoint answered with a non-success status
    #[error("Auth credentials rejected: {0}")]
    AuthCredentialsRejected(String),

    /// Backbone session exchange failed
    #[error("Session exchange failed: {0}")]
    SessionExchangeFailed(String),

    /// Backend unreachable, timed out, or reset the connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status surfaced to the caller when this error reaches the dispatcher boundary
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::DisallowedTarget(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code used in structured error payloads
    #[must_use]
    pub fn code_value(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            Self::DisallowedTarget(_) => "INVALID_URL",
            Self::AuthProviderUnreachable(_) => "AUTH_PROVIDER_UNREACHABLE",
            Self::AuthCredentialsRejected(_) => "AUTH_CREDENTIALS_REJECTED",
            Self::SessionExchangeFailed(_) => "SESSION_EXCHANGE_FAILED",
            Self::Transport(_) | Self::Http(_) => "BACKEND_UNREACHABLE",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error detail may be shown to callers.
    ///
    /// Internal faults only surface a generic message.
    #[must_use]
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Self::RouteNotFound(_)
                | Self::DisallowedTarget(_)
                | Self::AuthProviderUnreachable(_)
                | Self::AuthCredentialsRejected(_)
                | Self::SessionExchangeFailed(_)
                | Self::Transport(_)
        )
    }
}
