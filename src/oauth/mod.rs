//! OAuth 2.0 client-credentials support
//!
//! Features:
//! - One [`OAuthTokenProvider`] per client configuration, owned by its caller
//! - Lazy token acquisition with expiry-aware caching
//! - Single-flight refresh: concurrent callers share one upstream request
//! - HTTP Basic or form-body client authentication

mod client;
mod provider;
mod token;

pub use client::{AuthenticationType, OAuthClientConfig};
pub use provider::OAuthTokenProvider;
pub use token::CachedToken;
