//! Directory Proxy Library
//!
//! Authenticating reverse proxy in front of a directory of backend services.
//!
//! # Features
//!
//! - **Prefix routing**: ordered rules map inbound paths to registered backend applications
//! - **OAuth client credentials**: a cached, single-flight bearer token is attached to every forwarded call
//! - **Backbone sessions**: one configured path exchanges caller credentials for a session token
//! - **Header normalization**: tracking id, user id, negotiation and session headers are rebuilt per request
//! - **Outbound allow-list**: resolved targets outside the allowed schemes and hosts never leave the proxy
//! - **Pooled transport**: one keep-alive client with bounded concurrency shared across requests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod proxy;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` selects `json` output;
/// anything else is human-readable text.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
