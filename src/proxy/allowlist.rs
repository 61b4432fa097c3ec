//! Outbound target allow-list
//!
//! A resolved backend URL is only dispatched when both its scheme and its
//! hostname appear in the configured lists. Everything else is rejected before
//! any token is acquired.

use url::Url;

use crate::config::AllowListConfig;
use crate::{Error, Result};

/// Scheme and hostname allow-list
#[derive(Debug, Clone)]
pub struct TargetAllowList {
    schemes: Vec<String>,
    hosts: Vec<String>,
}

impl TargetAllowList {
    /// Build from configuration; entries are compared case-insensitively
    #[must_use]
    pub fn from_config(config: &AllowListConfig) -> Self {
        Self {
            schemes: config
                .schemes
                .iter()
                .map(|s| s.trim_end_matches(':').to_ascii_lowercase())
                .collect(),
            hosts: config.hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    /// Validate a resolved target URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisallowedTarget`] if the URL does not parse, has no
    /// host, or its scheme or host is not allow-listed.
    pub fn check(&self, url_str: &str) -> Result<()> {
        let parsed = Url::parse(url_str)
            .map_err(|e| Error::DisallowedTarget(format!("Invalid URL {url_str}: {e}")))?;

        if !self.schemes.iter().any(|s| s == parsed.scheme()) {
            return Err(Error::DisallowedTarget(format!(
                "Scheme '{}' is not allowed",
                parsed.scheme()
            )));
        }

        let Some(host) = parsed.host_str() else {
            return Err(Error::DisallowedTarget("URL has no host".to_string()));
        };

        let host = host.to_ascii_lowercase();
        if !self.hosts.iter().any(|h| *h == host) {
            return Err(Error::DisallowedTarget(format!("Host '{host}' is not allowed")));
        }

        Ok(())
    }
}
