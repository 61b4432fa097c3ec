//! Endpoint resolution: ordered prefix rules to backend URLs

use std::collections::HashMap;

use serde::Deserialize;

use crate::{Error, Result};

/// Literal substring substitution applied to the inbound path
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathRewrite {
    /// Text to replace (first occurrence)
    pub from: String,
    /// Replacement text
    pub to: String,
}

/// Prefix-match directive mapping inbound paths to an application
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutingRule {
    /// Literal path prefix
    pub match_prefix: String,
    /// Optional rewrite of the forwarded path
    #[serde(default)]
    pub rewrite: Option<PathRewrite>,
    /// Key into the application registry
    pub application_name: String,
}

impl RoutingRule {
    /// Forwarded path for an inbound path this rule matched
    fn forwarded_path(&self, path: &str) -> String {
        match &self.rewrite {
            Some(rewrite) => path.replacen(&rewrite.from, &rewrite.to, 1),
            None => path.to_string(),
        }
    }
}

/// Successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Full backend URL (base + forwarded path)
    pub target_url: String,
    /// Application the request is routed to
    pub application_name: String,
}

/// Pure resolver over the process-wide route table and application registry
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    rules: Vec<RoutingRule>,
    applications: HashMap<String, String>,
}

impl EndpointResolver {
    /// Create a resolver; rule order is preserved
    #[must_use]
    pub fn new(rules: Vec<RoutingRule>, applications: HashMap<String, String>) -> Self {
        Self {
            rules,
            applications,
        }
    }

    /// Resolve an inbound path (including any query string)
    ///
    /// The first rule whose prefix is a literal prefix of `path` wins.
    ///
    /// # Errors
    ///
    /// [`Error::RouteNotFound`] when no rule matches or the matched application
    /// is missing from the registry.
    pub fn resolve(&self, path: &str) -> Result<ResolvedEndpoint> {
        let rule = self
            .rules
            .iter()
            .find(|rule| path.starts_with(&rule.match_prefix))
            .ok_or_else(|| Error::RouteNotFound(path.to_string()))?;

        let base_url = self
            .applications
            .get(&rule.application_name)
            .ok_or_else(|| Error::RouteNotFound(path.to_string()))?;

        Ok(ResolvedEndpoint {
            target_url: format!("{base_url}{}", rule.forwarded_path(path)),
            application_name: rule.application_name.clone(),
        })
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }
}
