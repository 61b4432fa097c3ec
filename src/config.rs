//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::oauth::{AuthenticationType, OAuthClientConfig};
use crate::proxy::RoutingRule;
use crate::{Error, Result};

/// Prefix for layered environment overrides (`DIRECTORY_PROXY_SERVER__PORT=8080`)
pub const ENV_PREFIX: &str = "DIRECTORY_PROXY_";

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving legacy variables.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Listener configuration
    pub server: ServerConfig,
    /// Outbound connection pool configuration
    pub transport: TransportConfig,
    /// OAuth client configurations
    pub oauth: OAuthSection,
    /// Ordered routing rules; first prefix match wins
    pub routes: Vec<RoutingRule>,
    /// Application name to backend base URL
    pub applications: HashMap<String, String>,
    /// Backbone session bridge
    pub session: SessionConfig,
    /// Outbound target allow-list
    pub allowlist: AllowListConfig,
    /// Defaults for forwarded negotiation headers
    pub headers: HeaderDefaults,
    /// Inbound body validation
    pub validation: ValidationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Only paths starting with this prefix are proxied
    pub api_prefix: String,
    /// Maximum inbound body size (bytes)
    pub max_body_size: usize,
    /// Graceful shutdown timeout
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7001,
            api_prefix: "/api/v1".to_string(),
            max_body_size: 50 * 1024 * 1024, // 50MB
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Keep-alive connection pool shared by every outbound call
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Enable TCP keep-alive on pooled sockets
    pub keep_alive: bool,
    /// Maximum concurrent outbound requests; excess callers queue
    pub max_sockets: usize,
    /// Maximum idle sockets kept per host
    pub max_idle_sockets: usize,
    /// Per-request timeout
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub request_timeout: Duration,
    /// How long an idle socket stays in the pool
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub idle_timeout: Duration,
    /// Skip TLS certificate verification (self-signed backends only)
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_sockets: 100,
            max_idle_sockets: 10,
            request_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

/// OAuth client configurations, one per logical actor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OAuthSection {
    /// Service identity used for every proxied request
    pub primary: OAuthClientConfig,
    /// Backbone identity used by the session bridge
    pub backbone: Option<OAuthClientConfig>,
    /// Tokens are considered expired this long before their real expiry
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub expiry_skew: Duration,
}

impl Default for OAuthSection {
    fn default() -> Self {
        Self {
            primary: OAuthClientConfig::default(),
            backbone: None,
            expiry_skew: Duration::from_secs(30),
        }
    }
}

/// Backbone session bridge configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Exact inbound path that triggers a session exchange (disabled when unset)
    pub relative_path: Option<String>,
    /// Backbone service base URL
    pub backbone_url: Option<String>,
    /// Session endpoint path under the backbone base URL
    pub sub_path: String,
    /// bcrypt cost factor for the forwarded password hash
    pub hash_cost: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relative_path: None,
            backbone_url: None,
            sub_path: "/backbone/v1/session".to_string(),
            hash_cost: 10,
        }
    }
}

/// Allowed outbound schemes and hostnames
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllowListConfig {
    /// Allowed URL schemes (without the trailing colon)
    pub schemes: Vec<String>,
    /// Allowed hostnames (exact, case-insensitive)
    pub hosts: Vec<String>,
}

impl Default for AllowListConfig {
    fn default() -> Self {
        Self {
            schemes: vec!["http".to_string(), "https".to_string()],
            hosts: Vec::new(),
        }
    }
}

/// Defaults applied when the inbound request omits negotiation headers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderDefaults {
    /// Accept value when the caller sends none
    pub default_accept: String,
    /// Content-Type value when the caller sends none
    pub default_content_type: String,
}

impl Default for HeaderDefaults {
    fn default() -> Self {
        Self {
            default_accept: "application/json".to_string(),
            default_content_type: "application/json".to_string(),
        }
    }
}

/// Inbound body validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// JSON Schema subset checked against every inbound JSON body
    pub body_schema: Option<Value>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Layering: YAML file, then `DIRECTORY_PROXY_*` variables, then env files,
    /// then the legacy flat variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_legacy_env(|key| env::var(key).ok())?;
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Overlay the legacy flat variables
    /// (`AUTH_CLIENT_ID`, `API_SERVICE_DIRECTORY_MAP`, ...).
    ///
    /// `lookup` abstracts the environment so tests need not mutate it.
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("API_SERVICE_DIRECTORY_MAP") {
            let map: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("API_SERVICE_DIRECTORY_MAP is not a JSON object: {e}"))
            })?;
            self.applications.extend(map);
        }

        if let Some(path) = lookup("API_SERVICE_DIRECTORY_SESSION_RELATIVE_PATH") {
            self.session.relative_path = Some(path);
        }

        if let Some(raw) = lookup("BACKBONE_API_SERVICE_MAP") {
            let map: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("BACKBONE_API_SERVICE_MAP is not a JSON object: {e}"))
            })?;
            if let Some(url) = map.get("backbone") {
                self.session.backbone_url = Some(url.clone());
            }
        }

        overlay_oauth(&mut self.oauth.primary, "AUTH_", &lookup);

        if lookup("BACKBONE_AUTH_CLIENT_ID").is_some() {
            let backbone = self.oauth.backbone.get_or_insert_with(OAuthClientConfig::default);
            overlay_oauth(backbone, "BACKBONE_AUTH_", &lookup);
        }

        Ok(())
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("env expansion pattern is valid");

        let expand_client = |client: &mut OAuthClientConfig| {
            client.client_id = Self::expand_string(&re, &client.client_id);
            client.client_secret = Self::expand_string(&re, &client.client_secret);
            client.token_url = Self::expand_string(&re, &client.token_url);
            client.username = Self::expand_string(&re, &client.username);
            client.password = Self::expand_string(&re, &client.password);
        };

        expand_client(&mut self.oauth.primary);
        if let Some(backbone) = self.oauth.backbone.as_mut() {
            expand_client(backbone);
        }

        for url in self.applications.values_mut() {
            *url = Self::expand_string(&re, url);
        }

        if let Some(url) = self.session.backbone_url.as_mut() {
            *url = Self::expand_string(&re, url);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Check cross-field invariants
    ///
    /// Routes naming unknown applications only warn: resolution fails per
    /// request, which keeps the rest of the route table usable.
    pub fn validate(&self) -> Result<()> {
        if !self.server.api_prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "server.api_prefix must start with '/': {}",
                self.server.api_prefix
            )));
        }

        if self.oauth.primary.token_url.is_empty() || self.oauth.primary.client_id.is_empty() {
            return Err(Error::Config(
                "oauth.primary requires client_id and token_url".to_string(),
            ));
        }

        if self.allowlist.hosts.is_empty() {
            return Err(Error::Config(
                "allowlist.hosts is empty; every request would be rejected".to_string(),
            ));
        }

        if self.session.relative_path.is_some() {
            if self.oauth.backbone.is_none() {
                return Err(Error::Config(
                    "session.relative_path is set but oauth.backbone is missing".to_string(),
                ));
            }
            if self.session.backbone_url.is_none() {
                return Err(Error::Config(
                    "session.relative_path is set but session.backbone_url is missing".to_string(),
                ));
            }
        }

        if self.transport.max_sockets == 0 {
            return Err(Error::Config("transport.max_sockets must be > 0".to_string()));
        }

        for rule in &self.routes {
            if !self.applications.contains_key(&rule.application_name) {
                warn!(
                    prefix = %rule.match_prefix,
                    application = %rule.application_name,
                    "Route references an unregistered application"
                );
            }
        }

        Ok(())
    }
}

/// Overlay one OAuth client from `{prefix}CLIENT_ID`, `{prefix}SERVER_URI`, ...
fn overlay_oauth<F>(client: &mut OAuthClientConfig, prefix: &str, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |suffix: &str| lookup(&format!("{prefix}{suffix}"));

    if let Some(v) = get("CLIENT_ID") {
        client.client_id = v;
    }
    if let Some(v) = get("CLIENT_SECRET") {
        client.client_secret = v;
    }
    if let Some(v) = get("GRANT_TYPE") {
        client.grant_type = v;
    }
    if let Some(v) = get("SERVER_URI") {
        client.token_url = v;
    }
    if let Some(v) = get("AUTHENTICATION_TYPE") {
        client.authentication_type = AuthenticationType::from_legacy(&v);
    }
    if let Some(v) = get("USER_ALIAS") {
        client.username = v;
    }
    if let Some(v) = get("USER_PASSWORD") {
        client.password = v;
    }
}

/// Human-readable duration deserializer ("30s", "5m", "100ms")
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a message when the number is malformed or the duration overflows.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |n: &str| {
            n.parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };
        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{s}' is out of range"))
        } else {
            number(s).map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.oauth.primary.client_id = "jobs".to_string();
        config.oauth.primary.token_url = "https://auth.example/token".to_string();
        config.allowlist.hosts = vec!["backend.example".to_string()];
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 7001);
        assert_eq!(config.server.api_prefix, "/api/v1");
        assert_eq!(config.transport.max_sockets, 100);
        assert_eq!(config.transport.max_idle_sockets, 10);
        assert_eq!(config.transport.request_timeout, Duration::from_secs(60));
        assert_eq!(config.transport.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.session.sub_path, "/backbone/v1/session");
        assert_eq!(config.session.hash_cost, 10);
        assert_eq!(config.allowlist.schemes, vec!["http", "https"]);
    }

    #[test]
    fn test_yaml_round_trip_of_sections() {
        let yaml = r#"
server:
  port: 8443
  api_prefix: /api/v2
transport:
  request_timeout: 5s
  idle_timeout: 500ms
oauth:
  primary:
    client_id: jobs
    client_secret: s3cret
    grant_type: client_credentials
    token_url: https://auth.example/token
    authentication_type: basic
routes:
  - match_prefix: /api/v2/jobs
    rewrite: { from: /api/v2, to: /svc }
    application_name: jobs
applications:
  jobs: https://backend.example
allowlist:
  hosts: [backend.example]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.transport.request_timeout, Duration::from_secs(5));
        assert_eq!(config.transport.idle_timeout, Duration::from_millis(500));
        assert_eq!(
            config.oauth.primary.authentication_type,
            AuthenticationType::Basic
        );
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].application_name, "jobs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_legacy_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("API_SERVICE_DIRECTORY_MAP", r#"{"jobs":"https://backend.example"}"#),
            ("API_SERVICE_DIRECTORY_SESSION_RELATIVE_PATH", "/api/v1/session"),
            ("BACKBONE_API_SERVICE_MAP", r#"{"backbone":"https://backbone.example"}"#),
            ("AUTH_CLIENT_ID", "jobs-client"),
            ("AUTH_CLIENT_SECRET", "jobs-secret"),
            ("AUTH_SERVER_URI", "https://auth.example/token"),
            ("AUTH_AUTHENTICATION_TYPE", "basic"),
            ("BACKBONE_AUTH_CLIENT_ID", "bb-client"),
            ("BACKBONE_AUTH_SERVER_URI", "https://auth.example/bb"),
        ]);

        let mut config = Config::default();
        config
            .apply_legacy_env(|k| vars.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.applications["jobs"], "https://backend.example");
        assert_eq!(config.session.relative_path.as_deref(), Some("/api/v1/session"));
        assert_eq!(
            config.session.backbone_url.as_deref(),
            Some("https://backbone.example")
        );
        assert_eq!(config.oauth.primary.client_id, "jobs-client");
        assert_eq!(config.oauth.primary.authentication_type, AuthenticationType::Basic);
        let backbone = config.oauth.backbone.unwrap();
        assert_eq!(backbone.client_id, "bb-client");
        assert_eq!(backbone.token_url, "https://auth.example/bb");
    }

    #[test]
    fn test_legacy_env_rejects_malformed_map() {
        let mut config = Config::default();
        let err = config
            .apply_legacy_env(|k| (k == "API_SERVICE_DIRECTORY_MAP").then(|| "[1,2]".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_allowlist() {
        let mut config = valid_config();
        config.allowlist.hosts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_backbone_for_session() {
        let mut config = valid_config();
        config.session.relative_path = Some("/api/v1/session".to_string());
        assert!(config.validate().is_err());

        config.oauth.backbone = Some(OAuthClientConfig::default());
        config.session.backbone_url = Some("https://backbone.example".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_prefix() {
        let mut config = valid_config();
        config.server.api_prefix = "api".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_string_uses_default() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let out = Config::expand_string(&re, "${DIRECTORY_PROXY_TEST_UNSET_VAR:-fallback}/x");
        assert_eq!(out, "fallback/x");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "oauth:\n  primary:\n    client_id: jobs\n    token_url: https://auth.example/token\nallowlist:\n  hosts: [backend.example]"
        )
        .unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.oauth.primary.client_id, "jobs");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/proxy.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_humantime_parse() {
        assert_eq!(humantime_serde::parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(humantime_serde::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(humantime_serde::parse("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(humantime_serde::parse("7").unwrap(), Duration::from_secs(7));
        assert!(humantime_serde::parse("soon").is_err());
    }

    #[test]
    fn test_humantime_parse_rejects_overflowing_minutes() {
        let err = humantime_serde::parse(&format!("{}m", u64::MAX)).unwrap_err();
        assert!(err.contains("out of range"));
        assert_eq!(
            humantime_serde::parse(&format!("{}m", u64::MAX / 60)).unwrap(),
            Duration::from_secs(u64::MAX / 60 * 60)
        );
    }
}
