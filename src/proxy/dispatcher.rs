//! Proxy dispatcher: one inbound request in, one outbound response out
//!
//! Per request: resolve the endpoint, check the target against the
//! allow-list, acquire the service token (and a session token on the session
//! path), compose headers, forward over the pooled transport and translate
//! whatever comes back. Failures are turned into responses here and never
//! propagate past [`ProxyDispatcher::handle`].

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::allowlist::TargetAllowList;
use super::headers::{SESSION_TOKEN_BKD, TRACKING_ID, USER_ID, build_headers};
use super::request::{ProxyRequest, RequestBody};
use super::resolver::{EndpointResolver, ResolvedEndpoint};
use super::response::{ProxyResponse, ResponseBody};
use super::validation::BodyValidator;
use crate::config::{Config, HeaderDefaults};
use crate::oauth::OAuthTokenProvider;
use crate::session::SessionBridge;
use crate::transport::PooledTransport;
use crate::{Error, Result};

/// How the backend body is read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Raw bytes relayed untouched
    Binary,
    /// Parsed as JSON when possible
    Structured,
}

impl ResponseMode {
    /// Binary when the negotiated Accept equals the default content type
    #[must_use]
    pub fn negotiate(accept: Option<&str>, default_content_type: &str) -> Self {
        if accept == Some(default_content_type) {
            Self::Binary
        } else {
            Self::Structured
        }
    }

    fn read(self, bytes: Bytes) -> ResponseBody {
        match self {
            Self::Binary if bytes.is_empty() => ResponseBody::Empty,
            Self::Binary => ResponseBody::Bytes(bytes),
            Self::Structured => ResponseBody::json_or_bytes(bytes),
        }
    }
}

/// Request orchestrator shared by every handler task
pub struct ProxyDispatcher {
    resolver: EndpointResolver,
    allowlist: TargetAllowList,
    token_provider: Arc<OAuthTokenProvider>,
    session: Option<SessionBridge>,
    transport: Arc<PooledTransport>,
    validator: BodyValidator,
    header_defaults: HeaderDefaults,
}

impl ProxyDispatcher {
    /// Assemble a dispatcher from already-built parts
    #[must_use]
    pub fn new(
        resolver: EndpointResolver,
        allowlist: TargetAllowList,
        token_provider: Arc<OAuthTokenProvider>,
        session: Option<SessionBridge>,
        transport: Arc<PooledTransport>,
        validator: BodyValidator,
        header_defaults: HeaderDefaults,
    ) -> Self {
        Self {
            resolver,
            allowlist,
            token_provider,
            session,
            transport,
            validator,
            header_defaults,
        }
    }

    /// Build the pooled transport, token providers and session bridge from configuration
    ///
    /// # Errors
    ///
    /// Fails when the outbound HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(PooledTransport::new(&config.transport)?);

        let token_provider = Arc::new(OAuthTokenProvider::new(
            config.oauth.primary.clone(),
            Arc::clone(&transport),
            config.oauth.expiry_skew,
        ));

        let session = config.oauth.backbone.as_ref().and_then(|backbone| {
            let backbone_provider = Arc::new(OAuthTokenProvider::new(
                backbone.clone(),
                Arc::clone(&transport),
                config.oauth.expiry_skew,
            ));
            SessionBridge::from_config(&config.session, backbone_provider, Arc::clone(&transport))
        });

        if let Some(bridge) = &session {
            info!(path = %bridge.relative_path(), "Backbone session bridge enabled");
        }

        Ok(Self::new(
            EndpointResolver::new(config.routes.clone(), config.applications.clone()),
            TargetAllowList::from_config(&config.allowlist),
            token_provider,
            session,
            transport,
            BodyValidator::new(config.validation.body_schema.clone()),
            config.headers.clone(),
        ))
    }

    /// Service identity token provider
    #[must_use]
    pub fn token_provider(&self) -> &Arc<OAuthTokenProvider> {
        &self.token_provider
    }

    /// Shared outbound transport
    #[must_use]
    pub fn transport(&self) -> &Arc<PooledTransport> {
        &self.transport
    }

    /// Endpoint resolver
    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Handle one inbound request. Never fails: every error becomes a response.
    pub async fn handle(&self, request: &ProxyRequest) -> ProxyResponse {
        let started = Instant::now();

        let mut response = match self.forward(request).await {
            Ok(response) => response,
            Err(Error::DisallowedTarget(reason)) => {
                warn!(path = %request.path, reason = %reason, "Rejected disallowed target");
                return ProxyResponse::invalid_url();
            }
            Err(e) => translate_error(&request.path, &e),
        };

        // A failing body replaces the response, successful or not
        if self.validator.is_enabled()
            && let Err(failure) = self.validator.validate(&request.body.validation_view())
        {
            let message = failure.errors_text();
            warn!(path = %request.path, errors = %message, "Request body failed validation");
            response.override_with_validation_error(&message);
        }

        debug!(
            path = %request.path,
            status = response.status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let endpoint = self.resolver.resolve(&request.path)?;
        self.allowlist.check(&endpoint.target_url)?;

        let jobs_token = self.token_provider.get_bearer_token().await?;
        let session_token = match &self.session {
            Some(bridge) => {
                bridge
                    .maybe_get_session_token(&request.path, request.body.as_json())
                    .await?
            }
            None => None,
        };

        let headers = build_headers(
            &request.headers,
            &jobs_token,
            session_token.as_deref(),
            &self.header_defaults.default_accept,
            &self.header_defaults.default_content_type,
        )?;

        let mode = ResponseMode::negotiate(
            headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()),
            &self.header_defaults.default_content_type,
        );

        log_dispatch(request, &endpoint, &headers, mode);

        let (status, mut response_headers, bytes) = self.send(request, &endpoint, headers).await?;

        if !status.is_success() {
            return Ok(relay_backend_error(status, &response_headers, bytes));
        }

        response_headers.remove(header::TRANSFER_ENCODING);
        if let Some(token) = session_token.as_deref() {
            let value = HeaderValue::from_str(token).map_err(|_| {
                Error::SessionExchangeFailed("Session token is not a valid header value".to_string())
            })?;
            response_headers.insert(SESSION_TOKEN_BKD, value);
        }

        Ok(ProxyResponse {
            status,
            headers: response_headers,
            body: mode.read(bytes),
        })
    }

    /// Forward under a transport permit; holds the permit until the body is read
    async fn send(
        &self,
        request: &ProxyRequest,
        endpoint: &ResolvedEndpoint,
        headers: HeaderMap,
    ) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let _permit = self.transport.acquire().await?;

        let mut outbound = self
            .transport
            .client()
            .request(request.method.clone(), &endpoint.target_url)
            .headers(headers);

        outbound = match &request.body {
            RequestBody::Empty => outbound,
            RequestBody::Json(value) => outbound.body(serde_json::to_vec(value)?),
            RequestBody::Bytes(bytes) => outbound.body(bytes.clone()),
        };

        let response = outbound.send().await.map_err(|e| {
            Error::Transport(format!("{} {}: {e}", request.method, endpoint.target_url))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|e| {
            Error::Transport(format!("Reading body from {}: {e}", endpoint.target_url))
        })?;

        Ok((status, headers, bytes))
    }
}

fn log_dispatch(request: &ProxyRequest, endpoint: &ResolvedEndpoint, headers: &HeaderMap, mode: ResponseMode) {
    let value_of = |name: &HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
    info!(
        method = %request.method,
        path = %request.path,
        target = %endpoint.target_url,
        application = %endpoint.application_name,
        tracking_id = %value_of(&TRACKING_ID),
        user_id = %value_of(&USER_ID),
        accept = %value_of(&header::ACCEPT),
        content_type = %value_of(&header::CONTENT_TYPE),
        mode = ?mode,
        "Proxying request"
    );
}

/// Non-2xx backend answer: status and body verbatim, content type kept.
/// Redirects are never followed; a 3xx goes back to the caller with its `Location`.
fn relay_backend_error(status: StatusCode, backend_headers: &HeaderMap, bytes: Bytes) -> ProxyResponse {
    debug!(status = status.as_u16(), "Relaying backend error response");

    let mut headers = HeaderMap::new();
    if let Some(content_type) = backend_headers.get(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    if status.is_redirection()
        && let Some(location) = backend_headers.get(header::LOCATION)
    {
        headers.insert(header::LOCATION, location.clone());
    }

    ProxyResponse {
        status,
        headers,
        body: if bytes.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Bytes(bytes)
        },
    }
}

fn translate_error(path: &str, err: &Error) -> ProxyResponse {
    match err {
        Error::RouteNotFound(_) => {
            info!(path = %path, "No route for path");
            ProxyResponse::not_found()
        }
        _ if err.is_public() => {
            warn!(path = %path, error = %err, "Proxy request failed");
            ProxyResponse::from_error(err)
        }
        _ => {
            error!(path = %path, error = %err, "Unhandled proxy fault");
            ProxyResponse::from_error(err)
        }
    }
}
