//! In-process upstream used by the integration tests: token endpoint,
//! backbone session endpoint and a recording backend.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Form, Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use directory_proxy::config::Config;
use directory_proxy::oauth::OAuthClientConfig;
use directory_proxy::proxy::{PathRewrite, RoutingRule};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Session token handed out by the mock backbone
pub const SESSION_TOKEN: &str = "Bearer c2Vzc2lvbi10b2tlbg==";

/// One request seen by the mock backend
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the mock upstream has seen so far
#[derive(Default)]
pub struct Seen {
    pub token_requests: AtomicUsize,
    pub grant_forms: Mutex<Vec<HashMap<String, String>>>,
    pub session_requests: Mutex<Vec<(HeaderMap, Value)>>,
    pub backend_requests: Mutex<Vec<Recorded>>,
    /// Hits on the off-list redirect target
    pub redirect_follows: AtomicUsize,
}

impl Seen {
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn backend_requests(&self) -> Vec<Recorded> {
        self.backend_requests.lock().clone()
    }

    pub fn redirect_follows(&self) -> usize {
        self.redirect_follows.load(Ordering::SeqCst)
    }
}

/// Running mock upstream
pub struct MockUpstream {
    pub base_url: String,
    pub seen: Arc<Seen>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let seen = Arc::new(Seen::default());

        let app = Router::new()
            .route("/oauth/token", post(token_handler))
            .route("/oauth/reject", post(reject_handler))
            .route("/backbone/v1/session", post(session_handler))
            .route("/svc/jobs/down", any(down_handler))
            .route("/svc/jobs/report.pdf", get(pdf_handler))
            .route("/svc/jobs/moved", any(moved_handler))
            .route("/svc/jobs/stream", get(stream_handler))
            .route("/stolen", any(stolen_handler))
            .route("/svc/{*rest}", any(echo_handler))
            .with_state(Arc::clone(&seen));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            seen,
        }
    }

    /// Proxy configuration pointing every route at this upstream
    pub fn proxy_config(&self) -> Config {
        let mut config = Config::default();

        config.oauth.primary = OAuthClientConfig {
            client_id: "svc".to_string(),
            client_secret: "svc-secret".to_string(),
            token_url: format!("{}/oauth/token", self.base_url),
            ..Default::default()
        };
        config.oauth.backbone = Some(OAuthClientConfig {
            client_id: "backbone".to_string(),
            client_secret: "backbone-secret".to_string(),
            token_url: format!("{}/oauth/token", self.base_url),
            ..Default::default()
        });

        config.applications = HashMap::from([
            ("jobs".to_string(), format!("{}/svc", self.base_url)),
            ("evil".to_string(), "http://evil.example/svc".to_string()),
            ("dead".to_string(), "http://127.0.0.1:1".to_string()),
        ]);
        config.routes = vec![
            rule("/api/v1/jobs", Some(("/api/v1", "")), "jobs"),
            rule("/api/v1/session", Some(("/api/v1", "")), "jobs"),
            rule("/api/v1/evil", None, "evil"),
            rule("/api/v1/dead", None, "dead"),
        ];
        config.allowlist.hosts = vec!["127.0.0.1".to_string()];

        config.session.relative_path = Some("/api/v1/session".to_string());
        config.session.backbone_url = Some(self.base_url.clone());
        config.session.hash_cost = 4;

        config
    }
}

fn rule(prefix: &str, rewrite: Option<(&str, &str)>, app: &str) -> RoutingRule {
    RoutingRule {
        match_prefix: prefix.to_string(),
        rewrite: rewrite.map(|(from, to)| PathRewrite {
            from: from.to_string(),
            to: to.to_string(),
        }),
        application_name: app.to_string(),
    }
}

async fn token_handler(
    State(seen): State<Arc<Seen>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    // Widen the window for concurrent refreshes
    tokio::time::sleep(Duration::from_millis(50)).await;
    seen.token_requests.fetch_add(1, Ordering::SeqCst);

    let client_id = form.get("client_id").cloned().unwrap_or_default();
    seen.grant_forms.lock().push(form);

    Json(json!({
        "access_token": format!("token-for-{client_id}"),
        "token_type": "Bearer",
        "expires_in": 3600
    }))
}

async fn reject_handler() -> impl IntoResponse {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"})))
}

async fn session_handler(
    State(seen): State<Arc<Seen>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    seen.session_requests.lock().push((headers, body));
    Json(json!({ "token": SESSION_TOKEN }))
}

async fn down_handler() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"msg":"down"}"#,
    )
}

async fn pdf_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/pdf")],
        Bytes::from_static(b"%PDF-1.7 binary"),
    )
}

/// Redirects to this same server under `localhost`, a host the proxy does not allow
async fn moved_handler(headers: HeaderMap) -> impl IntoResponse {
    let port = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.rsplit(':').next())
        .unwrap_or("80")
        .to_string();
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("http://localhost:{port}/stolen"))],
    )
}

async fn stolen_handler(State(seen): State<Arc<Seen>>) -> StatusCode {
    seen.redirect_follows.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

/// Body of unknown length, sent with `transfer-encoding: chunked`
async fn stream_handler() -> Response {
    let chunks = futures::stream::iter([
        Ok::<_, std::io::Error>(Bytes::from_static(b"line one\n")),
        Ok(Bytes::from_static(b"line two\n")),
    ]);
    let mut response = Body::from_stream(chunks).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert("x-backend", HeaderValue::from_static("jobs"));
    response
}

async fn echo_handler(
    State(seen): State<Arc<Seen>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    seen.backend_requests.lock().push(Recorded {
        method: method.clone(),
        uri: uri.to_string(),
        headers,
        body,
    });

    let mut response = Json(json!({
        "ok": true,
        "method": method.as_str(),
        "uri": uri.to_string()
    }))
    .into_response();
    response
        .headers_mut()
        .insert("x-backend", HeaderValue::from_static("jobs"));
    response
}
