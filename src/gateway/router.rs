//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::proxy::{ProxyDispatcher, ProxyRequest, ProxyResponse, RequestBody};

/// Shared application state
pub struct AppState {
    /// Request orchestrator
    pub dispatcher: Arc<ProxyDispatcher>,
    /// Prefix under which every proxied path lives
    pub api_prefix: String,
}

impl AppState {
    /// Plain string-prefix match, so `/api/v1`, `/api/v1/` and `/api/v1foo`
    /// all reach the dispatcher
    fn is_proxied(&self, path: &str) -> bool {
        path.starts_with(self.api_prefix.trim_end_matches('/'))
    }
}

/// Create the router
///
/// `/health` answers locally; every path starting with the API prefix goes to
/// the dispatcher; anything else is a structured 404.
pub fn create_router(state: Arc<AppState>, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(proxy_handler)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let transport = state.dispatcher.transport();
    let provider = state.dispatcher.token_provider();

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "token_cached": provider.has_valid_token(),
            "outbound": {
                "max_sockets": transport.max_sockets(),
                "available": transport.available(),
            },
            "routes": state.dispatcher.resolver().rules().len(),
        })),
    )
}

/// Any method on any path other than `/health`
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.is_proxied(uri.path()) {
        debug!(path = %uri.path(), "Path outside the API prefix");
        return ProxyResponse::not_found().into_response();
    }

    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

    let request = ProxyRequest {
        method,
        path,
        headers,
        body: RequestBody::from_bytes(body),
    };

    state.dispatcher.handle(&request).await.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        let mut config = Config::default();
        config.oauth.primary.client_id = "svc".to_string();
        config.oauth.primary.token_url = "http://127.0.0.1:1/token".to_string();
        let dispatcher = Arc::new(ProxyDispatcher::from_config(&config).unwrap());
        create_router(
            Arc::new(AppState {
                dispatcher,
                api_prefix: config.server.api_prefix.clone(),
            }),
            config.server.max_body_size,
        )
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_pool_and_token_state() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["token_cached"], false);
        assert_eq!(body["outbound"]["max_sockets"], 100);
    }

    #[tokio::test]
    async fn test_paths_outside_prefix_are_404() {
        let response = router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["codeValue"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unrouted_paths_under_prefix_are_404() {
        let response = router()
            .oneshot(
                Request::post("/api/v1/nothing/here?x=1")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], 404);
    }
}
