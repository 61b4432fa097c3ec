//! Outbound response model and error payloads

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};

use crate::Error;

/// Fixed body returned when a resolved target fails the allow-list
pub const INVALID_URL_MESSAGE: &str = "Invalid URL request";

/// Structured error payload used for route-not-found and proxy faults
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// HTTP-style numeric code
    pub code: u16,
    /// Short title
    pub title: String,
    /// Human-readable detail
    pub detail: String,
    /// Machine-readable code
    pub code_value: String,
}

impl ErrorPayload {
    /// Payload for a path that no routing rule serves
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            code: StatusCode::NOT_FOUND.as_u16(),
            title: "Not Found".to_string(),
            detail: "No API endpoint is configured for the requested path".to_string(),
            code_value: "NOT_FOUND".to_string(),
        }
    }

    /// Payload for an error caught at the dispatcher boundary.
    /// Non-public errors only carry a generic detail.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        let status = err.status_code();
        let detail = if err.is_public() {
            err.to_string()
        } else {
            "An unexpected error occurred".to_string()
        };
        Self {
            code: status.as_u16(),
            title: status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
            detail,
            code_value: err.code_value().to_string(),
        }
    }
}

/// Response body, kept in the form it was produced in
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body
    Empty,
    /// Structured JSON
    Json(Value),
    /// Opaque bytes relayed verbatim
    Bytes(Bytes),
    /// Plain text
    Text(String),
}

impl ResponseBody {
    /// Parse bytes as JSON, keeping them opaque when they are not JSON
    #[must_use]
    pub fn json_or_bytes(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Bytes(bytes),
        }
    }

    /// JSON view of the body, if it has one
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Status, headers and body handed back to the transport layer
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: ResponseBody,
}

impl ProxyResponse {
    /// Response with a JSON body and no extra headers
    #[must_use]
    pub fn json(status: StatusCode, value: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Json(value),
        }
    }

    /// Structured 404 for unrouted paths
    #[must_use]
    pub fn not_found() -> Self {
        Self::json(
            StatusCode::NOT_FOUND,
            serde_json::to_value(ErrorPayload::not_found()).unwrap_or(Value::Null),
        )
    }

    /// Fixed invalid-URL text for disallowed targets
    #[must_use]
    pub fn invalid_url() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            headers: HeaderMap::new(),
            body: ResponseBody::Text(INVALID_URL_MESSAGE.to_string()),
        }
    }

    /// Structured payload for an error caught at the dispatcher boundary
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self::json(
            err.status_code(),
            serde_json::to_value(ErrorPayload::from_error(err)).unwrap_or(Value::Null),
        )
    }

    /// Replace the body with a schema-validation error (`{"error": ...}`)
    pub fn override_with_validation_error(&mut self, message: &str) {
        self.body = ResponseBody::Json(json!({ "error": message }));
        self.headers.remove(header::CONTENT_TYPE);
        self.headers.remove(header::CONTENT_LENGTH);
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut headers = self.headers;
        // Framing belongs to this server, not the backend
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONTENT_LENGTH);

        let body = match self.body {
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Bytes(bytes) => Body::from(bytes),
            ResponseBody::Text(text) => {
                headers
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
                Body::from(text)
            }
            ResponseBody::Json(value) => {
                headers
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json"));
                Body::from(serde_json::to_vec(&value).unwrap_or_default())
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}
