//! Inbound request model

use std::borrow::Cow;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::{Map, Value};

/// Inbound body as handed over by the transport layer
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Parsed JSON
    Json(Value),
    /// Non-JSON payload, forwarded verbatim
    Bytes(Bytes),
}

impl RequestBody {
    /// Classify raw bytes: empty, JSON, or opaque
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
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

    /// Value the body schema is checked against: no body reads as `{}`,
    /// an opaque payload as a JSON string
    #[must_use]
    pub fn validation_view(&self) -> Cow<'_, Value> {
        match self {
            Self::Empty => Cow::Owned(Value::Object(Map::new())),
            Self::Json(v) => Cow::Borrowed(v),
            Self::Bytes(bytes) => Cow::Owned(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        }
    }
}

/// One inbound call
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method, forwarded unchanged
    pub method: Method,
    /// Request target: path plus query string
    pub path: String,
    /// Inbound headers (case-insensitive)
    pub headers: HeaderMap,
    /// Inbound body
    pub body: RequestBody,
}

impl ProxyRequest {
    /// Create a request without headers or body
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Attach headers
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}
