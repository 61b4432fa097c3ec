//! Forwarded header composition
//!
//! Only the headers built here reach the backend; everything else the caller
//! sent is dropped.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

use crate::{Error, Result};

/// Per-request trace identifier
pub const TRACKING_ID: HeaderName = HeaderName::from_static("fid-logger-tracking-id");
/// Caller identity
pub const USER_ID: HeaderName = HeaderName::from_static("fid-user-id");
/// Backbone session token
pub const SESSION_TOKEN_BKD: HeaderName = HeaderName::from_static("session-token-bkd");
/// User id forwarded when the caller supplies no valid one
pub const ANONYMOUS_USER: &str = "anonymous";

fn uuid_v4_pattern() -> &'static Regex {
    static UUID_V4_RE: OnceLock<Regex> = OnceLock::new();
    UUID_V4_RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .expect("uuid pattern is valid")
    })
}

fn bearer_pattern() -> &'static Regex {
    static BEARER_RE: OnceLock<Regex> = OnceLock::new();
    BEARER_RE.get_or_init(|| {
        Regex::new(r"^Bearer\s[a-zA-Z0-9\-._~+/]+=*$").expect("bearer pattern is valid")
    })
}

/// Canonical UUID v4 text, case-insensitive
#[must_use]
pub fn is_valid_uuid(value: &str) -> bool {
    uuid_v4_pattern().is_match(value)
}

/// `Bearer <base64url-ish>` shape
#[must_use]
pub fn is_valid_bearer_token(value: &str) -> bool {
    bearer_pattern().is_match(value)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Build the headers forwarded to the backend.
///
/// 1. tracking id: propagated when it is a UUID v4, otherwise freshly generated
/// 2. user id: propagated when it is a UUID v4, otherwise `anonymous`
/// 3. `Authorization: Bearer <jobs_token>`, replacing anything inbound
/// 4. Accept: inbound or `default_accept`
/// 5. Content-Type: inbound or `default_content_type`
/// 6. session-token-bkd: inbound when bearer-shaped; a non-empty
///    `session_token` always overwrites it
///
/// # Errors
///
/// Fails when a token or default contains characters not allowed in a header value.
pub fn build_headers(
    inbound: &HeaderMap,
    jobs_token: &str,
    session_token: Option<&str>,
    default_accept: &str,
    default_content_type: &str,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let tracking_id = match header_str(inbound, &TRACKING_ID) {
        Some(id) if is_valid_uuid(id) => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    };
    headers.insert(TRACKING_ID, header_value(&tracking_id, "tracking id")?);

    let user_id = match header_str(inbound, &USER_ID) {
        Some(id) if is_valid_uuid(id) => id,
        _ => ANONYMOUS_USER,
    };
    headers.insert(USER_ID, header_value(user_id, "user id")?);

    let authorization = HeaderValue::from_str(&format!("Bearer {jobs_token}")).map_err(|_| {
        Error::AuthCredentialsRejected("Bearer token is not a valid header value".to_string())
    })?;
    headers.insert(AUTHORIZATION, authorization);

    let accept = match inbound.get(ACCEPT) {
        Some(v) => v.clone(),
        None => header_value(default_accept, "default accept")?,
    };
    headers.insert(ACCEPT, accept);

    let content_type = match inbound.get(CONTENT_TYPE) {
        Some(v) => v.clone(),
        None => header_value(default_content_type, "default content type")?,
    };
    headers.insert(CONTENT_TYPE, content_type);

    if let Some(token) = header_str(inbound, &SESSION_TOKEN_BKD)
        && is_valid_bearer_token(token)
    {
        headers.insert(SESSION_TOKEN_BKD, header_value(token, "session token")?);
    }

    if let Some(token) = session_token.filter(|t| !t.is_empty()) {
        headers.insert(SESSION_TOKEN_BKD, header_value(token, "session token")?);
    }

    Ok(headers)
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Internal(format!("Invalid {what} header value")))
}
