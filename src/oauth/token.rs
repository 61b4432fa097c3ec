//! Cached bearer token

use std::fmt;
use std::time::{Duration, Instant};

/// A bearer token owned by exactly one [`super::OAuthTokenProvider`]
#[derive(Clone)]
pub struct CachedToken {
    /// Access token value
    pub value: String,

    /// Expiry instant; `None` means the token never expires
    pub expires_at: Option<Instant>,
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    /// Create a cached token from an OAuth token response
    #[must_use]
    pub fn from_response(access_token: String, expires_in: Option<u64>) -> Self {
        Self {
            value: access_token,
            // Lifetimes past the clock's range are treated as non-expiring
            expires_at: expires_in
                .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs))),
        }
    }

    /// Check if the token is expired, treating it as expired `skew` early
    #[must_use]
    pub fn is_expired(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now()
                .checked_add(skew)
                .is_none_or(|deadline| deadline >= expires_at),
            None => false,
        }
    }

    /// Time until expiration
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at
            .and_then(|expires_at| expires_at.checked_duration_since(Instant::now()))
    }
}
