//! Upstream error taxonomy.
//!
//! Every failure the Spotify client can produce is classified here so that
//! the retry machinery and the batch fetcher can decide, per variant, whether
//! an error is chunk-local, retryable, or fatal for the whole request.

/// Errors produced while talking to the upstream music API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// Credential exchange failed, or a request was still rejected with 401
    /// after a fresh credential was obtained.
    #[error("Upstream authentication failed: {message}")]
    Auth {
        /// Description of the failure.
        message: String,
    },

    /// The upstream answered 429 Too Many Requests.
    #[error("Rate limited by upstream (retry after {retry_after_secs}s)")]
    RateLimited {
        /// Advisory wait reported by the upstream `Retry-After` header.
        retry_after_secs: u64,
    },

    /// Any other non-success status (4xx/5xx).
    #[error("Upstream unavailable: status {status}: {message}")]
    Unavailable {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Response body excerpt or reason.
        message: String,
    },

    /// Network-level failure (connect, timeout, reset).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested entity does not exist upstream.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was malformed, typically an invalid entity identifier.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The upstream payload did not match the expected schema.
    #[error("Failed to decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Creates an `Auth` error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(status: u16, message: impl Into<String>) -> Self {
        Self::Unavailable {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` for failures that compromise the whole request rather
    /// than a single unit of a batch.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Returns `true` for network-level failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
