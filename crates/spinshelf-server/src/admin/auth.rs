//! Administrator extractor.
//!
//! The showcase has exactly one administrator. Requests identify themselves
//! with the `x-admin-identity` header, which must match the configured
//! identity byte for byte. An empty configured identity disables every
//! admin route.
//!
//! ```ignore
//! async fn handler(admin: AdminAuth) -> String {
//!     format!("hello {}", admin.identity)
//! }
//! ```

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header carrying the caller's administrator identity.
pub const ADMIN_IDENTITY_HEADER: &str = "x-admin-identity";

/// The configured administrator identity, shared through router state.
#[derive(Clone, Default)]
pub struct AdminIdentity(Arc<str>);

impl AdminIdentity {
    pub fn new(identity: impl AsRef<str>) -> Self {
        Self(Arc::from(identity.as_ref()))
    }

    pub fn is_configured(&self) -> bool {
        !self.0.is_empty()
    }

    /// Exact comparison, never true while unconfigured.
    pub fn matches(&self, candidate: &str) -> bool {
        self.is_configured() && constant_time_eq(self.0.as_bytes(), candidate.as_bytes())
    }
}

impl std::fmt::Debug for AdminIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AdminIdentity")
            .field(&if self.is_configured() { "<set>" } else { "<unset>" })
            .finish()
    }
}

/// Proof that the request comes from the administrator.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub identity: String,
}

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
    AdminIdentity: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let expected = AdminIdentity::from_ref(state);

        if !expected.is_configured() {
            tracing::warn!("admin request rejected: no administrator identity configured");
            return Err(ApiError::Unauthorized("admin access is disabled".into()));
        }

        let presented = parts
            .headers
            .get(ADMIN_IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("admin request rejected: missing identity header");
                ApiError::Unauthorized(format!("missing {ADMIN_IDENTITY_HEADER} header"))
            })?;

        if !expected.matches(presented) {
            tracing::warn!("admin request rejected: identity mismatch");
            return Err(ApiError::Unauthorized("not the administrator".into()));
        }

        tracing::debug!("admin access granted");
        Ok(Self {
            identity: presented.to_string(),
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
