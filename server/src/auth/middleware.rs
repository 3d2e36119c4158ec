use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

/// Name of the session cookie set by POST /api/auth/login.
pub const SESSION_COOKIE: &str = "gather_session";

/// Session claims carried in the `gather_session` cookie (or an
/// Authorization: Bearer header for non-browser clients).
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID (UUIDv7)
    pub sub: String,
    /// User handle
    pub handle: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Newtype wrapper so the signing secret can live in request extensions
/// without colliding with other Vec<u8> extensions.
#[derive(Clone)]
pub struct SessionSecret(pub Vec<u8>);

/// Pull the session token out of request headers: the session cookie first,
/// then an Authorization: Bearer fallback. The WebSocket upgrade handler uses
/// this too, so the live channel shares the exact credential context of REST.
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(raw) = cookie_header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(SESSION_COOKIE) {
                if let Some(token) = value.strip_prefix('=') {
                    return Some(token.to_string());
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token =
            session_token_from_headers(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;

        // Get the signing secret from request extensions (set by middleware layer)
        let secret = parts
            .extensions
            .get::<SessionSecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        crate::auth::jwt::validate_session_token(&secret.0, &token)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    }
}
