use crate::errors::auth_error::AuthError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Extract the bearer token from the Authorization header
fn extract_token(request: &Request) -> Result<&str, AuthError> {
    let header = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?;

    let value = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Constant-time comparison of a presented token against the configured key
fn token_matches(token: &str, expected: &str) -> bool {
    token.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Authentication middleware for the API routes
///
/// When no API key is configured every request passes. Otherwise the request must
/// carry `Authorization: Bearer <key>` matching the configured key.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(next.run(request).await);
    };

    let request_path = request.uri().path().to_string();
    let token = extract_token(&request)?;

    if token_matches(token, expected) {
        tracing::debug!(path = %request_path, "API key accepted");
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request_path, "API key authentication failed: token mismatch");
        Err(AuthError::Unauthorized)
    }
}
