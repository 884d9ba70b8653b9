//! Bearer-token check for the API.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::AppState;

/// Compare two byte strings in time independent of where they differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// True if the `Authorization` header carries `Bearer <token>`.
pub fn bearer_matches(header_value: Option<&str>, token: &str) -> bool {
    match header_value.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(presented) => constant_time_eq(presented.as_bytes(), token.as_bytes()),
        None => false,
    }
}

/// Rejects requests without the configured token. With no token configured
/// every request passes.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(token) = state.token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if !bearer_matches(presented, token) {
            tracing::debug!(uri = %request.uri(), "rejected unauthenticated request");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_bearer_matches() {
        assert!(bearer_matches(Some("Bearer abc"), "abc"));
        assert!(!bearer_matches(Some("bearer abc"), "abc"));
        assert!(!bearer_matches(Some("Basic abc"), "abc"));
        assert!(!bearer_matches(Some("Bearer abd"), "abc"));
        assert!(!bearer_matches(None, "abc"));
    }
}
