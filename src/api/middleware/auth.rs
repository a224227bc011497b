//! Shared-secret bearer authentication for operators and agents

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

/// The secret every protected request has to present
#[derive(Clone)]
pub struct HubToken(Arc<str>);

impl HubToken {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    fn matches(&self, presented: &str) -> bool {
        *self.0 == *presented
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    MalformedHeader,
    WrongToken,
}

/// Extract the token of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MalformedHeader)
}

pub async fn auth_middleware(
    State(expected): State<HubToken>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let presented = bearer_token(request.headers())?;
    if !expected.matches(presented) {
        debug!(path = %request.uri().path(), "rejected request with wrong token");
        return Err(AuthError::WrongToken);
    }

    Ok(next.run(request).await)
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing bearer token"),
            AuthError::MalformedHeader => (
                StatusCode::UNAUTHORIZED,
                "expected `Authorization: Bearer <token>`",
            ),
            AuthError::WrongToken => (StatusCode::FORBIDDEN, "token not accepted"),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
