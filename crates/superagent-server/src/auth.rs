//! Bearer-token authentication.
//!
//! Token comparison is constant-time.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Authentication error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Missing authorization header.
    MissingToken,
    /// Header present but not `Bearer <token>`.
    InvalidFormat,
    /// Token validation failed.
    InvalidToken,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidFormat => write!(f, "Invalid authorization format"),
            AuthError::InvalidToken => write!(f, "Invalid token"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::InvalidFormat => StatusCode::BAD_REQUEST,
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({
            "code": "unauthorized",
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Compare two strings in constant time.
///
/// Length mismatches still perform a comparison so timing does not depend
/// on where the first differing byte is.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

/// Check a presented token against the configured one.
///
/// Always succeeds when no token is configured (localhost mode).
pub fn verify_token(expected: Option<&str>, presented: Option<&str>) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match presented {
        None => Err(AuthError::MissingToken),
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        Some(_) => Err(AuthError::InvalidToken),
    }
}

/// Authentication middleware for the REST API.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    validate_request(&request, &state)?;
    Ok(next.run(request).await)
}

fn validate_request(request: &Request<Body>, state: &AppState) -> Result<(), AuthError> {
    let expected = state.config.auth_token.as_deref();
    if expected.is_none() {
        return Ok(());
    }

    let presented = match request.headers().get(AUTHORIZATION) {
        None => None,
        Some(header) => {
            let value = header.to_str().map_err(|_| AuthError::InvalidFormat)?;
            Some(value.strip_prefix("Bearer ").ok_or(AuthError::InvalidFormat)?)
        }
    };

    verify_token(expected, presented).inspect_err(|e| {
        tracing::debug!(error = %e, "Rejected request");
    })
}
