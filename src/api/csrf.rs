//! Double-submit CSRF check for mutating requests.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use super::auth::{ResolvedSession, SESSION_COOKIE};
use super::error::ApiError;
use crate::auth::{csrf::CSRF_HEADER, validate_csrf};
use crate::AppState;

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Reject POST/PATCH/PUT/DELETE unless `x-csrf-token` matches the token
/// stored with the caller's session.
///
/// The resolved session is stashed in request extensions so the auth
/// extractor downstream does not look it up a second time.
pub async fn require_csrf(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if is_safe_method(request.method()) {
        return Ok(next.run(request).await);
    }

    let session = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.sessions.get_session(cookie.value()).await,
        None => None,
    };
    let provided = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok());

    if !validate_csrf(session.as_ref(), provided) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            has_session = session.is_some(),
            "CSRF validation failed"
        );
        return Err(ApiError::csrf());
    }

    if let Some(session) = session {
        request.extensions_mut().insert(ResolvedSession(session));
    }
    Ok(next.run(request).await)
}
