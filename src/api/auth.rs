use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::request::Parts,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{clean, validate_max_len, validate_new_password};
use crate::auth::permissions::Permission;
use crate::auth::UserPermissions;
use crate::db::{self, mask_email, NewUser, SessionRecord, User, UserResponse};
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

/// Session already resolved earlier in the request (by the CSRF middleware)
#[derive(Debug, Clone)]
pub struct ResolvedSession(pub SessionRecord);

/// Login accepts either `username` or `identifier` (username or email)
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub identifier: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserResponse,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: UserResponse,
    pub permissions: Vec<Permission>,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(alias = "currentPassword")]
    pub current_password: Option<String>,
    #[serde(alias = "newPassword")]
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

fn session_user(session: &SessionRecord) -> UserResponse {
    UserResponse {
        id: session.user_id,
        username: session.username.clone(),
        email: session.email.clone(),
        role: session.role.clone(),
        must_change_password: session.must_change_password,
    }
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .secure(state.config.server.secure_cookies)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(state.sessions.ttl().num_seconds()))
        .build()
}

/// Validated login identifier and password
fn validate_login(request: LoginRequest) -> Result<(String, String), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let username = clean(request.username);
    let identifier = clean(request.identifier);
    if let Some(username) = &username {
        errors.check("username", validate_max_len(username, "Username", 50));
    }
    if let Some(identifier) = &identifier {
        errors.check("identifier", validate_max_len(identifier, "Identifier", 255));
    }
    let login = identifier.or(username);
    if login.is_none() {
        errors.add("username", "Username is required");
    }

    let password = request.password.filter(|p| !p.is_empty());
    if password.is_none() {
        errors.add("password", "Password is required");
    }

    errors.finish()?;
    match (login, password) {
        (Some(login), Some(password)) => Ok((login, password)),
        _ => Err(ApiError::bad_request("Username and password are required")),
    }
}

/// Login endpoint
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let Json(request) = payload?;
    let (login, password) = validate_login(request)?;
    let timeout = state.config.database.query_timeout();

    let user: Option<User> =
        db::bounded(timeout, db::find_user_by_identifier(&state.db, &login)).await?;

    let Some(user) = user else {
        // Unknown usernames still go through the counter path; email-shaped
        // identifiers never touch lockout state.
        if !login.contains('@') {
            if let Err(e) = state.lockout.increment_failed_attempts(&login).await {
                tracing::warn!(error = %e, "Failed to record login failure");
            }
        }
        tracing::info!("Login failed: unknown identifier");
        return Err(ApiError::invalid_credentials());
    };

    if state.lockout.is_locked(&user.username).await? {
        tracing::warn!(user_id = user.id, "Login rejected: account locked");
        return Err(ApiError::account_locked());
    }

    if !state
        .passwords
        .verify_blocking(&password, &user.password_hash)
        .await
    {
        if let Err(e) = state.lockout.increment_failed_attempts(&user.username).await {
            tracing::warn!(user_id = user.id, error = %e, "Failed to record login failure");
        }
        tracing::info!(user_id = user.id, "Login failed: wrong password");
        return Err(ApiError::invalid_credentials());
    }

    state.lockout.reset_failed_attempts(&user.username).await?;

    if state.passwords.needs_rehash(&user.password_hash) {
        match state.passwords.hash_blocking(&password).await {
            Ok(hash) => {
                let updated = db::bounded(
                    timeout,
                    db::update_password_hash(&state.db, user.id, &hash, false),
                )
                .await;
                match updated {
                    Ok(()) => tracing::info!(user_id = user.id, "Password hash upgraded"),
                    Err(e) => tracing::warn!(user_id = user.id, error = %e, "Password rehash failed"),
                }
            }
            Err(e) => tracing::warn!(user_id = user.id, error = %e, "Password rehash failed"),
        }
    }

    // Opportunistic housekeeping; no background task owns this
    if let Err(e) = state.sessions.purge_expired().await {
        tracing::warn!(error = %e, "Failed to purge expired sessions");
    }

    let session = state.sessions.create_session(user.id).await?;
    tracing::info!(user_id = user.id, username = %user.username, "User logged in");

    let jar = jar.add(session_cookie(&state, session.token));
    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            user: UserResponse::from(user),
            csrf_token: session.csrf_token,
        }),
    ))
}

/// Logout endpoint, always succeeds
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<SuccessResponse>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        match state.sessions.delete_session(cookie.value()).await {
            Ok(()) => tracing::info!("User logged out"),
            Err(e) => tracing::warn!(error = %e, "Failed to delete session on logout"),
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(SuccessResponse { success: true }))
}

/// Current session identity
///
/// GET /api/auth/session
pub async fn session(auth: Authenticated) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: session_user(&auth.session),
        csrf_token: auth.session.csrf_token.clone(),
        permissions: auth.permissions.permissions,
    })
}

/// Change the caller's password
///
/// POST /api/auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = payload?;

    let mut errors = ValidationErrorBuilder::new();
    let current = request.current_password.filter(|p| !p.is_empty());
    if current.is_none() {
        errors.add("current_password", "Current password is required");
    }
    match &request.new_password {
        Some(new_password) => {
            errors.check("new_password", validate_new_password(new_password));
        }
        None => {
            errors.add("new_password", "New password is required");
        }
    }
    errors.finish()?;
    let (Some(current), Some(new_password)) = (current, request.new_password) else {
        return Err(ApiError::bad_request("Both passwords are required"));
    };

    let timeout = state.config.database.query_timeout();
    let user = db::bounded(timeout, db::find_user_by_id(&state.db, auth.user_id()))
        .await?
        .ok_or_else(ApiError::invalid_session)?;

    if !state
        .passwords
        .verify_blocking(&current, &user.password_hash)
        .await
    {
        return Err(ApiError::validation_field(
            "current_password",
            "Current password is incorrect",
        ));
    }

    let hash = state
        .passwords
        .hash_blocking(&new_password)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    db::bounded(timeout, db::update_password_hash(&state.db, user.id, &hash, true)).await?;

    tracing::info!(user_id = user.id, "Password changed");
    Ok(Json(SuccessResponse { success: true }))
}

/// Authenticated caller: a live session plus the role's grants.
///
/// No cookie is `UNAUTHORIZED`, a cookie that resolves to nothing is
/// `INVALID_SESSION`, and a user without a role is `FORBIDDEN`.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: SessionRecord,
    pub permissions: UserPermissions,
}

impl Authenticated {
    pub fn user_id(&self) -> i64 {
        self.session.user_id
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = match parts.extensions.get::<ResolvedSession>() {
            Some(ResolvedSession(session)) => session.clone(),
            None => {
                let jar = CookieJar::from_headers(&parts.headers);
                let token = jar
                    .get(SESSION_COOKIE)
                    .map(|c| c.value().to_string())
                    .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
                state
                    .sessions
                    .get_session(&token)
                    .await
                    .ok_or_else(ApiError::invalid_session)?
            }
        };

        let permissions = state
            .permissions
            .get_user_permissions(session.user_id)
            .await
            .ok_or_else(|| ApiError::forbidden("Insufficient permissions"))?;

        Ok(Self {
            session,
            permissions,
        })
    }
}

/// Create the bootstrap admin when no user exists yet.
///
/// Without a configured `admin_password` nothing is created; the password
/// is never generated or logged.
pub async fn ensure_admin_user(state: &AppState) -> anyhow::Result<()> {
    let timeout = state.config.database.query_timeout();
    let count = db::bounded(timeout, db::count_users(&state.db)).await?;
    if count > 0 {
        return Ok(());
    }

    let auth = &state.config.auth;
    let Some(password) = auth.admin_password.as_deref().filter(|p| !p.is_empty()) else {
        tracing::warn!(
            "No users exist and auth.admin_password is not set; skipping admin bootstrap"
        );
        return Ok(());
    };

    let hash = state.passwords.hash_blocking(password).await?;
    let user = db::bounded(
        timeout,
        db::create_user(
            &state.db,
            NewUser {
                username: &auth.admin_username,
                email: Some(&auth.admin_email),
                password_hash: &hash,
                role: "admin",
                must_change_password: true,
            },
        ),
    )
    .await?;

    tracing::info!(
        user_id = user.id,
        username = %user.username,
        email = %mask_email(&auth.admin_email),
        "Created bootstrap admin user; password change required on first login"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: Option<&str>, identifier: Option<&str>, password: Option<&str>) -> LoginRequest {
        LoginRequest {
            username: username.map(str::to_string),
            identifier: identifier.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_validate_login_prefers_identifier() {
        let (login, password) =
            validate_login(request(Some("dana"), Some("dana@example.com"), Some("pw"))).unwrap();
        assert_eq!(login, "dana@example.com");
        assert_eq!(password, "pw");

        let (login, _) = validate_login(request(Some("  dana "), None, Some("pw"))).unwrap();
        assert_eq!(login, "dana");
    }

    #[test]
    fn test_validate_login_rejects_missing_fields() {
        assert!(validate_login(request(None, None, Some("pw"))).is_err());
        assert!(validate_login(request(Some("dana"), None, None)).is_err());
        assert!(validate_login(request(Some("dana"), None, Some(""))).is_err());
        assert!(validate_login(request(Some(&"x".repeat(51)), None, Some("pw"))).is_err());
    }
}
