//! Persisted login sessions.

use sqlx::FromRow;

/// Resolved session joined with its user, what the auth gate hands to handlers
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub must_change_password: bool,
    pub csrf_token: String,
    pub expires_at: String,
}
