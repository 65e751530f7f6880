//! Server-side session store.
//!
//! The cookie carries an opaque random token; only its SHA-256 is stored,
//! so a leaked sessions table cannot be replayed.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use super::{generate_token, hash_token};
use crate::config::AuthConfig;
use crate::db::{self, DbError, SessionRecord};

/// Secrets handed back to the client at login
#[derive(Debug, Clone)]
pub struct NewSession {
    pub token: String,
    pub csrf_token: String,
    pub expires_at: String,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    ttl: Duration,
    timeout: std::time::Duration,
}

impl SessionStore {
    pub fn new(pool: SqlitePool, config: &AuthConfig, timeout: std::time::Duration) -> Self {
        Self {
            pool,
            ttl: Duration::hours(config.session_ttl_hours),
            timeout,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create_session(&self, user_id: i64) -> Result<NewSession, DbError> {
        let token = generate_token();
        let csrf_token = generate_token();
        let now = Utc::now();
        let now_ts = db::timestamp(now);
        let expires_at = db::timestamp(now + self.ttl);

        db::bounded(self.timeout, async {
            sqlx::query(
                "INSERT INTO sessions (id, user_id, csrf_token, created_at, last_accessed, expires_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(hash_token(&token))
            .bind(user_id)
            .bind(&csrf_token)
            .bind(&now_ts)
            .bind(&now_ts)
            .bind(&expires_at)
            .execute(&self.pool)
            .await?;
            Ok::<_, DbError>(())
        })
        .await?;

        Ok(NewSession {
            token,
            csrf_token,
            expires_at,
        })
    }

    /// Resolve a cookie token. Absent, expired, or unreadable all mean no session.
    pub async fn get_session(&self, token: &str) -> Option<SessionRecord> {
        let token_hash = hash_token(token);
        let now = db::now();

        let lookup = db::bounded(self.timeout, async {
            let record = sqlx::query_as::<_, SessionRecord>(
                r#"
                SELECT s.user_id, u.username, u.email, u.role, u.must_change_password,
                       s.csrf_token, s.expires_at
                FROM sessions s JOIN users u ON u.id = s.user_id
                WHERE s.id = ? AND s.expires_at > ?
                "#,
            )
            .bind(&token_hash)
            .bind(&now)
            .fetch_optional(&self.pool)
            .await?;
            Ok::<_, DbError>(record)
        })
        .await;

        let record = match lookup {
            Ok(record) => record?,
            Err(e) => {
                warn!(error = %e, "Session lookup failed; treating as unauthenticated");
                return None;
            }
        };

        let touch = db::bounded(self.timeout, async {
            sqlx::query("UPDATE sessions SET last_accessed = ? WHERE id = ?")
                .bind(&now)
                .bind(&token_hash)
                .execute(&self.pool)
                .await?;
            Ok::<_, DbError>(())
        })
        .await;
        if let Err(e) = touch {
            warn!(user_id = record.user_id, error = %e, "Failed to touch session");
        }

        Some(record)
    }

    /// Idempotent
    pub async fn delete_session(&self, token: &str) -> Result<(), DbError> {
        db::bounded(self.timeout, async {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(hash_token(token))
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Drop expired sessions and rate-limit windows older than a day
    pub async fn purge_expired(&self) -> Result<u64, DbError> {
        let now = Utc::now();
        let stale_window_ms = (now - Duration::days(1)).timestamp_millis();

        db::bounded(self.timeout, async {
            let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
                .bind(db::timestamp(now))
                .execute(&self.pool)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM rate_limits WHERE window_start_ms < ?")
                .bind(stale_window_ms)
                .execute(&self.pool)
                .await?;
            Ok(sessions)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_user, NewUser};

    async fn setup() -> (SqlitePool, SessionStore, i64) {
        let pool = db::connect_in_memory().await.unwrap();
        let user = create_user(
            &pool,
            NewUser {
                username: "frank",
                email: Some("frank@example.com"),
                password_hash: "x",
                role: "sales",
                must_change_password: false,
            },
        )
        .await
        .unwrap();
        let store = SessionStore::new(
            pool.clone(),
            &AuthConfig::default(),
            std::time::Duration::from_secs(5),
        );
        (pool, store, user.id)
    }

    #[tokio::test]
    async fn test_create_and_resolve_session() {
        let (_pool, store, user_id) = setup().await;
        let session = store.create_session(user_id).await.unwrap();
        assert_ne!(session.token, session.csrf_token);

        let record = store.get_session(&session.token).await.unwrap();
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.username, "frank");
        assert_eq!(record.csrf_token, session.csrf_token);

        assert!(store.get_session("not-a-token").await.is_none());
    }

    #[tokio::test]
    async fn test_token_is_stored_hashed() {
        let (pool, store, user_id) = setup().await;
        let session = store.create_session(user_id).await.unwrap();
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM sessions")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(ids, vec![hash_token(&session.token)]);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected_before_purge() {
        let (pool, store, user_id) = setup().await;
        let session = store.create_session(user_id).await.unwrap();
        sqlx::query("UPDATE sessions SET expires_at = ?")
            .bind(db::timestamp(Utc::now() - Duration::seconds(1)))
            .execute(&pool)
            .await
            .unwrap();

        assert!(store.get_session(&session.token).await.is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_pool, store, user_id) = setup().await;
        let session = store.create_session(user_id).await.unwrap();
        store.delete_session(&session.token).await.unwrap();
        store.delete_session(&session.token).await.unwrap();
        assert!(store.get_session(&session.token).await.is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let (pool, store, user_id) = setup().await;
        let session = store.create_session(user_id).await.unwrap();
        pool.close().await;
        assert!(store.get_session(&session.token).await.is_none());
    }
}
