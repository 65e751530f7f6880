//! Per-account failed-login counter with timed lockout.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::config::AuthConfig;
use crate::db::{self, DbError};

#[derive(Clone)]
pub struct LockoutTracker {
    pool: SqlitePool,
    threshold: i64,
    lock_for: Duration,
    timeout: std::time::Duration,
}

impl LockoutTracker {
    pub fn new(pool: SqlitePool, config: &AuthConfig, timeout: std::time::Duration) -> Self {
        Self {
            pool,
            threshold: config.lockout_threshold.max(1),
            lock_for: Duration::minutes(config.lockout_minutes),
            timeout,
        }
    }

    pub async fn is_locked(&self, username: &str) -> Result<bool, DbError> {
        let locked_until: Option<Option<String>> = db::bounded(self.timeout, async {
            let row = sqlx::query_scalar("SELECT locked_until FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
            Ok::<_, DbError>(row)
        })
        .await?;

        let now = db::now();
        Ok(matches!(locked_until, Some(Some(until)) if until > now))
    }

    /// Count one failure. Reaching the threshold locks the account from now;
    /// a lock that has already run out starts a fresh count.
    pub async fn increment_failed_attempts(&self, username: &str) -> Result<(), DbError> {
        let now = Utc::now();
        let now_ts = db::timestamp(now);
        let lock_until = db::timestamp(now + self.lock_for);

        db::bounded(self.timeout, async {
            sqlx::query(
                r#"
                UPDATE users SET
                    failed_attempts = CASE
                        WHEN locked_until IS NOT NULL AND locked_until <= ?1 THEN 1
                        ELSE failed_attempts + 1 END,
                    locked_until = CASE
                        WHEN (CASE
                            WHEN locked_until IS NOT NULL AND locked_until <= ?1 THEN 1
                            ELSE failed_attempts + 1 END) >= ?2 THEN ?3
                        WHEN locked_until IS NOT NULL AND locked_until <= ?1 THEN NULL
                        ELSE locked_until END,
                    updated_at = ?1
                WHERE username = ?4
                "#,
            )
            .bind(&now_ts)
            .bind(self.threshold)
            .bind(&lock_until)
            .bind(username)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn reset_failed_attempts(&self, username: &str) -> Result<(), DbError> {
        db::bounded(self.timeout, async {
            sqlx::query(
                "UPDATE users SET failed_attempts = 0, locked_until = NULL, updated_at = ? \
                 WHERE username = ?",
            )
            .bind(db::now())
            .bind(username)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}
