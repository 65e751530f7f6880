//! Staff user accounts.

use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::db::{self, DbError};

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub must_change_password: bool,
    pub failed_attempts: i64,
    pub locked_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public projection of a user, never carries the hash
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub must_change_password: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            must_change_password: user.must_change_password,
        }
    }
}

/// Match on username, or on email when the identifier is one
pub async fn find_user_by_identifier(
    pool: &SqlitePool,
    identifier: &str,
) -> Result<Option<User>, DbError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE username = ? OR (email IS NOT NULL AND lower(email) = lower(?)) \
         ORDER BY username = ? DESC LIMIT 1",
    )
    .bind(identifier)
    .bind(identifier)
    .bind(identifier)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, DbError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn count_users(pool: &SqlitePool) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub must_change_password: bool,
}

pub async fn create_user(pool: &SqlitePool, user: NewUser<'_>) -> Result<User, DbError> {
    let now = db::now();
    let created = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, role, must_change_password, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(user.username)
    .bind(user.email)
    .bind(user.password_hash)
    .bind(user.role)
    .bind(user.must_change_password)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;
    Ok(created)
}

/// Replace the stored hash; `must_change_password` is cleared only when asked
pub async fn update_password_hash(
    pool: &SqlitePool,
    user_id: i64,
    password_hash: &str,
    clear_must_change: bool,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE users SET password_hash = ?, \
         must_change_password = CASE WHEN ? THEN 0 ELSE must_change_password END, \
         updated_at = ? WHERE id = ?",
    )
    .bind(password_hash)
    .bind(clear_must_change)
    .bind(db::now())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mask an email for logs: `ab***@domain`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(2).collect();
            format!("{}***@{}", visible, domain)
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "al***@example.com");
        assert_eq!(mask_email("a@x.io"), "a***@x.io");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[tokio::test]
    async fn test_find_by_username_or_email() {
        let pool = db::connect_in_memory().await.unwrap();
        let created = create_user(
            &pool,
            NewUser {
                username: "dana",
                email: Some("Dana@Example.com"),
                password_hash: "x",
                role: "sales",
                must_change_password: false,
            },
        )
        .await
        .unwrap();
        assert!(!created.must_change_password);

        let by_name = find_user_by_identifier(&pool, "dana").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        let by_email = find_user_by_identifier(&pool, "dana@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, created.id);
        assert!(find_user_by_identifier(&pool, "nobody").await.unwrap().is_none());
        assert_eq!(count_users(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_password_hash_clears_flag() {
        let pool = db::connect_in_memory().await.unwrap();
        let user = create_user(
            &pool,
            NewUser {
                username: "admin",
                email: None,
                password_hash: "old",
                role: "admin",
                must_change_password: true,
            },
        )
        .await
        .unwrap();

        update_password_hash(&pool, user.id, "rehashed", false).await.unwrap();
        let user = find_user_by_id(&pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash, "rehashed");
        assert!(user.must_change_password);

        update_password_hash(&pool, user.id, "new", true).await.unwrap();
        let user = find_user_by_id(&pool, user.id).await.unwrap().unwrap();
        assert!(!user.must_change_password);
    }
}
