mod models;

pub use models::*;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::Config;

pub type DbPool = SqlitePool;

/// Persistence failure as seen by the auth and lifecycle layers
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database call exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Run a persistence future under a deadline.
///
/// A deadline miss drops the future, which rolls back any transaction it held.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DbError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::Timeout(limit).into()),
    }
}

/// Canonical timestamp text stored in every `*_at` column.
///
/// Fixed-width UTC with millisecond precision so string comparison in SQL
/// matches chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

/// Split a migration file into statements.
///
/// Comment lines are dropped before splitting so a `;` inside a comment
/// never ends a statement.
fn split_statements(sql: &str) -> Vec<String> {
    let cleaned: String = sql
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    cleaned
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in split_statements(sql) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn init(config: &Config) -> Result<DbPool> {
    let in_memory = config.database.path.starts_with("sqlite::memory:");
    let url = if in_memory {
        config.database.path.clone()
    } else {
        let db_path = config.server.data_dir.join(&config.database.path);
        info!("Initializing database at {}", db_path.display());
        format!("sqlite:{}", db_path.display())
    };

    let mut options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(config.database.query_timeout());
    if !in_memory {
        // WAL lets readers proceed while a lifecycle transaction is writing
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool_options = SqlitePoolOptions::new().acquire_timeout(config.database.query_timeout());
    let pool = if in_memory {
        // Every connection to :memory: is its own database, so pin a single one
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        pool_options
            .max_connections(config.database.max_connections)
            .connect_with(options)
            .await?
    };

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Migrated single-connection in-memory database, used by tests
pub async fn connect_in_memory() -> Result<DbPool> {
    let mut config = Config::default();
    config.database.path = "sqlite::memory:".to_string();
    init(&config).await
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Initial schema (idempotent CREATE IF NOT EXISTS)
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Built-in roles and grants (INSERT OR IGNORE, safe on every startup)
    execute_sql(pool, include_str!("../../migrations/002_seed_roles.sql")).await?;

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width_and_ordered() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        assert_eq!(timestamp(a), "2026-01-09T08:00:00.000Z");
        assert!(timestamp(a) < timestamp(b));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), DbError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DbError::Timeout(_))));
    }

    #[test]
    fn test_split_statements_ignores_semicolons_in_comments() {
        let sql = "-- first; with a semicolon\nCREATE TABLE a (id INTEGER);\n\n\
                   -- trailing note; also split-looking\nCREATE TABLE b (id INTEGER);\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (id INTEGER)", "CREATE TABLE b (id INTEGER)"]
        );
    }

    #[tokio::test]
    async fn test_migrations_seed_roles() {
        let pool = connect_in_memory().await.unwrap();
        let roles: Vec<(String,)> = sqlx::query_as("SELECT name FROM roles ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<&str> = roles.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["admin", "sales", "viewer"]);

        // Re-running is harmless
        run_migrations(&pool).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM roles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 3);
    }
}
