//! Append-only audit events for quotes and contacts.

use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::db::{self, DbError};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub table_name: String,
    pub record_id: i64,
    pub actor_id: Option<i64>,
    /// JSON payload describing the change
    pub changes: String,
    pub created_at: String,
}

/// Event as returned by the history endpoints, with `changes` decoded
#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub id: i64,
    pub event_type: String,
    pub table_name: String,
    pub record_id: i64,
    pub actor_id: Option<i64>,
    pub actor_username: Option<String>,
    pub changes: serde_json::Value,
    pub created_at: String,
}

#[derive(FromRow)]
struct EventRow {
    #[sqlx(flatten)]
    event: Event,
    actor_username: Option<String>,
}

impl From<EventRow> for EventView {
    fn from(row: EventRow) -> Self {
        let changes = serde_json::from_str(&row.event.changes)
            .unwrap_or(serde_json::Value::String(row.event.changes.clone()));
        Self {
            id: row.event.id,
            event_type: row.event.event_type,
            table_name: row.event.table_name,
            record_id: row.event.record_id,
            actor_id: row.event.actor_id,
            actor_username: row.actor_username,
            changes,
            created_at: row.event.created_at,
        }
    }
}

/// Event type names
pub mod event_types {
    pub const QUOTE_CREATED: &str = "quote_created";
    pub const QUOTE_UPDATED: &str = "quote_updated";
    pub const QUOTE_DELETED: &str = "quote_deleted";
    pub const QUOTE_CREATED_FROM_CONTACT: &str = "quote_created_from_contact";

    pub const CONTACT_CREATED: &str = "contact_created";
    pub const CONTACT_UPDATED: &str = "contact_updated";
    pub const CONTACT_DELETED: &str = "contact_deleted";
    pub const CONTACT_CONVERTED: &str = "contact_converted";
}

/// Tables an event can point at
pub mod tables {
    pub const QUOTES: &str = "quotes";
    pub const CONTACTS: &str = "contacts";
}

/// Append an event on the caller's connection, so it commits or rolls back
/// together with the row change it describes.
pub async fn insert_event(
    conn: &mut SqliteConnection,
    event_type: &str,
    table_name: &str,
    record_id: i64,
    actor_id: Option<i64>,
    changes: &serde_json::Value,
) -> Result<i64, DbError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO events (event_type, table_name, record_id, actor_id, changes, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(event_type)
    .bind(table_name)
    .bind(record_id)
    .bind(actor_id)
    .bind(changes.to_string())
    .bind(db::now())
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(
        event_type = event_type,
        table_name = table_name,
        record_id = record_id,
        actor_id = actor_id,
        "Event recorded"
    );

    Ok(id)
}

/// History for one record, newest first
pub async fn list_events(
    pool: &SqlitePool,
    table_name: &str,
    record_id: i64,
) -> Result<Vec<EventView>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT e.*, u.username AS actor_username
        FROM events e LEFT JOIN users u ON u.id = e.actor_id
        WHERE e.table_name = ? AND e.record_id = ?
        ORDER BY e.created_at DESC, e.id DESC
        "#,
    )
    .bind(table_name)
    .bind(record_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(EventView::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_list_events() {
        let pool = db::connect_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        insert_event(&mut conn, event_types::QUOTE_CREATED, tables::QUOTES, 7, None, &json!({}))
            .await
            .unwrap();
        insert_event(
            &mut conn,
            event_types::QUOTE_UPDATED,
            tables::QUOTES,
            7,
            None,
            &json!({"status": {"from": "pending", "to": "sent"}}),
        )
        .await
        .unwrap();
        insert_event(&mut conn, event_types::QUOTE_CREATED, tables::QUOTES, 8, None, &json!({}))
            .await
            .unwrap();
        drop(conn);

        let events = list_events(&pool, tables::QUOTES, 7).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, event_types::QUOTE_UPDATED);
        assert_eq!(events[0].changes["status"]["to"], "sent");
        assert!(events[0].actor_username.is_none());
    }
}
