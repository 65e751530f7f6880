//! Quote and contact lifecycle: every mutation runs in one SQLite
//! transaction together with the event row(s) that describe it.
//!
//! Each operation opens its transaction with a write (`lock_*`), so the
//! connection holds SQLite's write lock before reading the row it is about
//! to change. Concurrent operations on the same database therefore
//! serialize instead of failing on a stale read snapshot.
//!
//! Authorization that depends on the stored owner is passed in as a guard
//! closure and evaluated inside the transaction, against the locked row.

mod contacts;
mod quotes;
pub mod status;

pub use contacts::{ContactPatch, Conversion, NewContact};
pub use quotes::{NewQuote, QuotePatch};
pub use status::{ContactStatus, QuoteStatus};

use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;

use crate::db::DbError;

/// Product recorded on quotes that did not name one
pub const DEFAULT_PRODUCT: &str = "General Inquiry";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not permitted")]
    Forbidden,
    #[error("cannot move {record} from '{from}' to '{to}'")]
    InvalidTransition {
        record: &'static str,
        from: String,
        to: String,
    },
    #[error("contact {contact_id} has already been converted")]
    AlreadyConverted {
        contact_id: i64,
        quote_id: Option<i64>,
    },
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<sqlx::Error> for LifecycleError {
    fn from(err: sqlx::Error) -> Self {
        LifecycleError::Db(DbError::Sqlx(err))
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    pool: SqlitePool,
    timeout: Duration,
}

impl Lifecycle {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

/// `{field: {from, to}}` for each listed field whose serialized value changed
fn field_changes<T: Serialize>(before: &T, after: &T, fields: &[&str]) -> serde_json::Value {
    let before = serde_json::to_value(before).unwrap_or_default();
    let after = serde_json::to_value(after).unwrap_or_default();
    let mut changes = serde_json::Map::new();
    for field in fields {
        let old = before.get(*field).cloned().unwrap_or_default();
        let new = after.get(*field).cloned().unwrap_or_default();
        if old != new {
            changes.insert(
                (*field).to_string(),
                serde_json::json!({ "from": old, "to": new }),
            );
        }
    }
    serde_json::Value::Object(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Row {
        a: i32,
        b: &'static str,
    }

    #[test]
    fn test_field_changes_only_reports_differences() {
        let before = Row { a: 1, b: "x" };
        let after = Row { a: 2, b: "x" };
        assert_eq!(
            field_changes(&before, &after, &["a", "b"]),
            json!({ "a": { "from": 1, "to": 2 } })
        );
        assert_eq!(field_changes(&before, &before, &["a"]), json!({}));
    }
}
