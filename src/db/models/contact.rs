//! Contact rows and list queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{like_pattern, Filter, OwnerScope, PageRequest, Paginated};
use crate::db::DbError;
use crate::lifecycle::ContactStatus;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub status: ContactStatus,
    pub owner_id: Option<i64>,
    pub converted_to_quote_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    pub fn is_converted(&self) -> bool {
        self.converted_to_quote_id.is_some() || self.status == ContactStatus::Converted
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ContactView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub contact: Contact,
    pub owner_username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContactQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<ContactStatus>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Matches name, email or subject
    pub search: Option<String>,
}

const CONTACT_VIEW_SELECT: &str = "SELECT c.*, u.username AS owner_username \
     FROM contacts c LEFT JOIN users u ON u.id = c.owner_id";

pub async fn list_contacts(
    pool: &SqlitePool,
    scope: OwnerScope,
    query: &ContactQuery,
) -> Result<Paginated<ContactView>, DbError> {
    let page = PageRequest::new(query.page, query.limit);

    let mut filter = Filter::new();
    filter.scope("c.owner_id = ?", scope);
    if let Some(status) = query.status {
        filter.text("c.status = ?", status.as_str());
    }
    if let Some(from) = &query.from {
        filter.text("c.created_at >= ?", from.as_str());
    }
    if let Some(to) = &query.to {
        filter.text("c.created_at <= ?", to.as_str());
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter.text_repeated(
            "(c.name LIKE ? ESCAPE '\\' OR c.email LIKE ? ESCAPE '\\' OR c.subject LIKE ? ESCAPE '\\')",
            &like_pattern(search),
            3,
        );
    }
    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM contacts c {}", where_clause);
    let total = filter
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "{} {} ORDER BY c.created_at DESC, c.id DESC LIMIT ? OFFSET ?",
        CONTACT_VIEW_SELECT, where_clause
    );
    let items = filter
        .bind_as(sqlx::query_as::<_, ContactView>(&sql))
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.paginate(items, total))
}

pub async fn get_contact(pool: &SqlitePool, id: i64) -> Result<Option<ContactView>, DbError> {
    let sql = format!("{} WHERE c.id = ?", CONTACT_VIEW_SELECT);
    let contact = sqlx::query_as::<_, ContactView>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(contact)
}
