//! Quote rows and list queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{like_pattern, Filter, OwnerScope, PageRequest, Paginated};
use crate::db::DbError;
use crate::lifecycle::QuoteStatus;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Quote {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub product: Option<String>,
    pub message: Option<String>,
    pub status: QuoteStatus,
    pub owner_id: Option<i64>,
    pub estimated_value: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Quote with the owner's username for list and detail views
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QuoteView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub quote: Quote,
    pub owner_username: Option<String>,
}

/// Query parameters for filtering quotes
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QuoteQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<QuoteStatus>,
    pub owner_id: Option<i64>,
    pub country_code: Option<String>,
    /// Lower bound on `created_at`, already normalized to a stored timestamp
    pub from: Option<String>,
    /// Upper bound on `created_at`, already normalized to a stored timestamp
    pub to: Option<String>,
    /// Matches name, email or product
    pub search: Option<String>,
}

const QUOTE_VIEW_SELECT: &str = "SELECT q.*, u.username AS owner_username \
     FROM quotes q LEFT JOIN users u ON u.id = q.owner_id";

pub async fn list_quotes(
    pool: &SqlitePool,
    scope: OwnerScope,
    query: &QuoteQuery,
) -> Result<Paginated<QuoteView>, DbError> {
    let page = PageRequest::new(query.page, query.limit);

    let mut filter = Filter::new();
    filter.scope("q.owner_id = ?", scope);
    if let Some(status) = query.status {
        filter.text("q.status = ?", status.as_str());
    }
    if let Some(owner_id) = query.owner_id {
        filter.int("q.owner_id = ?", owner_id);
    }
    if let Some(country_code) = &query.country_code {
        filter.text("q.country_code = ?", country_code.as_str());
    }
    if let Some(from) = &query.from {
        filter.text("q.created_at >= ?", from.as_str());
    }
    if let Some(to) = &query.to {
        filter.text("q.created_at <= ?", to.as_str());
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter.text_repeated(
            "(q.name LIKE ? ESCAPE '\\' OR q.email LIKE ? ESCAPE '\\' OR q.product LIKE ? ESCAPE '\\')",
            &like_pattern(search),
            3,
        );
    }
    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM quotes q {}", where_clause);
    let total = filter
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "{} {} ORDER BY q.created_at DESC, q.id DESC LIMIT ? OFFSET ?",
        QUOTE_VIEW_SELECT, where_clause
    );
    let items = filter
        .bind_as(sqlx::query_as::<_, QuoteView>(&sql))
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.paginate(items, total))
}

pub async fn get_quote(pool: &SqlitePool, id: i64) -> Result<Option<QuoteView>, DbError> {
    let sql = format!("{} WHERE q.id = ?", QUOTE_VIEW_SELECT);
    let quote = sqlx::query_as::<_, QuoteView>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(quote)
}
