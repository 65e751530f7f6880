//! KPI aggregates over quotes.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use super::common::{Filter, OwnerScope};
use crate::db::DbError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountryValue {
    pub country: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyTrend {
    /// `YYYY-MM`
    pub month: String,
    pub quotes: i64,
    pub won: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiReport {
    pub quotes_this_month: i64,
    pub quotes_last_month: i64,
    /// Percentage of quotes in range that were won
    pub win_rate: f64,
    /// Mean days from creation to the last update, over won and lost quotes
    pub avg_cycle_time: f64,
    pub total_value: f64,
    pub value_by_country: Vec<CountryValue>,
    pub status_distribution: Vec<StatusCount>,
    pub monthly_trend: Vec<MonthlyTrend>,
}

#[derive(Debug, Clone, Default)]
pub struct KpiQuery {
    /// Normalized lower bound on `created_at`
    pub from: Option<String>,
    /// Normalized upper bound on `created_at`
    pub to: Option<String>,
}

fn base_filter(scope: OwnerScope, query: &KpiQuery) -> Filter {
    let mut filter = Filter::new();
    filter.scope("owner_id = ?", scope);
    if let Some(from) = &query.from {
        filter.text("created_at >= ?", from.as_str());
    }
    if let Some(to) = &query.to {
        filter.text("created_at <= ?", to.as_str());
    }
    filter
}

fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// `YYYY-MM` of the month containing `now` and of the month before it
fn current_and_previous_month(now: DateTime<Utc>) -> (String, String) {
    let (year, month) = (now.year(), now.month());
    let previous = if month == 1 {
        month_key(year - 1, 12)
    } else {
        month_key(year, month - 1)
    };
    (month_key(year, month), previous)
}

pub async fn kpi_report(
    pool: &SqlitePool,
    scope: OwnerScope,
    query: &KpiQuery,
    now: DateTime<Utc>,
) -> Result<KpiReport, DbError> {
    let filter = base_filter(scope, query);
    let where_clause = filter.where_clause();

    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(estimated_value), 0.0) FROM quotes {}",
        where_clause
    );
    let (total, won, total_value): (i64, i64, f64) =
        filter.bind_as(sqlx::query_as(&sql)).fetch_one(pool).await?;
    let win_rate = if total > 0 {
        won as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let mut closed = base_filter(scope, query);
    closed.raw("status IN ('won', 'lost')");
    let sql = format!(
        "SELECT AVG(julianday(updated_at) - julianday(created_at)) FROM quotes {}",
        closed.where_clause()
    );
    let avg_cycle_time: Option<f64> = closed
        .bind_scalar(sqlx::query_scalar(&sql))
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "SELECT COALESCE(country_code, 'N/A'), COALESCE(SUM(estimated_value), 0.0) AS value \
         FROM quotes {} GROUP BY country_code ORDER BY value DESC LIMIT 20",
        where_clause
    );
    let value_by_country = filter
        .bind_as(sqlx::query_as::<_, (String, f64)>(&sql))
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(country, value)| CountryValue { country, value })
        .collect();

    let sql = format!(
        "SELECT status, COUNT(*) FROM quotes {} GROUP BY status ORDER BY status",
        where_clause
    );
    let status_distribution = filter
        .bind_as(sqlx::query_as::<_, (String, i64)>(&sql))
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect();

    // Latest twelve months with any quotes, returned oldest first
    let sql = format!(
        "SELECT substr(created_at, 1, 7) AS month, COUNT(*), \
         COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(estimated_value), 0.0) \
         FROM quotes {} GROUP BY month ORDER BY month DESC LIMIT 12",
        where_clause
    );
    let mut monthly_trend: Vec<MonthlyTrend> = filter
        .bind_as(sqlx::query_as::<_, (String, i64, i64, f64)>(&sql))
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|(month, quotes, won, value)| MonthlyTrend {
            month,
            quotes,
            won,
            value,
        })
        .collect();
    monthly_trend.reverse();

    let (this_month, last_month) = current_and_previous_month(now);
    let sql = format!(
        "SELECT COALESCE(SUM(CASE WHEN substr(created_at, 1, 7) = ? THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(CASE WHEN substr(created_at, 1, 7) = ? THEN 1 ELSE 0 END), 0) \
         FROM quotes {}",
        where_clause
    );
    let (quotes_this_month, quotes_last_month): (i64, i64) = filter
        .bind_as(sqlx::query_as(&sql).bind(this_month).bind(last_month))
        .fetch_one(pool)
        .await?;

    Ok(KpiReport {
        quotes_this_month,
        quotes_last_month,
        win_rate,
        avg_cycle_time: avg_cycle_time.unwrap_or(0.0),
        total_value,
        value_by_country,
        status_distribution,
        monthly_trend,
    })
}
