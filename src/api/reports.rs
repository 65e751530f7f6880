use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::auth::Authenticated;
use super::error::{ApiError, ValidationErrorBuilder};
use super::quotes::date_range;
use crate::auth::{Action, Module};
use crate::db::{self, KpiQuery, KpiReport};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct KpiParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Dashboard KPIs over the quotes the caller can read
///
/// GET /api/reports/kpi
pub async fn kpi(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    params: Result<Query<KpiParams>, QueryRejection>,
) -> Result<Json<KpiReport>, ApiError> {
    if !auth.permissions.has_any_access(Module::Reports, Action::Read) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    let scope = auth
        .permissions
        .owner_scope(Module::Quotes, Action::Read)
        .ok_or_else(|| ApiError::forbidden("Insufficient permissions"))?;

    let Query(params) = params?;
    let mut errors = ValidationErrorBuilder::new();
    let (from, to) = date_range(&mut errors, params.from, params.to);
    errors.finish()?;

    let timeout = state.config.database.query_timeout();
    let report = db::bounded(
        timeout,
        db::kpi_report(&state.db, scope, &KpiQuery { from, to }, Utc::now()),
    )
    .await?;
    Ok(Json(report))
}
