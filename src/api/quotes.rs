//! Staff quote endpoints: scope-filtered reads, permission-gated writes.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::Authenticated;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    clean, normalize_country_code, parse_date_bound, validate_email, validate_max_len,
    validate_phone, validate_required, NumberOrString,
};
use crate::auth::{Action, Module};
use crate::db::{self, tables, EventView, Paginated, Quote, QuoteQuery, QuoteView};
use crate::lifecycle::{NewQuote, QuotePatch, QuoteStatus};
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct QuoteListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub owner_id: Option<i64>,
    pub country_code: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuoteRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub product: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<i64>,
    pub estimated_value: Option<NumberOrString>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateQuoteRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub product: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<i64>,
    pub estimated_value: Option<NumberOrString>,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse<T> {
    pub quote: T,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EventView>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
}

/// Normalize optional `from`/`to` filters, recording parse failures
pub(super) fn date_range(
    errors: &mut ValidationErrorBuilder,
    from: Option<String>,
    to: Option<String>,
) -> (Option<String>, Option<String>) {
    let mut bound = |field: &str, value: Option<String>, end_of_day: bool| {
        let value = clean(value)?;
        match parse_date_bound(&value, end_of_day) {
            Ok(ts) => Some(ts),
            Err(e) => {
                errors.add(field, e);
                None
            }
        }
    };
    let from = bound("from", from, false);
    let to = bound("to", to, true);
    (from, to)
}

fn parse_status(errors: &mut ValidationErrorBuilder, raw: Option<String>) -> Option<QuoteStatus> {
    let raw = clean(raw)?;
    match raw.parse::<QuoteStatus>() {
        Ok(status) => Some(status),
        Err(e) => {
            errors.add("status", e);
            None
        }
    }
}

fn parse_value(errors: &mut ValidationErrorBuilder, raw: Option<NumberOrString>) -> Option<f64> {
    match raw?.to_f64() {
        Ok(value) => Some(value),
        Err(e) => {
            errors.add("estimated_value", e);
            None
        }
    }
}

fn check_optional(
    errors: &mut ValidationErrorBuilder,
    field: &str,
    value: &Option<String>,
    check: impl Fn(&str) -> Result<(), String>,
) {
    if let Some(value) = value {
        errors.check(field, check(value));
    }
}

fn list_query(params: QuoteListParams) -> Result<QuoteQuery, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let status = parse_status(&mut errors, params.status);
    let (from, to) = date_range(&mut errors, params.from, params.to);
    errors.finish()?;

    Ok(QuoteQuery {
        page: params.page,
        limit: params.limit,
        status,
        owner_id: params.owner_id,
        country_code: clean(params.country_code).and_then(|c| normalize_country_code(&c)),
        from,
        to,
        search: clean(params.search),
    })
}

fn new_quote(request: CreateQuoteRequest, owner_id: i64) -> Result<NewQuote, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let name = clean(request.name);
    errors.check("name", validate_required(name.as_deref(), "Name", 255));
    let email = clean(request.email);
    match &email {
        Some(email) => errors.check("email", validate_email(email)),
        None => errors.add("email", "Email is required"),
    };
    let phone = clean(request.phone);
    check_optional(&mut errors, "phone", &phone, validate_phone);
    let product = clean(request.product);
    check_optional(&mut errors, "product", &product, |v| {
        validate_max_len(v, "Product", 500)
    });
    let message = clean(request.message);
    check_optional(&mut errors, "message", &message, |v| {
        validate_max_len(v, "Message", 5000)
    });

    let country_code = match clean(request.country_code) {
        Some(raw) => {
            let normalized = normalize_country_code(&raw);
            if normalized.is_none() {
                errors.add("country_code", "Invalid country code");
            }
            normalized
        }
        None => None,
    };
    let status = parse_status(&mut errors, request.status);
    let estimated_value = parse_value(&mut errors, request.estimated_value);

    errors.finish()?;
    let (Some(name), Some(email)) = (name, email) else {
        return Err(ApiError::bad_request("Name and email are required"));
    };

    Ok(NewQuote {
        name,
        email,
        phone,
        country_code,
        product,
        message,
        status: status.unwrap_or(QuoteStatus::Pending),
        owner_id: Some(owner_id),
        estimated_value: estimated_value.unwrap_or(0.0),
    })
}

/// Blank strings are treated as absent; an unrecognized country code is
/// dropped so it cannot block an unrelated change such as a status move.
fn quote_patch(request: UpdateQuoteRequest) -> Result<QuotePatch, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let name = clean(request.name);
    check_optional(&mut errors, "name", &name, |v| validate_max_len(v, "Name", 255));
    let email = clean(request.email);
    check_optional(&mut errors, "email", &email, validate_email);
    let phone = clean(request.phone);
    check_optional(&mut errors, "phone", &phone, validate_phone);
    let product = clean(request.product);
    check_optional(&mut errors, "product", &product, |v| {
        validate_max_len(v, "Product", 500)
    });
    let message = clean(request.message);
    check_optional(&mut errors, "message", &message, |v| {
        validate_max_len(v, "Message", 5000)
    });

    let country_code = clean(request.country_code).and_then(|raw| {
        let normalized = normalize_country_code(&raw);
        if normalized.is_none() {
            tracing::warn!(country_code = %raw, "Dropping unrecognized country code from quote update");
        }
        normalized
    });
    let status = parse_status(&mut errors, request.status);
    let estimated_value = parse_value(&mut errors, request.estimated_value);

    errors.finish()?;
    Ok(QuotePatch {
        name,
        email,
        phone,
        country_code,
        product,
        message,
        status,
        owner_id: request.owner_id,
        estimated_value,
    })
}

/// List quotes visible to the caller
///
/// GET /api/quotes
pub async fn list_quotes(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    params: Result<Query<QuoteListParams>, QueryRejection>,
) -> Result<Json<Paginated<QuoteView>>, ApiError> {
    let scope = auth
        .permissions
        .owner_scope(Module::Quotes, Action::Read)
        .ok_or_else(|| ApiError::forbidden("Insufficient permissions"))?;
    let Query(params) = params?;
    let query = list_query(params)?;

    let timeout = state.config.database.query_timeout();
    let page = db::bounded(timeout, db::list_quotes(&state.db, scope, &query)).await?;
    Ok(Json(page))
}

async fn load_readable_quote(
    state: &AppState,
    auth: &Authenticated,
    id: i64,
) -> Result<QuoteView, ApiError> {
    let timeout = state.config.database.query_timeout();
    let quote = db::bounded(timeout, db::get_quote(&state.db, id))
        .await?
        .ok_or_else(|| ApiError::not_found("Quote not found"))?;

    if !auth
        .permissions
        .can_access_resource(Module::Quotes, Action::Read, quote.quote.owner_id)
    {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    Ok(quote)
}

/// Get a single quote
///
/// GET /api/quotes/:id
pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<QuoteResponse<QuoteView>>, ApiError> {
    let Path(id) = id?;
    let quote = load_readable_quote(&state, &auth, id).await?;
    Ok(Json(QuoteResponse { quote }))
}

/// Create a quote; the caller owns it unless an ALL-scope creator assigns it
///
/// POST /api/quotes
pub async fn create_quote(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    payload: Result<Json<CreateQuoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QuoteResponse<Quote>>), ApiError> {
    if !auth.permissions.has_any_access(Module::Quotes, Action::Create) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    let Json(request) = payload?;

    let owner_id = match request.owner_id {
        Some(owner_id)
            if owner_id != auth.user_id()
                && !auth
                    .permissions
                    .has_unrestricted_access(Module::Quotes, Action::Create) =>
        {
            return Err(ApiError::forbidden(
                "Insufficient permissions to assign quotes to other users",
            ));
        }
        Some(owner_id) => owner_id,
        None => auth.user_id(),
    };

    let quote = new_quote(request, owner_id)?;
    let quote = state
        .lifecycle
        .create_quote(quote, Some(auth.user_id()))
        .await?;
    Ok((StatusCode::CREATED, Json(QuoteResponse { quote })))
}

/// Partially update a quote
///
/// PATCH /api/quotes/:id
pub async fn update_quote(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateQuoteRequest>, JsonRejection>,
) -> Result<Json<QuoteResponse<Quote>>, ApiError> {
    let Path(id) = id?;
    if !auth.permissions.has_any_access(Module::Quotes, Action::Update) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    let Json(request) = payload?;
    let patch = quote_patch(request)?;

    if patch.owner_id.is_some()
        && !auth
            .permissions
            .has_unrestricted_access(Module::Quotes, Action::Update)
    {
        return Err(ApiError::forbidden(
            "Insufficient permissions to reassign quotes",
        ));
    }

    let permissions = &auth.permissions;
    let quote = state
        .lifecycle
        .update_quote(id, patch, Some(auth.user_id()), |owner_id| {
            permissions.can_access_resource(Module::Quotes, Action::Update, owner_id)
        })
        .await?;
    Ok(Json(QuoteResponse { quote }))
}

/// Delete a quote
///
/// DELETE /api/quotes/:id
pub async fn delete_quote(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let Path(id) = id?;
    if !auth.permissions.has_any_access(Module::Quotes, Action::Delete) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }

    let permissions = &auth.permissions;
    state
        .lifecycle
        .delete_quote(id, Some(auth.user_id()), |owner_id| {
            permissions.can_access_resource(Module::Quotes, Action::Delete, owner_id)
        })
        .await?;
    Ok(Json(DeletedResponse { success: true }))
}

/// Audit history of a quote, newest first
///
/// GET /api/quotes/:id/events
pub async fn quote_events(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<EventsResponse>, ApiError> {
    let Path(id) = id?;
    load_readable_quote(&state, &auth, id).await?;

    let timeout = state.config.database.query_timeout();
    let events = db::bounded(timeout, db::list_events(&state.db, tables::QUOTES, id)).await?;
    Ok(Json(EventsResponse { events }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_normalizes_filters() {
        let query = list_query(QuoteListParams {
            status: Some("won".to_string()),
            country_code: Some("de".to_string()),
            from: Some("2026-01-01".to_string()),
            to: Some("2026-01-31".to_string()),
            search: Some("  ".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.status, Some(QuoteStatus::Won));
        assert_eq!(query.country_code.as_deref(), Some("DE"));
        assert_eq!(query.from.as_deref(), Some("2026-01-01T00:00:00.000Z"));
        assert_eq!(query.to.as_deref(), Some("2026-01-31T23:59:59.999Z"));
        assert_eq!(query.search, None);
    }

    #[test]
    fn test_list_query_rejects_bad_status_and_dates() {
        let err = list_query(QuoteListParams {
            status: Some("maybe".to_string()),
            from: Some("yesterday".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_new_quote_defaults() {
        let quote = new_quote(
            CreateQuoteRequest {
                name: Some(" Ada ".to_string()),
                email: Some("ada@example.com".to_string()),
                phone: None,
                country_code: Some("+44".to_string()),
                product: None,
                message: None,
                status: None,
                owner_id: None,
                estimated_value: Some(NumberOrString::Text("1500".to_string())),
            },
            7,
        )
        .unwrap();
        assert_eq!(quote.name, "Ada");
        assert_eq!(quote.status, QuoteStatus::Pending);
        assert_eq!(quote.owner_id, Some(7));
        assert_eq!(quote.estimated_value, 1500.0);
        assert_eq!(quote.country_code.as_deref(), Some("+44"));
    }

    #[test]
    fn test_new_quote_requires_name_and_valid_email() {
        let err = new_quote(
            CreateQuoteRequest {
                name: None,
                email: Some("not-an-email".to_string()),
                phone: None,
                country_code: None,
                product: None,
                message: None,
                status: None,
                owner_id: None,
                estimated_value: None,
            },
            1,
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_patch_drops_blank_fields_and_bad_country() {
        let patch = quote_patch(UpdateQuoteRequest {
            name: Some("".to_string()),
            country_code: Some("Narnia".to_string()),
            status: Some("sent".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(patch.name, None);
        assert_eq!(patch.country_code, None);
        assert_eq!(patch.status, Some(QuoteStatus::Sent));
    }

    #[test]
    fn test_patch_rejects_negative_value() {
        let err = quote_patch(UpdateQuoteRequest {
            estimated_value: Some(NumberOrString::Number(-5.0)),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
