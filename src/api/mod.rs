pub mod auth;
mod contacts;
mod csrf;
pub mod error;
mod public;
mod quotes;
pub mod rate_limit;
mod reports;
pub mod validation;

pub use error::{ApiError, ErrorCode};

use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info_span, Span};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Login is only throttled; the session cookie does not exist yet
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_login,
        ))
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::session))
        .merge(
            Router::new()
                .route("/password", post(auth::change_password))
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    csrf::require_csrf,
                ))
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit::rate_limit_mutation,
                )),
        );

    let quote_routes = Router::new()
        .route("/", get(quotes::list_quotes).post(quotes::create_quote))
        .route(
            "/:id",
            get(quotes::get_quote)
                .patch(quotes::update_quote)
                .delete(quotes::delete_quote),
        )
        .route("/:id/events", get(quotes::quote_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            csrf::require_csrf,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_quotes,
        ));

    let contact_routes = Router::new()
        .route("/", get(contacts::list_contacts).post(contacts::create_contact))
        .route(
            "/:id",
            get(contacts::get_contact)
                .patch(contacts::update_contact)
                .delete(contacts::delete_contact),
        )
        .route("/:id/convert", post(contacts::convert_contact))
        .route("/:id/events", get(contacts::contact_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            csrf::require_csrf,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_mutation,
        ));

    // Website forms: no session, so no CSRF; throttled per client
    let public_routes = Router::new()
        .route("/api/quote", post(public::submit_quote))
        .route("/api/contact", post(public::submit_contact))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_public_form,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/reports/kpi", get(reports::kpi))
        .nest("/api/auth", auth_routes)
        .nest("/api/quotes", quote_routes)
        .nest("/api/contacts", contact_routes)
        .merge(public_routes)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
        .with_state(state)
}

/// Request span without headers: they carry the session cookie and CSRF token
fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    info_span!(
        "http-request",
        method = %request.method(),
        path = request.uri().path(),
        request_id
    )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
