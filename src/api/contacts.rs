//! Staff contact endpoints, including conversion into a quote.

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
use super::quotes::{date_range, DeletedResponse, EventsResponse};
use super::validation::{
    clean, normalize_country_code, validate_email, validate_max_len, validate_phone,
    validate_required,
};
use crate::auth::{Action, Module};
use crate::db::{self, tables, Contact, ContactQuery, ContactView, Paginated};
use crate::lifecycle::{ContactPatch, ContactStatus, Conversion, NewContact};
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ContactListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ContactResponse<T> {
    pub contact: T,
}

fn parse_status(
    errors: &mut ValidationErrorBuilder,
    raw: Option<String>,
) -> Option<ContactStatus> {
    let raw = clean(raw)?;
    match raw.parse::<ContactStatus>() {
        Ok(status) => Some(status),
        Err(e) => {
            errors.add("status", e);
            None
        }
    }
}

fn list_query(params: ContactListParams) -> Result<ContactQuery, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let status = parse_status(&mut errors, params.status);
    let (from, to) = date_range(&mut errors, params.from, params.to);
    errors.finish()?;

    Ok(ContactQuery {
        page: params.page,
        limit: params.limit,
        status,
        from,
        to,
        search: clean(params.search),
    })
}

struct ContactFields {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    country_code: Option<String>,
    subject: Option<String>,
    message: Option<String>,
}

/// Shared field checks for create and update; presence is checked by the caller
fn contact_fields(
    errors: &mut ValidationErrorBuilder,
    request: &mut ContactRequest,
) -> ContactFields {
    let name = clean(request.name.take());
    if let Some(name) = &name {
        errors.check("name", validate_max_len(name, "Name", 120));
    }
    let email = clean(request.email.take());
    if let Some(email) = &email {
        errors.check("email", validate_email(email));
    }
    let phone = clean(request.phone.take());
    if let Some(phone) = &phone {
        errors.check("phone", validate_phone(phone));
    }
    let subject = clean(request.subject.take());
    if let Some(subject) = &subject {
        errors.check("subject", validate_max_len(subject, "Subject", 200));
    }
    let message = clean(request.message.take());
    if let Some(message) = &message {
        errors.check("message", validate_max_len(message, "Message", 5000));
    }
    let country_code = clean(request.country_code.take()).and_then(|raw| {
        let normalized = normalize_country_code(&raw);
        if normalized.is_none() {
            errors.add("country_code", "Invalid country code");
        }
        normalized
    });

    ContactFields {
        name,
        email,
        phone,
        country_code,
        subject,
        message,
    }
}

fn new_contact(mut request: ContactRequest, owner_id: i64) -> Result<NewContact, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let fields = contact_fields(&mut errors, &mut request);

    if fields.name.is_none() {
        errors.add("name", "Name is required");
    }
    if fields.email.is_none() {
        errors.add("email", "Email is required");
    }
    errors.check(
        "message",
        validate_required(fields.message.as_deref(), "Message", 5000),
    );
    errors.finish()?;

    let (Some(name), Some(email)) = (fields.name, fields.email) else {
        return Err(ApiError::bad_request("Name and email are required"));
    };
    Ok(NewContact {
        name,
        email,
        phone: fields.phone,
        country_code: fields.country_code,
        subject: fields.subject,
        message: fields.message,
        owner_id: Some(owner_id),
    })
}

fn contact_patch(mut request: ContactRequest) -> Result<ContactPatch, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let fields = contact_fields(&mut errors, &mut request);
    let status = parse_status(&mut errors, request.status.take());
    errors.finish()?;

    Ok(ContactPatch {
        name: fields.name,
        email: fields.email,
        phone: fields.phone,
        country_code: fields.country_code,
        subject: fields.subject,
        message: fields.message,
        status,
        owner_id: request.owner_id,
    })
}

/// List contacts visible to the caller
///
/// GET /api/contacts
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    params: Result<Query<ContactListParams>, QueryRejection>,
) -> Result<Json<Paginated<ContactView>>, ApiError> {
    let scope = auth
        .permissions
        .owner_scope(Module::Contacts, Action::Read)
        .ok_or_else(|| ApiError::forbidden("Insufficient permissions"))?;
    let Query(params) = params?;
    let query = list_query(params)?;

    let timeout = state.config.database.query_timeout();
    let page = db::bounded(timeout, db::list_contacts(&state.db, scope, &query)).await?;
    Ok(Json(page))
}

async fn load_readable_contact(
    state: &AppState,
    auth: &Authenticated,
    id: i64,
) -> Result<ContactView, ApiError> {
    let timeout = state.config.database.query_timeout();
    let contact = db::bounded(timeout, db::get_contact(&state.db, id))
        .await?
        .ok_or_else(|| ApiError::not_found("Contact not found"))?;

    if !auth
        .permissions
        .can_access_resource(Module::Contacts, Action::Read, contact.contact.owner_id)
    {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    Ok(contact)
}

/// GET /api/contacts/:id
pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ContactResponse<ContactView>>, ApiError> {
    let Path(id) = id?;
    let contact = load_readable_contact(&state, &auth, id).await?;
    Ok(Json(ContactResponse { contact }))
}

/// Staff-entered contact, owned by the caller
///
/// POST /api/contacts
pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ContactResponse<Contact>>), ApiError> {
    if !auth.permissions.has_any_access(Module::Contacts, Action::Create) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    let Json(request) = payload?;

    let owner_id = match request.owner_id {
        Some(owner_id)
            if owner_id != auth.user_id()
                && !auth
                    .permissions
                    .has_unrestricted_access(Module::Contacts, Action::Create) =>
        {
            return Err(ApiError::forbidden(
                "Insufficient permissions to assign contacts to other users",
            ));
        }
        Some(owner_id) => owner_id,
        None => auth.user_id(),
    };

    let contact = new_contact(request, owner_id)?;
    let contact = state
        .lifecycle
        .create_contact(contact, Some(auth.user_id()))
        .await?;
    Ok((StatusCode::CREATED, Json(ContactResponse { contact })))
}

/// PATCH /api/contacts/:id
pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ContactRequest>, JsonRejection>,
) -> Result<Json<ContactResponse<Contact>>, ApiError> {
    let Path(id) = id?;
    if !auth.permissions.has_any_access(Module::Contacts, Action::Update) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }
    let Json(request) = payload?;
    let patch = contact_patch(request)?;

    if patch.owner_id.is_some()
        && !auth
            .permissions
            .has_unrestricted_access(Module::Contacts, Action::Update)
    {
        return Err(ApiError::forbidden(
            "Insufficient permissions to reassign contacts",
        ));
    }

    let permissions = &auth.permissions;
    let contact = state
        .lifecycle
        .update_contact(id, patch, Some(auth.user_id()), |owner_id| {
            permissions.can_access_resource(Module::Contacts, Action::Update, owner_id)
        })
        .await?;
    Ok(Json(ContactResponse { contact }))
}

/// DELETE /api/contacts/:id
pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let Path(id) = id?;
    if !auth.permissions.has_any_access(Module::Contacts, Action::Delete) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }

    let permissions = &auth.permissions;
    state
        .lifecycle
        .delete_contact(id, Some(auth.user_id()), |owner_id| {
            permissions.can_access_resource(Module::Contacts, Action::Delete, owner_id)
        })
        .await?;
    Ok(Json(DeletedResponse { success: true }))
}

/// Convert a contact into a pending quote owned by the caller.
/// Gated by UPDATE on the contact; a second conversion is a 409.
///
/// POST /api/contacts/:id/convert
pub async fn convert_contact(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<(StatusCode, Json<Conversion>), ApiError> {
    let Path(id) = id?;
    if !auth.permissions.has_any_access(Module::Contacts, Action::Update) {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }

    let permissions = &auth.permissions;
    let conversion = state
        .lifecycle
        .convert_contact(id, auth.user_id(), |owner_id| {
            permissions.can_access_resource(Module::Contacts, Action::Update, owner_id)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(conversion)))
}

/// GET /api/contacts/:id/events
pub async fn contact_events(
    State(state): State<Arc<AppState>>,
    auth: Authenticated,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<EventsResponse>, ApiError> {
    let Path(id) = id?;
    load_readable_contact(&state, &auth, id).await?;

    let timeout = state.config.database.query_timeout();
    let events = db::bounded(timeout, db::list_events(&state.db, tables::CONTACTS, id)).await?;
    Ok(Json(EventsResponse { events }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_contact_requires_message() {
        let err = new_contact(
            ContactRequest {
                name: Some("Lee".to_string()),
                email: Some("lee@example.com".to_string()),
                ..Default::default()
            },
            1,
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_new_contact_trims_and_owns() {
        let contact = new_contact(
            ContactRequest {
                name: Some(" Lee ".to_string()),
                email: Some("lee@example.com".to_string()),
                message: Some("Need a baler".to_string()),
                country_code: Some("+92".to_string()),
                subject: Some("   ".to_string()),
                ..Default::default()
            },
            4,
        )
        .unwrap();
        assert_eq!(contact.name, "Lee");
        assert_eq!(contact.subject, None);
        assert_eq!(contact.owner_id, Some(4));
        assert_eq!(contact.country_code.as_deref(), Some("+92"));
    }

    #[test]
    fn test_patch_parses_status() {
        let patch = contact_patch(ContactRequest {
            status: Some("contacted".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(patch.status, Some(ContactStatus::Contacted));
        assert!(contact_patch(ContactRequest {
            status: Some("lost".to_string()),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_name_length_limit() {
        let err = contact_patch(ContactRequest {
            name: Some("x".repeat(121)),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
