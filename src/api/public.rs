//! Unauthenticated lead intake from the website forms.
//!
//! The record is stored first (with its `*_created` event and no actor),
//! then the notification is attempted. A failed notification is reported as
//! a warning; the record stays.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    clean, validate_dial_code, validate_email, validate_max_len, validate_phone,
    validate_required,
};
use crate::db::mask_email;
use crate::lifecycle::{NewContact, NewQuote, QuoteStatus, DEFAULT_PRODUCT};
use crate::notifications::{LeadKind, LeadNotification};
use crate::AppState;

const NOTIFICATION_WARNING: &str =
    "Your request was saved, but the notification email could not be sent";

#[derive(Debug, Deserialize, Default)]
pub struct PublicQuoteRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub company: Option<String>,
    pub quantity: Option<String>,
    pub product: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PublicContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Validated public quote plus the fields that only go into the notification
struct QuoteSubmission {
    quote: NewQuote,
    company: Option<String>,
    quantity: Option<String>,
}

fn email_field(errors: &mut ValidationErrorBuilder, raw: Option<String>) -> Option<String> {
    let email = clean(raw);
    match &email {
        Some(email) => errors.check("email", validate_email(email)),
        None => errors.add("email", "Email is required"),
    };
    email
}

fn dial_code_field(errors: &mut ValidationErrorBuilder, raw: Option<String>) -> Option<String> {
    let code = clean(raw)?;
    errors.check("country_code", validate_dial_code(&code));
    Some(code)
}

fn quote_submission(request: PublicQuoteRequest) -> Result<QuoteSubmission, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let name = clean(request.name);
    errors.check("name", validate_required(name.as_deref(), "Name", 255));
    let email = email_field(&mut errors, request.email);
    let phone = clean(request.phone);
    match &phone {
        Some(phone) => errors.check("phone", validate_phone(phone)),
        None => errors.add("phone", "Phone is required"),
    };
    let country_code = dial_code_field(&mut errors, request.country_code);
    let message = clean(request.message);
    errors.check("message", validate_required(message.as_deref(), "Message", 5000));
    let product = clean(request.product);
    if let Some(product) = &product {
        errors.check("product", validate_max_len(product, "Product", 500));
    }
    let company = clean(request.company);
    if let Some(company) = &company {
        errors.check("company", validate_max_len(company, "Company", 255));
    }
    let quantity = clean(request.quantity);
    if let Some(quantity) = &quantity {
        errors.check("quantity", validate_max_len(quantity, "Quantity", 100));
    }

    errors.finish()?;
    let (Some(name), Some(email)) = (name, email) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    Ok(QuoteSubmission {
        quote: NewQuote {
            name,
            email,
            phone,
            country_code,
            product: Some(product.unwrap_or_else(|| DEFAULT_PRODUCT.to_string())),
            message,
            status: QuoteStatus::Pending,
            owner_id: None,
            estimated_value: 0.0,
        },
        company,
        quantity,
    })
}

fn contact_submission(request: PublicContactRequest) -> Result<NewContact, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    let name = clean(request.name);
    errors.check("name", validate_required(name.as_deref(), "Name", 120));
    let email = email_field(&mut errors, request.email);
    let phone = clean(request.phone);
    if let Some(phone) = &phone {
        errors.check("phone", validate_phone(phone));
    }
    let country_code = dial_code_field(&mut errors, request.country_code);
    let subject = clean(request.subject);
    if let Some(subject) = &subject {
        errors.check("subject", validate_max_len(subject, "Subject", 200));
    }
    let message = clean(request.message);
    errors.check("message", validate_required(message.as_deref(), "Message", 5000));

    errors.finish()?;
    let (Some(name), Some(email)) = (name, email) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    Ok(NewContact {
        name,
        email,
        phone,
        country_code,
        subject,
        message,
        owner_id: None,
    })
}

async fn notify(state: &AppState, notification: LeadNotification) -> (Option<String>, Option<String>) {
    match state.notifier.send_notification(&notification).await {
        Ok(message_id) => (Some(message_id), None),
        Err(e) => {
            tracing::warn!(
                kind = ?notification.kind,
                record_id = notification.record_id,
                error = %e,
                "Lead notification failed; record kept"
            );
            (None, Some(NOTIFICATION_WARNING.to_string()))
        }
    }
}

/// Public quote request form
///
/// POST /api/quote
pub async fn submit_quote(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PublicQuoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let Json(request) = payload?;
    let submission = quote_submission(request)?;

    let quote = state.lifecycle.create_quote(submission.quote, None).await?;
    tracing::info!(
        quote_id = quote.id,
        email = %mask_email(&quote.email),
        "Public quote request stored"
    );

    let (message_id, warning) = notify(
        &state,
        LeadNotification {
            kind: LeadKind::Quote,
            record_id: quote.id,
            name: quote.name.clone(),
            email: quote.email.clone(),
            phone: quote.phone.clone(),
            country_code: quote.country_code.clone(),
            company: submission.company,
            quantity: submission.quantity,
            topic: quote
                .product
                .clone()
                .unwrap_or_else(|| DEFAULT_PRODUCT.to_string()),
            message: quote.message.clone().unwrap_or_default(),
        },
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            success: true,
            id: quote.id,
            message_id,
            warning,
        }),
    ))
}

/// Public contact form
///
/// POST /api/contact
pub async fn submit_contact(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PublicContactRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let Json(request) = payload?;
    let contact = contact_submission(request)?;

    let contact = state.lifecycle.create_contact(contact, None).await?;
    tracing::info!(
        contact_id = contact.id,
        email = %mask_email(&contact.email),
        "Public contact submission stored"
    );

    let (message_id, warning) = notify(
        &state,
        LeadNotification {
            kind: LeadKind::Contact,
            record_id: contact.id,
            name: contact.name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            country_code: contact.country_code.clone(),
            company: None,
            quantity: None,
            topic: contact
                .subject
                .clone()
                .unwrap_or_else(|| "General".to_string()),
            message: contact.message.clone().unwrap_or_default(),
        },
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            success: true,
            id: contact.id,
            message_id,
            warning,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_request() -> PublicQuoteRequest {
        PublicQuoteRequest {
            name: Some("Rafael".to_string()),
            email: Some("rafael@example.com".to_string()),
            phone: Some("+92 300 1234567".to_string()),
            country_code: Some("+92".to_string()),
            company: Some("Rafael Recycling".to_string()),
            quantity: Some("2".to_string()),
            product: None,
            message: Some("Pricing please".to_string()),
        }
    }

    #[test]
    fn test_quote_submission_defaults_product() {
        let submission = quote_submission(quote_request()).unwrap();
        assert_eq!(submission.quote.product.as_deref(), Some(DEFAULT_PRODUCT));
        assert_eq!(submission.quote.owner_id, None);
        assert_eq!(submission.quote.status, QuoteStatus::Pending);
        assert_eq!(submission.company.as_deref(), Some("Rafael Recycling"));
    }

    #[test]
    fn test_quote_submission_requires_phone() {
        let mut request = quote_request();
        request.phone = None;
        assert!(quote_submission(request).is_err());
    }

    #[test]
    fn test_quote_submission_rejects_iso_country() {
        let mut request = quote_request();
        request.country_code = Some("PK".to_string());
        assert!(quote_submission(request).is_err());
    }

    #[test]
    fn test_contact_submission_phone_optional() {
        let contact = contact_submission(PublicContactRequest {
            name: Some("Ines".to_string()),
            email: Some("ines@example.com".to_string()),
            message: Some("Hello".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(contact.phone, None);
        assert_eq!(contact.owner_id, None);
    }
}
