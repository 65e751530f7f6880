//! Lead notifications sent when the public forms create a quote or contact.
//!
//! Delivery is best-effort: callers report a failure to the submitter as a
//! warning but never roll back the stored record.

mod email;

pub use email::SmtpNotifier;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmailConfig;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("notification recipient not configured")]
    NoRecipient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadKind {
    Quote,
    Contact,
}

impl LeadKind {
    pub fn label(&self) -> &'static str {
        match self {
            LeadKind::Quote => "Quote Request",
            LeadKind::Contact => "Contact Form Submission",
        }
    }
}

/// Template fields for one lead notification
#[derive(Debug, Clone)]
pub struct LeadNotification {
    pub kind: LeadKind,
    pub record_id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub company: Option<String>,
    pub quantity: Option<String>,
    /// Product for quotes, subject for contacts
    pub topic: String,
    pub message: String,
}

impl LeadNotification {
    pub fn subject(&self) -> String {
        format!("New {} from {}", self.kind.label(), self.name)
    }

    fn display_name(&self) -> String {
        match &self.company {
            Some(company) => format!("{} ({})", self.name, company),
            None => self.name.clone(),
        }
    }

    fn display_topic(&self) -> String {
        match (&self.kind, &self.quantity) {
            (LeadKind::Quote, Some(quantity)) => format!("{} (Qty: {})", self.topic, quantity),
            _ => self.topic.clone(),
        }
    }

    fn topic_label(&self) -> &'static str {
        match self.kind {
            LeadKind::Quote => "Product",
            LeadKind::Contact => "Subject",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification, returning the message id on success
    async fn send_notification(
        &self,
        notification: &LeadNotification,
    ) -> Result<String, NotificationError>;
}

/// Used when SMTP is not configured: logs the lead and reports success
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(
        &self,
        notification: &LeadNotification,
    ) -> Result<String, NotificationError> {
        tracing::info!(
            kind = ?notification.kind,
            record_id = notification.record_id,
            "SMTP not configured; lead notification logged only"
        );
        Ok("dev_mode".to_string())
    }
}

/// SMTP when configured, otherwise the logging fallback
pub fn from_config(config: &EmailConfig) -> Arc<dyn Notifier> {
    if config.is_configured() {
        Arc::new(SmtpNotifier::new(config.clone()))
    } else {
        tracing::warn!("Email not configured; lead notifications will only be logged");
        Arc::new(LogNotifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(kind: LeadKind) -> LeadNotification {
        LeadNotification {
            kind,
            record_id: 1,
            name: "Kim".to_string(),
            email: "kim@example.com".to_string(),
            phone: None,
            country_code: Some("+49".to_string()),
            company: Some("Kim GmbH".to_string()),
            quantity: Some("3".to_string()),
            topic: "Shredder S1".to_string(),
            message: "Hello".to_string(),
        }
    }

    #[test]
    fn test_subject_and_display_fields() {
        let quote = lead(LeadKind::Quote);
        assert_eq!(quote.subject(), "New Quote Request from Kim");
        assert_eq!(quote.display_name(), "Kim (Kim GmbH)");
        assert_eq!(quote.display_topic(), "Shredder S1 (Qty: 3)");

        let contact = lead(LeadKind::Contact);
        assert_eq!(contact.subject(), "New Contact Form Submission from Kim");
        assert_eq!(contact.display_topic(), "Shredder S1");
    }

    #[tokio::test]
    async fn test_log_notifier_reports_dev_mode() {
        let id = LogNotifier
            .send_notification(&lead(LeadKind::Contact))
            .await
            .unwrap();
        assert_eq!(id, "dev_mode");
    }

    #[test]
    fn test_from_config_without_smtp_uses_log_notifier() {
        // Only checks construction; no network involved
        let _notifier = from_config(&EmailConfig::default());
    }
}
