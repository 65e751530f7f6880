//! SMTP delivery of lead notifications.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{LeadNotification, NotificationError, Notifier};
use crate::config::EmailConfig;

pub struct SmtpNotifier {
    config: EmailConfig,
}

impl SmtpNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotificationError> {
        let smtp_host = self.config.smtp_host.as_deref().unwrap_or_default();
        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };
        Ok(mailer.build())
    }

    fn build_message(
        &self,
        notification: &LeadNotification,
        message_id: &str,
    ) -> Result<Message, NotificationError> {
        let from_address = self.config.from_address.as_deref().unwrap_or_default();
        let recipient = self
            .config
            .recipient()
            .ok_or(NotificationError::NoRecipient)?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = recipient.parse()?;
        let reply_to: Mailbox = notification.email.parse()?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .reply_to(reply_to)
            .message_id(Some(message_id.to_string()))
            .subject(notification.subject())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(render_text(notification)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(render_html(notification)),
                    ),
            )?;
        Ok(message)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_notification(
        &self,
        notification: &LeadNotification,
    ) -> Result<String, NotificationError> {
        let domain = self
            .config
            .from_address
            .as_deref()
            .and_then(|a| a.split_once('@'))
            .map(|(_, d)| d)
            .unwrap_or("localhost");
        let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), domain);

        let message = self.build_message(notification, &message_id)?;
        self.transport()?.send(message).await?;

        tracing::info!(
            kind = ?notification.kind,
            record_id = notification.record_id,
            message_id = %message_id,
            "Lead notification sent"
        );
        Ok(message_id)
    }
}

fn render_text(n: &LeadNotification) -> String {
    format!(
        "New {label}\n\nName: {name}\nEmail: {email}\nPhone: {phone}\nCountry: {country}\n{topic_label}: {topic}\n\nMessage:\n{message}\n",
        label = n.kind.label(),
        name = n.display_name(),
        email = n.email,
        phone = n.phone.as_deref().unwrap_or("Not provided"),
        country = n.country_code.as_deref().unwrap_or("N/A"),
        topic_label = n.topic_label(),
        topic = n.display_topic(),
        message = n.message,
    )
}

fn render_html(n: &LeadNotification) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>New {label}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        th {{ text-align: left; padding: 8px; background-color: #f8f9fa; }}
        td {{ padding: 8px; border-top: 1px solid #eee; }}
        .message-box {{ background-color: #f8f9fa; padding: 15px; border-left: 4px solid #c8a415; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>New {label}</h2>
        <table>
            <tr><th>Name:</th><td>{name}</td></tr>
            <tr><th>Email:</th><td>{email}</td></tr>
            <tr><th>Phone:</th><td>{phone}</td></tr>
            <tr><th>Country:</th><td>{country}</td></tr>
            <tr><th>{topic_label}:</th><td>{topic}</td></tr>
        </table>
        <p><strong>Message:</strong></p>
        <div class="message-box">{message}</div>
    </div>
</body>
</html>"#,
        label = n.kind.label(),
        name = html_escape(&n.display_name()),
        email = html_escape(&n.email),
        phone = html_escape(n.phone.as_deref().unwrap_or("Not provided")),
        country = html_escape(n.country_code.as_deref().unwrap_or("N/A")),
        topic_label = n.topic_label(),
        topic = html_escape(&n.display_topic()),
        message = html_escape(&n.message).replace('\n', "<br>"),
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
