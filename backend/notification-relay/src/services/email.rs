/// Email delivery through an outbound SMTP gateway
/// Uses lettre's async SMTP transport
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::AsyncSmtpTransport;
use lettre::{AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::EmailConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("no email gateway is configured")]
    NotConfigured,

    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("gateway rejected message: {0}")]
    Transport(String),
}

/// Best-effort "send text to address" primitive
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &str, address: &str) -> Result<(), EmailError>;
}

/// Build the sender matching the configuration
pub fn from_config(config: &EmailConfig) -> Result<Box<dyn EmailSender>, EmailError> {
    match &config.gateway {
        Some(_) => Ok(Box::new(SmtpEmailSender::new(config)?)),
        None => {
            tracing::warn!("No email gateway configured; email notifications will be dropped");
            Ok(Box::new(DisabledEmailSender))
        }
    }
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject: String,
}

impl SmtpEmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let gateway = config.gateway.as_deref().ok_or(EmailError::NotConfigured)?;

        let from: Mailbox = config.from_address.parse().map_err(|e| EmailError::Address {
            address: config.from_address.clone(),
            reason: format!("{e}"),
        })?;

        // Plain SMTP relay on the internal gateway
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(gateway)
            .port(config.port)
            .timeout(Some(config.timeout))
            .build();

        tracing::info!(gateway, port = config.port, "SMTP email sender configured");

        Ok(Self {
            transport,
            from,
            subject: config.subject.clone(),
        })
    }

    fn build_message(&self, message: &str, address: &str) -> Result<Message, EmailError> {
        let to: Mailbox = address.parse().map_err(|e| EmailError::Address {
            address: address.to_string(),
            reason: format!("{e}"),
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.to_string())
            .map_err(|e| EmailError::Build(e.to_string()))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &str, address: &str) -> Result<(), EmailError> {
        let email = self.build_message(message, address)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        tracing::debug!(to = address, "email handed to gateway");
        Ok(())
    }
}

/// Used when no gateway is configured; every send fails with `NotConfigured`
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, _message: &str, _address: &str) -> Result<(), EmailError> {
        Err(EmailError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(gateway: Option<&str>) -> EmailConfig {
        EmailConfig {
            gateway: gateway.map(str::to_string),
            port: 25,
            from_address: "noreply@example.com".to_string(),
            subject: "Notification".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_disabled_sender_reports_not_configured() {
        let sender = from_config(&config(None)).unwrap();
        assert_eq!(
            sender.send("hi", "u1@example.com").await,
            Err(EmailError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_smtp_sender_builds_plain_text_message() {
        let sender = SmtpEmailSender::new(&config(Some("localhost"))).unwrap();
        let message = sender.build_message("hello there", "u1@example.com").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("To: u1@example.com"));
        assert!(raw.contains("From: noreply@example.com"));
        assert!(raw.contains("Subject: Notification"));
        assert!(raw.contains("hello there"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_address() {
        let sender = SmtpEmailSender::new(&config(Some("localhost"))).unwrap();
        let result = sender.send("hello", "not an address").await;
        assert!(matches!(result, Err(EmailError::Address { .. })));
    }

    #[test]
    fn test_invalid_from_address() {
        let mut cfg = config(Some("localhost"));
        cfg.from_address = "broken".to_string();
        assert!(matches!(
            SmtpEmailSender::new(&cfg),
            Err(EmailError::Address { .. })
        ));
    }
}
