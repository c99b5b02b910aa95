//! Outgoing email delivery.
//!
//! SMTP through lettre when a relay is configured; otherwise messages are
//! written to the log so development setups need no mail server.

use anyhow::{Context, Result};
use axum::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{Settings, SmtpSettings};

/// A fully rendered email ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

impl OutgoingEmail {
    pub fn plain(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Picks the SMTP transport when configured, the log transport otherwise.
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn EmailSender>> {
    let from = settings.default_from_email.clone();
    match &settings.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "SMTP mailer configured");
            Ok(Arc::new(SmtpMailer::new(smtp, &settings.site_name, &from)?))
        }
        None => {
            tracing::info!("SMTP_HOST not set, emails will be logged");
            Ok(Arc::new(LogMailer { from }))
        }
    }
}

pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpSettings, site_name: &str, from_email: &str) -> Result<Self> {
        let mut builder = SmtpTransport::starttls_relay(&smtp.host)
            .context("Invalid SMTP relay")?
            .port(smtp.port);
        if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = Mailbox::new(
            Some(site_name.to_string()),
            from_email.parse().context("Invalid DEFAULT_FROM_EMAIL")?,
        );

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("Invalid recipient address")?)
            .subject(email.subject.clone());

        let message = match &email.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                html.clone(),
            )),
            None => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(email.text.clone()),
            ),
        };
        message.context("Failed to build email")
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let message = self.build_message(email)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .context("SMTP task panicked")?
            .context("SMTP delivery failed")?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

pub struct LogMailer {
    from: String,
}

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        tracing::info!(
            from = %self.from,
            to = %email.to,
            subject = %email.subject,
            body = %email.text,
            "Email (log transport)"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Captures sent emails in memory.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            self.sent.lock().push(email.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let mailer = LogMailer {
            from: "noreply@handshakeme.com".into(),
        };
        let email = OutgoingEmail::plain("a@example.com", "Hi", "Body");
        assert!(mailer.send(&email).await.is_ok());
    }

    #[tokio::test]
    async fn recording_mailer_keeps_messages() {
        let mailer = RecordingMailer::default();
        let email = OutgoingEmail::plain("a@example.com", "Hi", "Body").with_html("<p>Body</p>");
        mailer.send(&email).await.unwrap();
        assert_eq!(mailer.sent.lock().as_slice(), &[email]);
    }

    #[test]
    fn smtp_message_has_both_parts() {
        let smtp = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: None,
            password: None,
        };
        let mailer = SmtpMailer::new(&smtp, "HandshakeMe", "noreply@handshakeme.com").unwrap();
        let email = OutgoingEmail::plain("a@example.com", "Welcome", "Hello").with_html("<b>Hello</b>");
        let formatted = String::from_utf8(mailer.build_message(&email).unwrap().formatted()).unwrap();
        assert!(formatted.contains("Subject: Welcome"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(mailer
            .build_message(&OutgoingEmail::plain("not-an-address", "x", "y"))
            .is_err());
    }

    #[test]
    fn settings_without_smtp_use_log_transport() {
        let settings = crate::config::tests::test_settings();
        assert!(from_settings(&settings).is_ok());
    }
}
