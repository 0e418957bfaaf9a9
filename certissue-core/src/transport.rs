//! Mail transport seam.
//!
//! The delivery agent only talks to [`MailTransport`]. [`SmtpMailer`] is the
//! production implementation.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::settings::EmailSettings;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from_name: String,
    pub from_address: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: Attachment,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Check that the transport can reach and authenticate with its server.
    async fn verify_connection(&self) -> Result<(), TransportError>;

    /// Send one mail and return the transport's message id.
    async fn send(&self, mail: &OutgoingMail) -> Result<String, TransportError>;
}

/// Stands in for a real transport when a run must never send (dry runs).
pub struct DisabledTransport;

#[async_trait]
impl MailTransport for DisabledTransport {
    async fn verify_connection(&self) -> Result<(), TransportError> {
        Err(TransportError::Connection("mail transport disabled".to_string()))
    }

    async fn send(&self, _mail: &OutgoingMail) -> Result<String, TransportError> {
        Err(TransportError::Rejected("mail transport disabled".to_string()))
    }
}

/// SMTP delivery through an async connection pool.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, TransportError> {
        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| TransportError::Connection(e.to_string()))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(settings.user.clone(), settings.password.clone()))
            .build();

        Ok(Self {
            transport,
            host: settings.host.clone(),
        })
    }

    fn build_message(mail: &OutgoingMail) -> Result<Message, TransportError> {
        let invalid = |e: &dyn std::fmt::Display| TransportError::InvalidMessage(e.to_string());

        let from_address: Address = mail.from_address.parse().map_err(|e| invalid(&e))?;
        let to_address: Address = mail.to.parse().map_err(|e| invalid(&e))?;
        let content_type = ContentType::parse(&mail.attachment.content_type).map_err(|e| invalid(&e))?;

        let attachment = MailAttachment::new(mail.attachment.filename.clone())
            .body(mail.attachment.bytes.clone(), content_type);

        Message::builder()
            .from(Mailbox::new(Some(mail.from_name.clone()), from_address))
            .to(Mailbox::new(None, to_address))
            .subject(mail.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::html(mail.html_body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|e| invalid(&e))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn verify_connection(&self) -> Result<(), TransportError> {
        match self.transport.test_connection().await {
            Ok(true) => {
                info!(host = %self.host, "SMTP connection verified");
                Ok(())
            }
            Ok(false) => Err(TransportError::Connection(format!(
                "{} did not accept the connection",
                self.host
            ))),
            Err(e) => Err(TransportError::Connection(e.to_string())),
        }
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<String, TransportError> {
        let message = Self::build_message(mail)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        Ok(response_text(&response))
    }
}

/// Server reply lines joined into one string, e.g. `2.0.0 Ok: queued as 1234`.
fn response_text(response: &Response) -> String {
    response.message().map(str::to_string).collect::<Vec<_>>().join(" ")
}
