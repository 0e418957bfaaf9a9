//! Delivery Agent
//!
//! Sends one rendered certificate per participant. Attempts for a participant
//! are strictly sequential with a fixed delay between them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::identifier::CertificateAssignment;
use crate::settings::{DeliverySettings, EmailSettings};
use crate::transport::{Attachment, MailTransport, OutgoingMail};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

const DEFAULT_EMAIL_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <style>
    body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px; }
    .header { background: #203a43; color: white; padding: 30px; text-align: center; border-radius: 10px 10px 0 0; }
    .content { background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px; }
    .certificate-id { background: #fff; padding: 15px; border-left: 4px solid #2c5364; margin: 20px 0; font-family: monospace; }
    .footer { text-align: center; margin-top: 30px; color: #666; font-size: 12px; }
  </style>
</head>
<body>
  <div class="header"><h1>Certificate of Participation</h1></div>
  <div class="content">
    <p>Dear <strong>{{name}}</strong>,</p>
    <p>Thank you for participating in <strong>{{event}}</strong>.</p>
    <p>As a token of recognition we are pleased to award you the <strong>Certificate of Participation</strong>.
       Your certificate is attached to this email.</p>
    <div class="certificate-id"><strong>Certificate ID:</strong> {{certificateId}}</div>
    <p>Please retain this Certificate ID for future reference or verification.</p>
    <p><strong>{{fromName}}</strong></p>
  </div>
  <div class="footer"><p>This is an automated email. Please do not reply.</p></div>
</body>
</html>
"#;

/// How mails leave the process for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Never touch the transport.
    DryRun,
    /// Real sends, every recipient replaced by the operator.
    Test { operator: String },
    Production,
}

impl DeliveryMode {
    pub fn contacts_transport(&self) -> bool {
        !matches!(self, DeliveryMode::DryRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub state: DeliveryState,
    pub attempts: u32,
    pub recipient: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_sent(&self) -> bool {
        self.state == DeliveryState::Sent
    }
}

/// Builds the outgoing mail for an assignment.
#[derive(Debug, Clone)]
pub struct EmailComposer {
    template: String,
    from_name: String,
    from_address: String,
    subject: String,
}

impl EmailComposer {
    pub fn new(settings: &EmailSettings, template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            from_name: settings.from_name.clone(),
            from_address: settings.user.clone(),
            subject: settings.subject.clone(),
        }
    }

    /// Use the HTML template at `path`, or the built-in one when it is absent.
    pub fn from_settings(settings: &EmailSettings, path: &Path) -> Self {
        let template = match std::fs::read_to_string(path) {
            Ok(template) => {
                info!(path = %path.display(), "email template loaded");
                template
            }
            Err(_) => {
                warn!(path = %path.display(), "email template not found, using default");
                DEFAULT_EMAIL_TEMPLATE.to_string()
            }
        };
        Self::new(settings, template)
    }

    pub fn body(&self, assignment: &CertificateAssignment) -> String {
        self.template
            .replace("{{name}}", &assignment.participant.name)
            .replace("{{event}}", &assignment.participant.event)
            .replace("{{certificateId}}", &assignment.certificate_id)
            .replace("{{fromName}}", &self.from_name)
    }

    pub fn compose(
        &self,
        assignment: &CertificateAssignment,
        filename: &str,
        document: &[u8],
    ) -> OutgoingMail {
        OutgoingMail {
            from_name: self.from_name.clone(),
            from_address: self.from_address.clone(),
            to: assignment.participant.email.clone(),
            subject: self.subject.clone(),
            html_body: self.body(assignment),
            attachment: Attachment {
                filename: filename.to_string(),
                content_type: PDF_CONTENT_TYPE.to_string(),
                bytes: document.to_vec(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            delay: settings.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DeliverySettings::default())
    }
}

pub struct DeliveryAgent {
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
}

impl DeliveryAgent {
    pub fn new(transport: Arc<dyn MailTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Deliver one mail. The returned report is final: `Sent` or `Failed`.
    pub async fn deliver(&self, mut mail: OutgoingMail, mode: &DeliveryMode) -> DeliveryReport {
        match mode {
            DeliveryMode::DryRun => {
                info!(to = %mail.to, "[DRY RUN] would send certificate");
                return DeliveryReport {
                    state: DeliveryState::Sent,
                    attempts: 0,
                    recipient: mail.to,
                    message_id: None,
                    error: None,
                };
            }
            DeliveryMode::Test { operator } => {
                info!(to = %operator, participant = %mail.to, "[TEST MODE] redirecting to operator");
                mail.to = operator.clone();
            }
            DeliveryMode::Production => {}
        }

        let mut report = DeliveryReport {
            state: DeliveryState::Pending,
            attempts: 0,
            recipient: mail.to.clone(),
            message_id: None,
            error: None,
        };

        while report.attempts < self.policy.max_attempts {
            report.attempts += 1;
            info!(
                to = %mail.to,
                attempt = report.attempts,
                max = self.policy.max_attempts,
                "sending certificate"
            );

            match self.transport.send(&mail).await {
                Ok(message_id) => {
                    info!(to = %mail.to, message_id = %message_id, "email sent");
                    report.state = DeliveryState::Sent;
                    report.message_id = Some(message_id);
                    report.error = None;
                    return report;
                }
                Err(e) => {
                    warn!(to = %mail.to, attempt = report.attempts, error = %e, "send failed");
                    report.error = Some(e.to_string());
                }
            }

            if report.attempts < self.policy.max_attempts {
                warn!(delay_ms = self.policy.delay.as_millis() as u64, "retrying");
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        report.state = DeliveryState::Failed;
        report
    }
}
