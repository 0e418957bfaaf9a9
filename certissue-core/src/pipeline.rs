//! Batch Pipeline - Single Entry Point
//!
//! CRITICAL: run_batch is the only way participants get certificates. It
//! validates, deduplicates and assigns identifiers before anything is
//! rendered, and it never runs twice at once.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::delivery::{DeliveryAgent, DeliveryMode, EmailComposer, RetryPolicy};
use crate::events::{BatchStatus, EventBus, EventListener, PipelineEvent, RunState};
use crate::hashing::{batch_fingerprint, document_digest};
use crate::identifier::{assign_all, CertificateAssignment};
use crate::ledger::{DeliveryStatus, Ledger, LedgerError, VerificationRecord};
use crate::records::{normalize_all, ParticipantRecord};
use crate::render::{load_font, FontError, Renderer};
use crate::settings::{BatchMode, Settings};
use crate::source::{RowSource, SourceError};
use crate::templates::{load_template, LayoutConfig, TemplateError};
use crate::transport::{MailTransport, TransportError};
use crate::validation::{deduplicate, RowViolation, Validator};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("Cannot read participants: {0}")]
    SourceRead(#[from] SourceError),

    #[error("No valid participants ({rejected} row(s) rejected)")]
    NoValidRecords { rejected: usize, errors: Vec<RowViolation> },

    #[error("Certificate template unavailable: {0}")]
    TemplateNotFound(#[from] TemplateError),

    #[error("Certificate font unavailable: {0}")]
    FontUnavailable(#[from] FontError),

    #[error("Test mode needs an operator address (email.operator_address or email.user)")]
    MissingOperatorAddress,

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(#[from] LedgerError),

    #[error("Mail transport verification failed: {0}")]
    TransportVerification(#[source] TransportError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Final result for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub participant: ParticipantRecord,
    pub certificate_id: String,
    pub attempts: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,
}

impl DeliveryOutcome {
    fn failed(assignment: &CertificateAssignment, attempts: u32, error: String) -> Self {
        Self {
            participant: assignment.participant.clone(),
            certificate_id: assignment.certificate_id.clone(),
            attempts,
            success: false,
            error: Some(error),
            recipient: None,
            message_id: None,
            document_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDelivery {
    pub participant: String,
    pub email: String,
    pub certificate_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub run_id: String,
    pub mode: BatchMode,
    pub issue_date: NaiveDate,
    pub fingerprint: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<FailedDelivery>,
    pub rejected: Vec<RowViolation>,
    pub duplicates_skipped: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

/// `certificate_{id}_{name}.pdf` with the name reduced to `[a-z0-9_.-]`.
pub fn certificate_filename(certificate_id: &str, name: &str) -> String {
    format!("certificate_{}_{}.pdf", certificate_id, sanitize_filename(name))
}

/// Replace anything outside `[A-Za-z0-9_.-]` with `_`, collapse runs of `_`,
/// and lowercase.
pub fn sanitize_filename(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Resets the run gate when a batch ends, including by panic.
struct RunGuard<'a> {
    gate: &'a Mutex<RunState>,
    outcome: RunState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.gate.lock() {
            *state = self.outcome;
        }
    }
}

/// Per-run collaborators, built from the settings snapshot.
struct BatchContext<'a> {
    settings: &'a Settings,
    mode: DeliveryMode,
    template: image::RgbaImage,
    renderer: Renderer,
    composer: EmailComposer,
    agent: DeliveryAgent,
    ledger: Ledger,
}

/// Runs certificate batches, one at a time.
pub struct BatchRunner {
    transport: Arc<dyn MailTransport>,
    events: EventBus,
    status: watch::Sender<BatchStatus>,
    gate: Mutex<RunState>,
}

impl BatchRunner {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        let (status, _) = watch::channel(BatchStatus::default());
        Self {
            transport,
            events: EventBus::new(),
            status,
            gate: Mutex::new(RunState::Idle),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.events.subscribe(listener);
    }

    /// Latest status; updated after every participant.
    pub fn status(&self) -> watch::Receiver<BatchStatus> {
        self.status.subscribe()
    }

    pub fn state(&self) -> RunState {
        self.gate.lock().map(|s| *s).unwrap_or(RunState::Failed)
    }

    fn begin(&self) -> Result<RunGuard<'_>, PipelineError> {
        let mut state = self.gate.lock().map_err(|_| PipelineError::AlreadyRunning)?;
        if *state == RunState::Running {
            return Err(PipelineError::AlreadyRunning);
        }
        *state = RunState::Running;
        Ok(RunGuard {
            gate: &self.gate,
            outcome: RunState::Failed,
        })
    }

    fn publish(&self, status: BatchStatus) {
        self.events.emit(&PipelineEvent::Progress(status.clone()));
        self.status.send_replace(status);
    }

    /// Process one batch to completion.
    ///
    /// Batch-fatal problems return `Err` before any participant is ledgered.
    /// Failed participants do not make the run an error.
    pub async fn run_batch(
        &self,
        settings: &Settings,
        source: &dyn RowSource,
    ) -> Result<BatchResult, PipelineError> {
        let mut guard = self.begin()?;
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("batch", run_id = %run_id, mode = %settings.mode);

        self.publish(BatchStatus {
            state: RunState::Running,
            ..BatchStatus::default()
        });

        match self.execute(settings, source, &run_id).instrument(span).await {
            Ok(result) => {
                guard.outcome = RunState::Completed;
                self.publish(BatchStatus {
                    state: RunState::Completed,
                    processed: result.total,
                    total: result.total,
                    current_name: None,
                    success: result.success,
                    failed: result.failed,
                });
                self.events.emit(&PipelineEvent::BatchCompleted {
                    run_id,
                    success: result.success,
                    failed: result.failed,
                });
                Ok(result)
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "batch failed");
                let mut status = self.status.borrow().clone();
                status.state = RunState::Failed;
                status.current_name = None;
                self.publish(status);
                self.events.emit(&PipelineEvent::BatchFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        settings: &Settings,
        source: &dyn RowSource,
        run_id: &str,
    ) -> Result<BatchResult, PipelineError> {
        info!(source = %source.describe(), "reading participants");
        let table = source.read()?;
        let records = normalize_all(&table.rows, &settings.event_name);

        let validation = Validator::new().validate_batch(&records);
        if !validation.valid {
            return Err(PipelineError::NoValidRecords {
                rejected: validation.errors.len(),
                errors: validation.errors,
            });
        }
        if !validation.errors.is_empty() {
            self.events.emit(&PipelineEvent::RowsRejected {
                count: validation.errors.len(),
            });
        }

        let dedup = deduplicate(validation.valid_records);
        for dup in &dedup.duplicates {
            self.events.emit(&PipelineEvent::DuplicateSkipped {
                name: dup.name.clone(),
                email: dup.email.clone(),
            });
        }

        let run_date = Utc::now().date_naive();
        let issue_date = settings.issue_date.unwrap_or(run_date);
        let assignments = assign_all(&settings.certificate_id_prefix, issue_date, dedup.unique);
        let fingerprint = batch_fingerprint(
            &settings.certificate_id_prefix,
            issue_date,
            assignments.iter().map(|a| a.participant.email.as_str()),
        )?;

        let ctx = self.prepare(settings, run_date).await?;

        let total = assignments.len();
        info!(total, fingerprint = %fingerprint, "batch prepared");
        self.events.emit(&PipelineEvent::BatchStarted {
            run_id: run_id.to_string(),
            mode: settings.mode,
            total,
        });

        let mut status = BatchStatus {
            state: RunState::Running,
            total,
            ..BatchStatus::default()
        };
        self.publish(status.clone());

        let mut outcomes = Vec::with_capacity(total);
        for (index, assignment) in assignments.iter().enumerate() {
            let name = assignment.participant.name.clone();
            info!(index = index + 1, total, name = %name, certificate_id = %assignment.certificate_id, "processing participant");
            self.events.emit(&PipelineEvent::ParticipantStarted {
                index: index + 1,
                name: name.clone(),
                certificate_id: assignment.certificate_id.clone(),
            });

            let outcome = self.process(&ctx, assignment).await;

            let (ledger_status, ledger_error) = if outcome.success {
                (DeliveryStatus::Success, None)
            } else {
                (DeliveryStatus::Failed, outcome.error.as_deref())
            };
            if let Err(e) = ctx.ledger.record_delivery(assignment, ledger_status, ledger_error) {
                error!(certificate_id = %assignment.certificate_id, error = %e, "audit line not written");
            }

            if outcome.success {
                status.success += 1;
            } else {
                status.failed += 1;
            }
            status.processed = index + 1;
            status.current_name = Some(name.clone());
            self.events.emit(&PipelineEvent::ParticipantFinished {
                name,
                certificate_id: outcome.certificate_id.clone(),
                success: outcome.success,
                attempts: outcome.attempts,
                error: outcome.error.clone(),
            });
            self.publish(status.clone());

            let contacted = outcome.attempts > 0;
            outcomes.push(outcome);

            if contacted && index + 1 < total && ctx.mode.contacts_transport() {
                let delay = settings.delivery.send_delay();
                info!(delay_ms = delay.as_millis() as u64, "waiting before next email");
                tokio::time::sleep(delay).await;
            }
        }

        let result = BatchResult {
            run_id: run_id.to_string(),
            mode: settings.mode,
            issue_date,
            fingerprint,
            total,
            success: status.success,
            failed: status.failed,
            errors: outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| FailedDelivery {
                    participant: o.participant.name.clone(),
                    email: o.participant.email.clone(),
                    certificate_id: o.certificate_id.clone(),
                    error: o.error.clone().unwrap_or_default(),
                })
                .collect(),
            rejected: validation.errors,
            duplicates_skipped: dedup.duplicates.len(),
            outcomes,
        };

        log_summary(&result);
        if settings.auto_cleanup && result.success > 0 {
            cleanup_documents(&result.outcomes);
        }

        Ok(result)
    }

    /// Everything that must hold before the first participant: template,
    /// font, operator address, a reachable transport and the ledger. The
    /// ledger is opened last so a failed precheck leaves nothing on disk.
    async fn prepare<'a>(
        &self,
        settings: &'a Settings,
        run_date: NaiveDate,
    ) -> Result<BatchContext<'a>, PipelineError> {
        let template = load_template(&settings.paths.template)?;
        info!(
            path = %settings.paths.template.display(),
            width = template.width(),
            height = template.height(),
            "template loaded"
        );
        let font = load_font(&settings.paths.font)?;

        let mode = match settings.mode {
            BatchMode::DryRun => DeliveryMode::DryRun,
            BatchMode::Test => DeliveryMode::Test {
                operator: settings
                    .email
                    .operator_recipient()
                    .ok_or(PipelineError::MissingOperatorAddress)?,
            },
            BatchMode::Production => DeliveryMode::Production,
        };

        if mode.contacts_transport() {
            self.transport
                .verify_connection()
                .await
                .map_err(PipelineError::TransportVerification)?;
        } else {
            info!("dry run, transport not contacted");
        }

        let ledger = Ledger::open(&settings.paths.log_dir, &settings.paths.data_dir, run_date)?;

        Ok(BatchContext {
            settings,
            mode,
            template,
            renderer: Renderer::new(font, settings.verification_url.clone()),
            composer: EmailComposer::from_settings(&settings.email, &settings.paths.email_template),
            agent: DeliveryAgent::new(
                self.transport.clone(),
                RetryPolicy::from_settings(&settings.delivery),
            ),
            ledger,
        })
    }

    /// Render, store, record and deliver one certificate. Never fails the batch.
    async fn process(&self, ctx: &BatchContext<'_>, assignment: &CertificateAssignment) -> DeliveryOutcome {
        let layout: &LayoutConfig = &ctx.settings.layout;
        let rendered = match ctx.renderer.render(assignment, layout, &ctx.template) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(certificate_id = %assignment.certificate_id, error = %e, "render failed");
                return DeliveryOutcome::failed(assignment, 0, format!("Render failed: {}", e));
            }
        };

        let filename = certificate_filename(&assignment.certificate_id, &assignment.participant.name);
        let path = ctx.settings.paths.output_dir.join(&filename);
        if let Err(e) = write_document(&path, &rendered.document) {
            warn!(path = %path.display(), error = %e, "certificate not written");
            return DeliveryOutcome::failed(
                assignment,
                0,
                format!("Document write failed: {}", e),
            );
        }

        let record = VerificationRecord::issue(
            assignment,
            Utc::now(),
            Some(document_digest(&rendered.document)),
        );
        if let Err(e) = ctx.ledger.save_verification(record) {
            warn!(certificate_id = %assignment.certificate_id, error = %e, "verification record not saved");
            let mut outcome =
                DeliveryOutcome::failed(assignment, 0, format!("Verification save failed: {}", e));
            outcome.document_path = Some(path);
            return outcome;
        }

        let mail = ctx.composer.compose(assignment, &filename, &rendered.document);
        let report = ctx.agent.deliver(mail, &ctx.mode).await;

        DeliveryOutcome {
            participant: assignment.participant.clone(),
            certificate_id: assignment.certificate_id.clone(),
            attempts: report.attempts,
            success: report.is_sent(),
            error: report.error,
            recipient: Some(report.recipient),
            message_id: report.message_id,
            document_path: Some(path),
        }
    }
}

fn write_document(path: &Path, document: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, document)
}

fn log_summary(result: &BatchResult) {
    info!(
        total = result.total,
        success = result.success,
        failed = result.failed,
        rejected = result.rejected.len(),
        duplicates = result.duplicates_skipped,
        "execution summary"
    );
    for failure in &result.errors {
        warn!(
            participant = %failure.participant,
            email = %failure.email,
            error = %failure.error,
            "failed delivery"
        );
    }
}

fn cleanup_documents(outcomes: &[DeliveryOutcome]) {
    let mut removed = 0;
    for path in outcomes.iter().filter_map(|o| o.document_path.as_ref()) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
        }
    }
    info!(removed, "generated certificates cleaned up");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            certificate_filename("CERT-20260201-0001", "Jane  O'Neil"),
            "certificate_CERT-20260201-0001_jane_o_neil.pdf"
        );
        assert_eq!(sanitize_filename("a//b__c"), "a_b_c");
        assert_eq!(sanitize_filename("Élodie.pdf"), "_lodie.pdf");
    }

    #[test]
    fn test_second_begin_is_rejected() {
        struct Unused;

        #[async_trait::async_trait]
        impl MailTransport for Unused {
            async fn verify_connection(&self) -> Result<(), TransportError> {
                Ok(())
            }
            async fn send(&self, _: &crate::transport::OutgoingMail) -> Result<String, TransportError> {
                Ok(String::new())
            }
        }

        let runner = BatchRunner::new(Arc::new(Unused));
        let guard = runner.begin().unwrap();
        assert_eq!(runner.state(), RunState::Running);
        assert!(matches!(runner.begin(), Err(PipelineError::AlreadyRunning)));
        drop(guard);
        assert_eq!(runner.state(), RunState::Failed);
        assert!(runner.begin().is_ok());
    }
}
