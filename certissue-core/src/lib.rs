//! Certissue Core - Certificate Issuance and Delivery
//!
//! # The Five Rules
//! 1. Validate Before Anything Is Issued
//! 2. Identifiers Are Positional and Deterministic
//! 3. Disabled Fields Are Never Drawn
//! 4. Every Outcome Is Ledgered, Nothing Is Rewritten
//! 5. One Batch at a Time

pub mod settings;
pub mod records;
pub mod validation;
pub mod identifier;
pub mod templates;
pub mod render;
pub mod print;
pub mod hashing;
pub mod transport;
pub mod delivery;
pub mod ledger;
pub mod events;
pub mod source;
pub mod pipeline;

pub use settings::{BatchMode, Settings, SettingsError};
pub use records::{normalize, ParticipantRecord, RawRow};
pub use validation::{deduplicate, BatchValidation, RowViolation, ValidationRule, Validator};
pub use identifier::{assign, CertificateAssignment};
pub use templates::{LayoutConfig, QrField, TextField};
pub use render::{RenderedCertificate, Renderer};
pub use transport::{MailTransport, OutgoingMail, SmtpMailer, TransportError};
pub use delivery::{DeliveryAgent, DeliveryMode, DeliveryReport, DeliveryState};
pub use ledger::{Ledger, VerificationRecord, VerificationStore};
pub use events::{BatchStatus, EventListener, LogBuffer, PipelineEvent, RunState};
pub use source::{CsvSource, RowSource, SourceError};
pub use pipeline::{BatchResult, BatchRunner, DeliveryOutcome, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
