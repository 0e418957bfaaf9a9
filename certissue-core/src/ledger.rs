//! Ledger - Audit Log and Verification Store
//!
//! The audit log is append-only CSV, one line per delivery outcome.
//! The verification store maps certificate id -> record and is rewritten
//! atomically on every upsert, so a reader never sees a partial file.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::identifier::CertificateAssignment;

pub const AUDIT_HEADER: &str = "Timestamp,Name,Email,CertificateID,Status,Error";
pub const VERIFICATION_FILE: &str = "certificates.json";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit log error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Verification store {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger lock poisoned")]
    Poisoned,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "SUCCESS",
            DeliveryStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "CertificateID")]
    pub certificate_id: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Error")]
    pub error: String,
}

/// Keep an error message on one CSV field: no commas, no line breaks.
pub fn sanitize_error(message: &str) -> String {
    message
        .replace(',', ";")
        .replace(['\r', '\n'], " ")
}

pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Open (or start) the log at `path`, writing the header to a new file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        let len = file.metadata().map_err(io_error(&path))?.len();
        if len == 0 {
            writeln!(file, "{}", AUDIT_HEADER).map_err(io_error(&path))?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        timestamp: DateTime<Utc>,
        assignment: &CertificateAssignment,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().map_err(|_| LedgerError::Poisoned)?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_error(&self.path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(file);

        writer.write_record([
            timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true).as_str(),
            assignment.participant.name.as_str(),
            assignment.participant.email.as_str(),
            assignment.certificate_id.as_str(),
            status.as_str(),
            sanitize_error(error.unwrap_or_default()).as_str(),
        ])?;
        writer.flush().map_err(io_error(&self.path))?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut entries = vec![];
        for row in reader.deserialize() {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateStatus {
    Valid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub certificate_id: String,
    pub name: String,
    pub event: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub organization: String,
    pub issued_at: DateTime<Utc>,
    pub status: CertificateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_sha256: Option<String>,
}

impl VerificationRecord {
    pub fn issue(
        assignment: &CertificateAssignment,
        issued_at: DateTime<Utc>,
        document_sha256: Option<String>,
    ) -> Self {
        Self {
            certificate_id: assignment.certificate_id.clone(),
            name: assignment.participant.name.clone(),
            event: assignment.participant.event.clone(),
            email: assignment.participant.email.clone(),
            organization: assignment.participant.organization.clone(),
            issued_at,
            status: CertificateStatus::Valid,
            document_sha256,
        }
    }
}

pub struct VerificationStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, VerificationRecord>>,
}

impl VerificationStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let records = Self::read_file(&path)?;
        debug!(path = %path.display(), count = records.len(), "verification store loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, VerificationRecord>, LedgerError> {
        match fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    /// Insert or replace the record for its certificate id.
    pub fn upsert(&self, record: VerificationRecord) -> Result<(), LedgerError> {
        let mut records = self.records.write().map_err(|_| LedgerError::Poisoned)?;
        let key = record.certificate_id.clone();
        let previous = records.insert(key.clone(), record);

        if let Err(e) = self.persist(&records) {
            match previous {
                Some(prev) => records.insert(key, prev),
                None => records.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, records: &BTreeMap<String, VerificationRecord>) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_error(&self.path))?;
        Ok(())
    }

    pub fn get(&self, certificate_id: &str) -> Option<VerificationRecord> {
        self.records.read().ok()?.get(certificate_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Audit log plus verification store.
pub struct Ledger {
    audit: AuditLog,
    verification: VerificationStore,
}

impl Ledger {
    pub fn new(audit: AuditLog, verification: VerificationStore) -> Self {
        Self { audit, verification }
    }

    /// `{log_dir}/delivery-{date}.csv` and `{data_dir}/certificates.json`.
    pub fn open(log_dir: &Path, data_dir: &Path, date: NaiveDate) -> Result<Self, LedgerError> {
        let audit = AuditLog::open(log_dir.join(format!("delivery-{}.csv", date.format("%Y-%m-%d"))))?;
        let verification = VerificationStore::open(data_dir.join(VERIFICATION_FILE))?;
        info!(audit = %audit.path().display(), "ledger opened");
        Ok(Self::new(audit, verification))
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn record_delivery(
        &self,
        assignment: &CertificateAssignment,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        self.audit.append(Utc::now(), assignment, status, error)
    }

    pub fn save_verification(&self, record: VerificationRecord) -> Result<(), LedgerError> {
        let id = record.certificate_id.clone();
        self.verification.upsert(record)?;
        debug!(certificate_id = %id, "verification record saved");
        Ok(())
    }

    pub fn get_verification(&self, certificate_id: &str) -> Option<VerificationRecord> {
        self.verification.get(certificate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ParticipantRecord;

    fn assignment(id: &str, name: &str) -> CertificateAssignment {
        CertificateAssignment {
            certificate_id: id.to_string(),
            participant: ParticipantRecord {
                name: name.to_string(),
                email: "jane@x.com".to_string(),
                event: "Spring Contest".to_string(),
                phone: String::new(),
                organization: "ACME".to_string(),
            },
        }
    }

    #[test]
    fn test_audit_header_and_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("delivery.csv");

        let log = AuditLog::open(&path).unwrap();
        log.append(Utc::now(), &assignment("C-1", "Jane"), DeliveryStatus::Success, None).unwrap();
        log.append(
            Utc::now(),
            &assignment("C-2", "Bob"),
            DeliveryStatus::Failed,
            Some("421 busy, try later\nbye"),
        )
        .unwrap();

        // Reopening keeps prior lines and does not repeat the header.
        let log = AuditLog::open(&path).unwrap();
        log.append(Utc::now(), &assignment("C-3", "Ann"), DeliveryStatus::Success, None).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&format!("{}\n", AUDIT_HEADER)));
        assert_eq!(content.matches("Timestamp").count(), 1);

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].certificate_id, "C-2");
        assert_eq!(entries[1].status, "FAILED");
        assert_eq!(entries[1].error, "421 busy; try later bye");
        assert_eq!(entries[2].name, "Ann");
    }

    #[test]
    fn test_verification_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VERIFICATION_FILE);
        let store = VerificationStore::open(&path).unwrap();

        let first = VerificationRecord::issue(&assignment("C-1", "Jane"), Utc::now(), None);
        let latest =
            VerificationRecord::issue(&assignment("C-1", "Jane Doe"), Utc::now(), Some("ab".into()));
        store.upsert(first).unwrap();
        store.upsert(latest.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("C-1"), Some(latest.clone()));

        // A fresh reader sees the newest write.
        let reopened = VerificationStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("C-1").unwrap().name, "Jane Doe");
        assert_eq!(reopened.get("C-1").unwrap().status, CertificateStatus::Valid);
    }

    #[test]
    fn test_corrupt_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VERIFICATION_FILE);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(VerificationStore::open(&path), Err(LedgerError::Corrupt { .. })));
    }

    #[test]
    fn test_ledger_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let ledger = Ledger::open(&dir.path().join("logs"), &dir.path().join("data"), date).unwrap();
        assert!(ledger.audit().path().ends_with("delivery-2026-02-01.csv"));

        assert!(ledger.get_verification("C-9").is_none());
        ledger
            .save_verification(VerificationRecord::issue(&assignment("C-9", "Jane"), Utc::now(), None))
            .unwrap();
        assert_eq!(ledger.get_verification("C-9").unwrap().organization, "ACME");
    }
}
