//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations per record.
//! The validator partitions a batch into valid records and row errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::records::ParticipantRecord;

/// Row numbers are reported as the organizer sees them in the sheet:
/// one header row, counting from 1.
pub const HEADER_ROW_OFFSET: usize = 2;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub message: String,
}

/// A rejected source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowViolation {
    pub row: usize,
    pub name: String,
    pub email: String,
    pub errors: Vec<ValidationViolation>,
}

impl RowViolation {
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|v| v.message.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchValidation {
    /// At least one record passed.
    pub valid: bool,
    pub valid_records: Vec<ParticipantRecord>,
    pub errors: Vec<RowViolation>,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, record: &ParticipantRecord) -> Option<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct NameRequiredRule;

impl ValidationRule for NameRequiredRule {
    fn name(&self) -> &'static str { "name_required" }

    fn validate(&self, record: &ParticipantRecord) -> Option<ValidationViolation> {
        if record.name.trim().is_empty() {
            Some(ValidationViolation {
                rule: self.name().to_string(),
                message: "Name is required".to_string(),
            })
        } else {
            None
        }
    }
}

pub struct EmailRequiredRule;

impl ValidationRule for EmailRequiredRule {
    fn name(&self) -> &'static str { "email_required" }

    fn validate(&self, record: &ParticipantRecord) -> Option<ValidationViolation> {
        if record.email.trim().is_empty() {
            Some(ValidationViolation {
                rule: self.name().to_string(),
                message: "Email is required".to_string(),
            })
        } else {
            None
        }
    }
}

/// Only judges syntax; an empty address is `email_required`'s business.
pub struct EmailFormatRule;

impl ValidationRule for EmailFormatRule {
    fn name(&self) -> &'static str { "email_format" }

    fn validate(&self, record: &ParticipantRecord) -> Option<ValidationViolation> {
        let email = record.email.trim();
        if email.is_empty() || is_valid_email(email) {
            None
        } else {
            Some(ValidationViolation {
                rule: self.name().to_string(),
                message: "Invalid email format".to_string(),
            })
        }
    }
}

/// Validator orchestrates rules over a batch
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(NameRequiredRule),
                Box::new(EmailRequiredRule),
                Box::new(EmailFormatRule),
            ],
        }
    }

    pub fn validate_record(&self, record: &ParticipantRecord) -> Vec<ValidationViolation> {
        self.rules.iter().filter_map(|rule| rule.validate(record)).collect()
    }

    pub fn validate_batch(&self, records: &[ParticipantRecord]) -> BatchValidation {
        if records.is_empty() {
            return BatchValidation {
                valid: false,
                valid_records: vec![],
                errors: vec![RowViolation {
                    row: 0,
                    name: String::new(),
                    email: String::new(),
                    errors: vec![ValidationViolation {
                        rule: "non_empty_input".to_string(),
                        message: "Input contains no rows".to_string(),
                    }],
                }],
            };
        }

        let mut valid_records = vec![];
        let mut errors = vec![];

        for (index, record) in records.iter().enumerate() {
            let violations = self.validate_record(record);
            if violations.is_empty() {
                valid_records.push(record.clone());
            } else {
                errors.push(RowViolation {
                    row: index + HEADER_ROW_OFFSET,
                    name: record.name.clone(),
                    email: record.email.clone(),
                    errors: violations,
                });
            }
        }

        if !errors.is_empty() {
            warn!(count = errors.len(), "invalid rows in participant source");
            for err in &errors {
                warn!(row = err.row, name = %err.name, "{}", err.messages().join(", "));
            }
        }

        BatchValidation {
            valid: !valid_records.is_empty(),
            valid_records,
            errors,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deduplication {
    pub unique: Vec<ParticipantRecord>,
    /// Dropped later occurrences, in input order.
    pub duplicates: Vec<ParticipantRecord>,
}

/// Drop records whose email (trimmed, case-insensitive) was already seen.
/// The first occurrence is kept and input order is preserved.
pub fn deduplicate(records: Vec<ParticipantRecord>) -> Deduplication {
    let mut seen = HashSet::new();
    let mut result = Deduplication::default();

    for record in records {
        if seen.insert(record.email.trim().to_lowercase()) {
            result.unique.push(record);
        } else {
            result.duplicates.push(record);
        }
    }

    if !result.duplicates.is_empty() {
        warn!(count = result.duplicates.len(), "removed duplicate email(s)");
        for dup in &result.duplicates {
            warn!(name = %dup.name, email = %dup.email, "duplicate skipped");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, email: &str) -> ParticipantRecord {
        ParticipantRecord {
            name: name.to_string(),
            email: email.to_string(),
            event: "Event".to_string(),
            phone: String::new(),
            organization: String::new(),
        }
    }

    #[test]
    fn test_email_pattern() {
        assert!(is_valid_email("jane@x.com"));
        assert!(is_valid_email("a.b+c@sub.domain.org"));
        assert!(!is_valid_email("jane@x"));
        assert!(!is_valid_email("jane doe@x.com"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("jane@@x.com"));
    }

    #[test]
    fn test_row_numbers_are_header_adjusted() {
        let batch = vec![
            record("Ok One", "one@x.com"),
            record("", "two@x.com"),
            record("Bad Mail", "not-an-address"),
            record("", ""),
        ];
        let result = Validator::new().validate_batch(&batch);

        assert!(result.valid);
        assert_eq!(result.valid_records.len(), 1);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.errors[0].row, 3);
        assert_eq!(result.errors[0].messages(), vec!["Name is required"]);
        assert_eq!(result.errors[1].row, 4);
        assert_eq!(result.errors[1].messages(), vec!["Invalid email format"]);
        assert_eq!(result.errors[2].row, 5);
        assert_eq!(result.errors[2].messages(), vec!["Name is required", "Email is required"]);
    }

    #[test]
    fn test_all_invalid_is_not_valid() {
        let result = Validator::new().validate_batch(&[record("", "x")]);
        assert!(!result.valid);
        assert!(result.valid_records.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let result = Validator::new().validate_batch(&[]);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_dedup_first_wins_case_insensitive() {
        // First occurrence wins even when a later duplicate is more complete.
        let mut richer = record("Jane Doe", "JANE@x.com ");
        richer.organization = "ACME".to_string();
        let result = deduplicate(vec![
            record("Jane", "jane@x.com"),
            record("Bob", "bob@x.com"),
            richer,
        ]);

        assert_eq!(result.unique.len(), 2);
        assert_eq!(result.unique[0].name, "Jane");
        assert_eq!(result.unique[1].name, "Bob");
        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.duplicates[0].organization, "ACME");
    }
}
