//! Participant Records - Normalization
//!
//! Source rows come with whatever headers the organizer typed. Each logical
//! field has a fixed, ordered alias list and the first present alias wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const NAME_ALIASES: &[&str] = &["name", "Name", "NAME", "Participant Name", "Full Name"];
pub const EMAIL_ALIASES: &[&str] = &["email", "Email", "EMAIL", "Email Address"];
pub const EVENT_ALIASES: &[&str] = &["event", "Event", "EVENT", "Event Name"];
pub const PHONE_ALIASES: &[&str] = &["phone", "Phone", "PHONE", "Mobile", "Contact"];
pub const ORGANIZATION_ALIASES: &[&str] =
    &["organization", "Organization", "ORGANIZATION", "Company", "Institution"];

/// One raw source row: column header -> cell value. Empty cells are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    cells: HashMap<String, String>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.cells.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// First alias present with a non-blank value, in alias order.
    pub fn first_of(&self, aliases: &[&str]) -> Option<&str> {
        aliases
            .iter()
            .find_map(|alias| self.get(alias).filter(|v| !v.trim().is_empty()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub name: String,
    pub email: String,
    pub event: String,
    pub phone: String,
    pub organization: String,
}

/// Capitalize the first character of each whitespace-separated token and
/// lowercase the rest.
pub fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Turn a raw row into a canonical record. `default_event` fills a missing event.
pub fn normalize(row: &RawRow, default_event: &str) -> ParticipantRecord {
    let trimmed = |aliases: &[&str]| {
        row.first_of(aliases)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let event = trimmed(EVENT_ALIASES);

    ParticipantRecord {
        name: row.first_of(NAME_ALIASES).map(title_case).unwrap_or_default(),
        email: trimmed(EMAIL_ALIASES).to_lowercase(),
        event: if event.is_empty() { default_event.trim().to_string() } else { event },
        phone: trimmed(PHONE_ALIASES),
        organization: trimmed(ORGANIZATION_ALIASES),
    }
}

pub fn normalize_all(rows: &[RawRow], default_event: &str) -> Vec<ParticipantRecord> {
    rows.iter().map(|row| normalize(row, default_event)).collect()
}

/// True when the headers can supply both a name and an email.
pub fn has_required_columns<S: AsRef<str>>(headers: &[S]) -> bool {
    let has = |aliases: &[&str]| headers.iter().any(|h| aliases.contains(&h.as_ref()));
    has(NAME_ALIASES) && has(EMAIL_ALIASES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("jane doe"), "Jane Doe");
        assert_eq!(title_case("  McDONALD   o'neil "), "Mcdonald O'neil");
        assert_eq!(title_case("élodie"), "Élodie");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_first_alias_wins() {
        let row = RawRow::new()
            .with("Full Name", "second choice")
            .with("name", "first choice")
            .with("Email Address", " Someone@Example.COM ");
        let record = normalize(&row, "Hackathon");
        assert_eq!(record.name, "First Choice");
        assert_eq!(record.email, "someone@example.com");
        assert_eq!(record.event, "Hackathon");
        assert_eq!(record.phone, "");
        assert_eq!(record.organization, "");
    }

    #[test]
    fn test_event_column_overrides_default() {
        let row = RawRow::new()
            .with("Name", "a")
            .with("Event Name", "  Code Sprint ")
            .with("Company", " ACME ")
            .with("Mobile", " 555-0100 ");
        let record = normalize(&row, "Default");
        assert_eq!(record.event, "Code Sprint");
        assert_eq!(record.organization, "ACME");
        assert_eq!(record.phone, "555-0100");
    }

    #[test]
    fn test_blank_alias_falls_through() {
        let row = RawRow::new().with("name", "   ").with("Full Name", "bob smith");
        assert_eq!(normalize(&row, "E").name, "Bob Smith");
    }

    #[test]
    fn test_required_columns() {
        assert!(has_required_columns(&["Full Name", "EMAIL", "Phone"]));
        assert!(!has_required_columns(&["Full Name", "Phone"]));
        assert!(!has_required_columns::<&str>(&[]));
    }
}
