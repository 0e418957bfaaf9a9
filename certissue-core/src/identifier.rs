//! Certificate identifiers: `{prefix}-{YYYYMMDD}-{sequence:04}`.
//!
//! The sequence is the 1-based position in the validated, deduplicated batch,
//! so the same input ordering and date always yield the same identifiers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::ParticipantRecord;

pub fn assign(prefix: &str, index: usize, date: NaiveDate) -> String {
    format!("{}-{}-{:04}", prefix, date.format("%Y%m%d"), index)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAssignment {
    pub certificate_id: String,
    pub participant: ParticipantRecord,
}

/// Pair every record with its identifier, in batch order.
pub fn assign_all(
    prefix: &str,
    date: NaiveDate,
    records: Vec<ParticipantRecord>,
) -> Vec<CertificateAssignment> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, participant)| CertificateAssignment {
            certificate_id: assign(prefix, i + 1, date),
            participant,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        assert_eq!(assign("CERT", 1, date), "CERT-20260201-0001");
        assert_eq!(assign("ACM", 42, date), "ACM-20260201-0042");
        assert_eq!(assign("X", 12345, date), "X-20260201-12345");
    }

    #[test]
    fn test_assign_all_is_positional() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let record = |email: &str| ParticipantRecord {
            name: "N".to_string(),
            email: email.to_string(),
            event: "E".to_string(),
            phone: String::new(),
            organization: String::new(),
        };
        let assigned = assign_all("CERT", date, vec![record("a@x.io"), record("b@x.io")]);
        assert_eq!(assigned[0].certificate_id, "CERT-20251231-0001");
        assert_eq!(assigned[1].certificate_id, "CERT-20251231-0002");
        assert_eq!(assigned[1].participant.email, "b@x.io");
    }
}
