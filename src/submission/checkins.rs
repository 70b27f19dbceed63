//! Length checks for check-in protected reports.
//!
//! Each report in a submission carries three encrypted envelope fields
//! whose sizes are fixed by the client protocol:
//!
//! - `locationIdHash`: 32 bytes
//! - `iv`: 32 bytes
//! - `encryptedCheckInRecord`: 16 bytes
//!
//! [`CheckInProtectedReportsValidator::verify`] checks every field of
//! every report and returns all violations as data.

use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SubmissionRejected;
use crate::metrics::SUBMISSION_VALIDATIONS_TOTAL;

/// Required length of `locationIdHash`.
pub const LOCATION_ID_HASH_LENGTH: usize = 32;
/// Required length of `iv`.
pub const IV_LENGTH: usize = 32;
/// Required length of `encryptedCheckInRecord`.
pub const ENCRYPTED_CHECK_IN_RECORD_LENGTH: usize = 16;

/// Encrypted check-in as submitted by a client.
///
/// In JSON, fields are camelCase base64 strings; a missing field reads as
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInProtectedReport {
    #[serde(default, with = "base64_bytes")]
    pub location_id_hash: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub encrypted_check_in_record: Vec<u8>,
}

/// The part of a submission payload the validator reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    #[serde(default)]
    pub check_in_protected_reports: Vec<CheckInProtectedReport>,
}

/// Envelope field subject to a length check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeField {
    LocationIdHash,
    Iv,
    EncryptedCheckInRecord,
}

impl EnvelopeField {
    /// Wire name of the field.
    pub fn name(self) -> &'static str {
        match self {
            EnvelopeField::LocationIdHash => "locationIdHash",
            EnvelopeField::Iv => "iv",
            EnvelopeField::EncryptedCheckInRecord => "encryptedCheckInRecord",
        }
    }

    pub fn expected_length(self) -> usize {
        match self {
            EnvelopeField::LocationIdHash => LOCATION_ID_HASH_LENGTH,
            EnvelopeField::Iv => IV_LENGTH,
            EnvelopeField::EncryptedCheckInRecord => ENCRYPTED_CHECK_IN_RECORD_LENGTH,
        }
    }

    fn value(self, report: &CheckInProtectedReport) -> &[u8] {
        match self {
            EnvelopeField::LocationIdHash => &report.location_id_hash,
            EnvelopeField::Iv => &report.iv,
            EnvelopeField::EncryptedCheckInRecord => &report.encrypted_check_in_record,
        }
    }
}

impl fmt::Display for EnvelopeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One field of one report with the wrong length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Position of the report in the payload.
    pub report_index: usize,
    #[serde(serialize_with = "serialize_field")]
    pub field: EnvelopeField,
    pub expected: usize,
    /// Observed length (0 when absent).
    pub actual: usize,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CheckInProtectedReports {} must have {} bytes not {}",
            self.field, self.expected, self.actual
        )
    }
}

fn serialize_field<S: serde::Serializer>(field: &EnvelopeField, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(field.name())
}

/// Violations found in one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub violations: Vec<FieldViolation>,
}

impl ValidationOutcome {
    /// True iff every report passed every check.
    pub fn is_accepted(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations for the report at `index`.
    pub fn for_report(&self, index: usize) -> impl Iterator<Item = &FieldViolation> {
        self.violations
            .iter()
            .filter(move |v| v.report_index == index)
    }

    /// Turn a failing outcome into a rejection the intake layer can return.
    pub fn into_result(self) -> Result<(), SubmissionRejected> {
        if self.is_accepted() {
            Ok(())
        } else {
            Err(SubmissionRejected {
                violations: self.violations,
            })
        }
    }
}

/// Validator for the check-in protected reports of a submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckInProtectedReportsValidator;

impl CheckInProtectedReportsValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check all three fields of every report.  An empty report list is
    /// accepted.
    pub fn verify(&self, payload: &SubmissionPayload) -> ValidationOutcome {
        let violations: Vec<FieldViolation> = payload
            .check_in_protected_reports
            .iter()
            .enumerate()
            .flat_map(|(index, report)| self.verify_report(index, report))
            .collect();

        let outcome = ValidationOutcome { violations };
        let result = if outcome.is_accepted() {
            "accepted"
        } else {
            "rejected"
        };
        counter!(SUBMISSION_VALIDATIONS_TOTAL, "result" => result).increment(1);
        debug!(
            "validated {} check-in report(s): {} violation(s)",
            payload.check_in_protected_reports.len(),
            outcome.violations.len()
        );
        outcome
    }

    /// Every violation of a single report; all fields are checked even
    /// after one fails.
    pub fn verify_report(&self, index: usize, report: &CheckInProtectedReport) -> Vec<FieldViolation> {
        [
            self.verify_location_id_hash_length(index, report),
            self.verify_iv_length(index, report),
            self.verify_encrypted_check_in_record_length(index, report),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn verify_location_id_hash_length(
        &self,
        index: usize,
        report: &CheckInProtectedReport,
    ) -> Option<FieldViolation> {
        check_length(EnvelopeField::LocationIdHash, index, report)
    }

    pub fn verify_iv_length(
        &self,
        index: usize,
        report: &CheckInProtectedReport,
    ) -> Option<FieldViolation> {
        check_length(EnvelopeField::Iv, index, report)
    }

    // Exact length, not merely non-empty.
    pub fn verify_encrypted_check_in_record_length(
        &self,
        index: usize,
        report: &CheckInProtectedReport,
    ) -> Option<FieldViolation> {
        check_length(EnvelopeField::EncryptedCheckInRecord, index, report)
    }
}

fn check_length(
    field: EnvelopeField,
    index: usize,
    report: &CheckInProtectedReport,
) -> Option<FieldViolation> {
    let actual = field.value(report).len();
    let expected = field.expected_length();
    (actual != expected).then_some(FieldViolation {
        report_index: index,
        field,
        expected,
        actual,
    })
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(d)?;
        match encoded {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

// -- Tests -------------------------------------------------------------------
