//! Submission intake checks.
//!
//! Intake calls [`checkins::CheckInProtectedReportsValidator::verify`]
//! before accepting a payload and rejects the whole submission if the
//! outcome is not accepted.

pub mod checkins;

pub use checkins::{
    CheckInProtectedReport, CheckInProtectedReportsValidator, EnvelopeField, FieldViolation,
    SubmissionPayload, ValidationOutcome,
};
