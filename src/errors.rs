//! Error types for publishing and submission intake.
//!
//! [`StorageError`] is what a raw [`ObjectStoreClient`] call returns; its
//! variant decides whether the retry layer tries again.  Only
//! [`PublishError`] escapes the retry layer to artifact producers.
//!
//! [`ObjectStoreClient`]: crate::storage::client::ObjectStoreClient

use thiserror::Error;

use crate::submission::checkins::FieldViolation;

/// Failure of a single object store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Timeout, connection failure, throttling or a 5xx response.
    #[error("transient object store error in {operation}{}: {message}", fmt_status(.status))]
    Transient {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Authentication/authorization failure or a malformed request.
    #[error("permanent object store error in {operation}{}: {message}", fmt_status(.status))]
    Permanent {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// S3 error codes that are worth retrying even when the status says otherwise.
const TRANSIENT_CODES: &[&str] = &[
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "Throttling",
];

impl StorageError {
    /// Classify a store response by HTTP status and optional S3 error code.
    pub fn from_response(
        operation: &'static str,
        status: Option<u16>,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let transient_status = matches!(status, Some(408) | Some(429) | Some(500..=599));
        let transient_code = code.is_some_and(|c| TRANSIENT_CODES.contains(&c));
        if transient_status || transient_code {
            StorageError::Transient {
                operation,
                status,
                message,
            }
        } else {
            StorageError::Permanent {
                operation,
                status,
                message,
            }
        }
    }

    /// A failure that never reached the store (network, timeout).
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        StorageError::Transient {
            operation,
            status: None,
            message: message.into(),
        }
    }

    /// A request the store will never accept, regardless of retries.
    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        StorageError::Permanent {
            operation,
            status: None,
            message: message.into(),
        }
    }

    /// Whether the retry layer may try the call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }

    /// HTTP status of the failed response, if the store answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Transient { status, .. } | StorageError::Permanent { status, .. } => {
                *status
            }
        }
    }

    /// Name of the store operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            StorageError::Transient { operation, .. }
            | StorageError::Permanent { operation, .. } => operation,
        }
    }
}

/// Terminal outcome of a publish task that did not succeed.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Retries exhausted or a permanent error was hit.
    #[error("{operation} of '{object_key}' failed after {attempts} attempt(s)")]
    PublishFailed {
        operation: &'static str,
        object_key: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// The upload executor no longer accepts tasks.
    #[error("upload executor is shut down")]
    ExecutorClosed,

    /// The worker running the task went away before reporting a result.
    #[error("upload worker exited before finishing '{object_key}'")]
    WorkerLost { object_key: String },

    /// The upload panicked or was cancelled; the worker kept running.
    #[error("upload of '{object_key}' aborted: {reason}")]
    UploadAborted { object_key: String, reason: String },
}

impl PublishError {
    /// The storage failure behind a `PublishFailed`, if any.
    pub fn storage_cause(&self) -> Option<&StorageError> {
        match self {
            PublishError::PublishFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Attempts made before giving up (0 if the task never ran).
    pub fn attempts(&self) -> u32 {
        match self {
            PublishError::PublishFailed { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// A submission rejected because check-in envelope fields have the wrong length.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("submission rejected: {}", join_violations(.violations))]
pub struct SubmissionRejected {
    /// Every failing field, across all reports.
    pub violations: Vec<FieldViolation>,
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        for status in [500, 502, 503, 504] {
            let err = StorageError::from_response("put_object", Some(status), None, "boom");
            assert!(err.is_transient(), "status {status} should be transient");
        }
    }

    #[test]
    fn test_throttling_and_timeout_statuses_are_transient() {
        assert!(StorageError::from_response("put_object", Some(429), None, "").is_transient());
        assert!(StorageError::from_response("put_object", Some(408), None, "").is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404] {
            let err = StorageError::from_response("put_object", Some(status), None, "nope");
            assert!(!err.is_transient(), "status {status} should be permanent");
        }
    }

    #[test]
    fn test_transient_code_overrides_client_status() {
        let err =
            StorageError::from_response("put_object", Some(400), Some("RequestTimeout"), "slow");
        assert!(err.is_transient());
    }

    #[test]
    fn test_auth_code_is_permanent() {
        let err = StorageError::from_response(
            "put_object",
            Some(403),
            Some("InvalidAccessKeyId"),
            "bad key",
        );
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.operation(), "put_object");
    }

    #[test]
    fn test_transport_error_is_transient() {
        let err = StorageError::transport("head_object", "connection refused");
        assert!(err.is_transient());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_error_display_includes_status() {
        let err = StorageError::from_response("delete_object", Some(503), None, "busy");
        assert_eq!(
            err.to_string(),
            "transient object store error in delete_object (HTTP 503): busy"
        );
    }

    #[test]
    fn test_publish_failed_preserves_cause() {
        let cause = StorageError::rejected("put_object", "malformed key");
        let err = PublishError::PublishFailed {
            operation: "push",
            object_key: "a/b".to_string(),
            attempts: 1,
            source: cause.clone(),
        };
        assert_eq!(err.storage_cause(), Some(&cause));
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.to_string(), "push of 'a/b' failed after 1 attempt(s)");
    }
}
