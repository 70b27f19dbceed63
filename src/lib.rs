//! Artifact publisher library -- retried, bounded-concurrency uploads to
//! S3-compatible object stores, plus envelope checks for inbound
//! submissions.
//!
//! A process builds one [`publish::ObjectStorePublisher`] at start-up
//! (credentialed client, retry policy, fixed worker pool) and hands it to
//! every artifact producer.  Submission intake uses
//! [`submission::CheckInProtectedReportsValidator`] independently of the
//! publishing path.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod publish;
pub mod storage;
pub mod submission;

pub use errors::{PublishError, StorageError, SubmissionRejected};
pub use publish::ObjectStorePublisher;
pub use submission::CheckInProtectedReportsValidator;
