//! Publish task and its successful outcome.

use bytes::Bytes;

/// One artifact to write to the object store.
///
/// Lives until the task succeeds or fails for good; nothing is
/// persisted, so a failed task must be re-submitted by its producer.
#[derive(Debug, Clone)]
pub struct PublishTask {
    pub object_key: String,
    pub payload: Bytes,
    /// Attempts made so far for this task.
    pub attempt: u32,
}

impl PublishTask {
    pub fn new(object_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            object_key: object_key.into(),
            payload: payload.into(),
            attempt: 0,
        }
    }
}

/// Result of a task that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub object_key: String,
    pub bytes: usize,
    pub attempts: u32,
}
