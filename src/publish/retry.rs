//! Retry policy and the retrying wrapper around object store calls.
//!
//! Every store call made for a publish task goes through
//! [`RetryingClient`].  A call is repeated only while it fails with a
//! transient [`StorageError`] and attempts remain; permanent errors end
//! the call at once.  Nothing is remembered between calls.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use super::task::{PublishReceipt, PublishTask};
use crate::errors::{PublishError, StorageError};
use crate::metrics::{
    PUBLISHED_BYTES_TOTAL, STORE_ATTEMPTS_TOTAL, STORE_FAILURES_TOTAL, STORE_RETRIES_TOTAL,
};
use crate::storage::client::ObjectStoreClient;

/// Delay strategy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * multiplier^(n-1)` before retry `n`, capped at `max_delay`.
    Exponential {
        base: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

/// Bounded-attempt retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                base: Duration::from_millis(200),
                multiplier: 2.0,
                max_delay: Duration::from_secs(5),
            },
        )
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt and is at least 1.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter: 0.0,
        }
    }

    /// Spread each delay uniformly by up to `jitter` (a fraction in `[0, 1]`).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delay to wait after `attempts_made` failed attempts, before the next one.
    ///
    /// Example with base=200ms, multiplier=2.0:
    /// - after attempt 1: 200ms
    /// - after attempt 2: 400ms
    /// - after attempt 3: 800ms
    pub fn delay_before_retry(&self, attempts_made: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential {
                base,
                multiplier,
                max_delay,
            } => {
                let exponent = attempts_made.saturating_sub(1) as i32;
                let secs = base.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        };
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64(factor)
    }
}

/// Object store client with a retry policy applied to each call.
pub struct RetryingClient {
    client: Arc<dyn ObjectStoreClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(client: Arc<dyn ObjectStoreClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// The wrapped client, for calls that must bypass retries.
    pub fn inner(&self) -> &Arc<dyn ObjectStoreClient> {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails permanently, or the policy
    /// runs out of attempts.  `attempt` is incremented before each try.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        object_key: &str,
        attempt: &mut u32,
        mut call: F,
    ) -> Result<T, PublishError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        loop {
            *attempt += 1;
            counter!(STORE_ATTEMPTS_TOTAL, "operation" => operation).increment(1);

            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_transient() && *attempt < self.policy.max_attempts {
                let delay = self.policy.delay_before_retry(*attempt);
                warn!(
                    "{} of '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, object_key, attempt, self.policy.max_attempts, delay, err
                );
                counter!(STORE_RETRIES_TOTAL, "operation" => operation).increment(1);
                tokio::time::sleep(delay).await;
                continue;
            }

            counter!(STORE_FAILURES_TOTAL, "operation" => operation).increment(1);
            return Err(PublishError::PublishFailed {
                operation,
                object_key: object_key.to_string(),
                attempts: *attempt,
                source: err,
            });
        }
    }

    /// Push the task's payload, recording attempts on the task itself.
    pub async fn publish(&self, task: &mut PublishTask) -> Result<PublishReceipt, PublishError> {
        let client = &self.client;
        let object_key = task.object_key.clone();
        let payload = task.payload.clone();

        self.run("push", &object_key, &mut task.attempt, || {
            client.push(&object_key, payload.clone())
        })
        .await?;

        counter!(PUBLISHED_BYTES_TOTAL).increment(payload.len() as u64);
        debug!(
            "published '{}' ({} bytes) after {} attempt(s)",
            object_key,
            payload.len(),
            task.attempt
        );

        Ok(PublishReceipt {
            object_key,
            bytes: payload.len(),
            attempts: task.attempt,
        })
    }

    pub async fn push(&self, object_key: &str, payload: Bytes) -> Result<(), PublishError> {
        let mut attempt = 0;
        self.run("push", object_key, &mut attempt, || {
            self.client.push(object_key, payload.clone())
        })
        .await
    }

    pub async fn exists(&self, object_key: &str) -> Result<bool, PublishError> {
        let mut attempt = 0;
        self.run("exists", object_key, &mut attempt, || {
            self.client.exists(object_key)
        })
        .await
    }

    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PublishError> {
        let mut attempt = 0;
        self.run("list_keys", prefix, &mut attempt, || {
            self.client.list_keys(prefix)
        })
        .await
    }

    pub async fn delete(&self, object_key: &str) -> Result<(), PublishError> {
        let mut attempt = 0;
        self.run("delete", object_key, &mut attempt, || {
            self.client.delete(object_key)
        })
        .await
    }
}

// -- Tests -------------------------------------------------------------------
