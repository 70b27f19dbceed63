//! Artifact publishing.
//!
//! [`ObjectStorePublisher`] is built once at process start and shared by
//! artifact producers.  Each `publish` call becomes a [`PublishTask`] on
//! the [`UploadExecutor`], whose workers push it through the
//! [`RetryingClient`].

pub mod executor;
pub mod retry;
pub mod task;

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::config::Config;
use crate::errors::PublishError;
use crate::storage::client::ObjectStoreClient;

pub use executor::{UploadExecutor, UploadHandle};
pub use retry::{Backoff, RetryPolicy, RetryingClient};
pub use task::{PublishReceipt, PublishTask};

/// Process-wide publishing component: one client, one worker pool.
pub struct ObjectStorePublisher {
    client: Arc<RetryingClient>,
    executor: UploadExecutor,
}

impl ObjectStorePublisher {
    /// Assemble a publisher around an existing client.  Must be called
    /// from within a tokio runtime.
    pub fn new(client: Arc<dyn ObjectStoreClient>, policy: RetryPolicy, max_workers: usize) -> Self {
        let client = Arc::new(RetryingClient::new(client, policy));
        let executor = UploadExecutor::start(max_workers, Arc::clone(&client));
        Self { client, executor }
    }

    /// Build the configured client and worker pool.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client =
            crate::storage::build_client(&config.object_store, &config.publishing).await?;
        let publisher = Self::new(
            client,
            config.object_store.retry.policy(),
            config.object_store.max_number_of_workers,
        );
        info!(
            "Publisher ready: backend={} workers={} max_attempts={}",
            config.object_store.backend,
            publisher.executor.max_workers(),
            publisher.client.policy().max_attempts()
        );
        Ok(publisher)
    }

    /// Queue `payload` for upload to `object_key`.
    pub fn publish(
        &self,
        object_key: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<UploadHandle, PublishError> {
        self.executor.submit(PublishTask::new(object_key, payload))
    }

    /// Queue every artifact, then wait for all of them.  Results come back
    /// in submission order.
    pub async fn publish_all<I>(&self, artifacts: I) -> Vec<Result<PublishReceipt, PublishError>>
    where
        I: IntoIterator<Item = (String, Bytes)>,
    {
        let submitted: Vec<_> = artifacts
            .into_iter()
            .map(|(key, payload)| self.publish(key, payload))
            .collect();

        let mut results = Vec::with_capacity(submitted.len());
        for handle in submitted {
            results.push(match handle {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            });
        }
        results
    }

    /// Keys currently stored under the client's list path.
    pub async fn list_published(&self) -> Result<Vec<String>, PublishError> {
        let list_path = self.client.inner().list_path().to_string();
        self.client.list_keys(&list_path).await
    }

    /// Retrying access for direct calls (exists, delete, listing).
    pub fn client(&self) -> &RetryingClient {
        &self.client
    }

    pub fn executor(&self) -> &UploadExecutor {
        &self.executor
    }

    /// Drain outstanding uploads and stop the workers.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

/// Test doubles shared by the publishing tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::errors::StorageError;
    use crate::storage::client::{ObjectStoreClient, StorageFuture};
    use crate::storage::memory::MemoryObjectStoreClient;

    /// Memory client whose pushes follow a script of results.
    pub struct ScriptedClient {
        inner: MemoryObjectStoreClient,
        script: Mutex<VecDeque<Result<(), StorageError>>>,
        always: Option<StorageError>,
        push_calls: AtomicU32,
    }

    impl ScriptedClient {
        /// Pushes return the scripted results in order, then succeed.
        pub fn with_push_script(script: Vec<Result<(), StorageError>>) -> Self {
            Self {
                inner: MemoryObjectStoreClient::new("dcc-rl"),
                script: Mutex::new(script.into()),
                always: None,
                push_calls: AtomicU32::new(0),
            }
        }

        /// Every push fails with `err`.
        pub fn always_failing(err: StorageError) -> Self {
            Self {
                always: Some(err),
                ..Self::with_push_script(Vec::new())
            }
        }

        pub fn push_calls(&self) -> u32 {
            self.push_calls.load(Ordering::SeqCst)
        }
    }

    impl ObjectStoreClient for ScriptedClient {
        fn push(&self, object_key: &str, payload: Bytes) -> StorageFuture<'_, ()> {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.always {
                let err = err.clone();
                return Box::pin(async move { Err(err) });
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Err(err)) => Box::pin(async move { Err(err) }),
                _ => self.inner.push(object_key, payload),
            }
        }

        fn exists(&self, object_key: &str) -> StorageFuture<'_, bool> {
            self.inner.exists(object_key)
        }

        fn list_keys(&self, prefix: &str) -> StorageFuture<'_, Vec<String>> {
            self.inner.list_keys(prefix)
        }

        fn delete(&self, object_key: &str) -> StorageFuture<'_, ()> {
            self.inner.delete(object_key)
        }

        fn list_path(&self) -> &str {
            self.inner.list_path()
        }
    }

    /// Memory client that holds each push for `delay` and records the
    /// highest number of pushes in flight at once.
    pub struct ConcurrencyProbe {
        inner: MemoryObjectStoreClient,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ConcurrencyProbe {
        pub fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryObjectStoreClient::new("dcc-rl"),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }
    }

    impl ObjectStoreClient for ConcurrencyProbe {
        fn push(&self, object_key: &str, payload: Bytes) -> StorageFuture<'_, ()> {
            let object_key = object_key.to_string();
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                let result = self.inner.push(&object_key, payload).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.completed.fetch_add(1, Ordering::SeqCst);
                result
            })
        }

        fn exists(&self, object_key: &str) -> StorageFuture<'_, bool> {
            self.inner.exists(object_key)
        }

        fn list_keys(&self, prefix: &str) -> StorageFuture<'_, Vec<String>> {
            self.inner.list_keys(prefix)
        }

        fn delete(&self, object_key: &str) -> StorageFuture<'_, ()> {
            self.inner.delete(object_key)
        }

        fn list_path(&self) -> &str {
            self.inner.list_path()
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::storage::memory::MemoryObjectStoreClient;
    use std::time::Duration;
    use testing::ScriptedClient;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Backoff::Fixed {
                delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_then_exists_then_delete() {
        let store = Arc::new(MemoryObjectStoreClient::new("dcc-rl"));
        let publisher = ObjectStorePublisher::new(store.clone(), fast_policy(), 2);

        publisher
            .publish("dcc-rl/chunk", Bytes::from("payload"))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(publisher.client().exists("dcc-rl/chunk").await.unwrap());

        publisher.client().delete("dcc-rl/chunk").await.unwrap();
        assert!(!publisher.client().exists("dcc-rl/chunk").await.unwrap());
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_all_and_list_published() {
        let store = Arc::new(MemoryObjectStoreClient::new("dcc-rl/"));
        let publisher = ObjectStorePublisher::new(store.clone(), fast_policy(), 3);

        let artifacts = vec![
            ("dcc-rl/a".to_string(), Bytes::from("1")),
            ("dcc-rl/b".to_string(), Bytes::from("22")),
            ("other/c".to_string(), Bytes::from("333")),
        ];
        let results = publisher.publish_all(artifacts).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(results[1].as_ref().unwrap().bytes, 2);

        let listed = publisher.list_published().await.unwrap();
        assert_eq!(listed, vec!["dcc-rl/a".to_string(), "dcc-rl/b".to_string()]);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_all_reports_each_failure() {
        let scripted = Arc::new(ScriptedClient::with_push_script(vec![Err(
            StorageError::rejected("put_object", "denied"),
        )]));
        // One worker keeps the script order deterministic.
        let publisher = ObjectStorePublisher::new(scripted, fast_policy(), 1);

        let results = publisher
            .publish_all(vec![
                ("k1".to_string(), Bytes::from("x")),
                ("k2".to_string(), Bytes::from("y")),
            ])
            .await;
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails() {
        let store = Arc::new(MemoryObjectStoreClient::new("dcc-rl"));
        let publisher = ObjectStorePublisher::new(store, fast_policy(), 1);
        publisher.shutdown().await;
        assert!(matches!(
            publisher.publish("k", Bytes::from("x")),
            Err(PublishError::ExecutorClosed)
        ));
    }

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let config =
            crate::config::parse_config("object_store: { backend: memory, max_number_of_workers: 2 }")
                .unwrap();
        let publisher = ObjectStorePublisher::from_config(&config).await.unwrap();
        assert_eq!(publisher.executor().max_workers(), 2);
        assert_eq!(publisher.client().policy().max_attempts(), 3);
        publisher.shutdown().await;
    }
}
