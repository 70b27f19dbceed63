//! Fixed-size upload worker pool.
//!
//! [`UploadExecutor`] runs exactly `max_workers` long-lived tokio tasks
//! that pull [`PublishTask`]s from one shared queue.  The pool never grows
//! or shrinks, which caps concurrent connections to the store no matter
//! how many artifacts are queued.
//!
//! Shutdown closes admission and then waits: every queued and in-flight
//! task is finished before the workers exit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use metrics::gauge;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use super::retry::RetryingClient;
use super::task::{PublishReceipt, PublishTask};
use crate::errors::PublishError;
use crate::metrics::{UPLOAD_QUEUE_DEPTH, UPLOAD_WORKERS_BUSY};

type Reply = oneshot::Sender<Result<PublishReceipt, PublishError>>;
type Job = (PublishTask, Reply);

/// Handle to the eventual outcome of a submitted task.
#[derive(Debug)]
pub struct UploadHandle {
    object_key: String,
    rx: oneshot::Receiver<Result<PublishReceipt, PublishError>>,
}

impl UploadHandle {
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// Wait for the task to succeed or fail for good.
    pub async fn wait(self) -> Result<PublishReceipt, PublishError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(PublishError::WorkerLost {
                object_key: self.object_key,
            }),
        }
    }
}

/// Counters shared between the executor and its workers.
#[derive(Debug, Default)]
struct PoolStats {
    queued: AtomicUsize,
    busy: AtomicUsize,
}

/// Bounded pool of upload workers.
pub struct UploadExecutor {
    sender: StdMutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    /// Flips to `true` once every worker has been joined.
    drained: watch::Sender<bool>,
    stats: Arc<PoolStats>,
    max_workers: usize,
}

impl UploadExecutor {
    /// Spawn `max_workers` workers (at least one) on the current tokio runtime.
    pub fn start(max_workers: usize, client: Arc<RetryingClient>) -> Self {
        let max_workers = max_workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let queue = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(max_workers);
        for worker_id in 0..max_workers {
            let span = info_span!("object_store_operation_worker", worker = worker_id);
            workers.push(tokio::spawn(
                worker_loop(
                    Arc::clone(&queue),
                    Arc::clone(&client),
                    Arc::clone(&stats),
                )
                .instrument(span),
            ));
        }

        info!("Upload executor started with {} workers", max_workers);

        let (drained, _) = watch::channel(false);
        Self {
            sender: StdMutex::new(Some(sender)),
            workers: StdMutex::new(workers),
            drained,
            stats,
            max_workers,
        }
    }

    /// Queue a task.  Never drops a task: it either runs or this returns
    /// [`PublishError::ExecutorClosed`].
    pub fn submit(&self, task: PublishTask) -> Result<UploadHandle, PublishError> {
        let (reply, rx) = oneshot::channel();
        let object_key = task.object_key.clone();

        let guard = self
            .sender
            .lock()
            .map_err(|_| PublishError::ExecutorClosed)?;
        let sender = guard.as_ref().ok_or(PublishError::ExecutorClosed)?;

        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send((task, reply)).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PublishError::ExecutorClosed);
        }
        gauge!(UPLOAD_QUEUE_DEPTH).set(self.stats.queued.load(Ordering::SeqCst) as f64);

        Ok(UploadHandle { object_key, rx })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }

    /// Workers currently running a task.
    pub fn busy(&self) -> usize {
        self.stats.busy.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    /// Stop accepting tasks, finish everything already queued, and join
    /// the workers.  Every caller, including concurrent ones, returns only
    /// after the drain is complete.
    pub async fn shutdown(&self) {
        // Dropping the sender lets workers drain the queue, then exit.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        if workers.is_empty() {
            // Another caller owns the join; wait for it to finish.
            let mut drained = self.drained.subscribe();
            let _ = drained.wait_for(|done| *done).await;
            return;
        }

        info!(
            "Upload executor draining {} queued task(s)",
            self.queued()
        );
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Upload worker terminated abnormally: {}", e);
            }
        }
        self.drained.send_replace(true);
        info!("Upload executor shut down");
    }
}

async fn worker_loop(
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    client: Arc<RetryingClient>,
    stats: Arc<PoolStats>,
) {
    loop {
        // The lock is released as soon as a job is taken, so each job
        // reaches exactly one worker.
        let job = queue.lock().await.recv().await;
        let Some((mut task, reply)) = job else {
            break;
        };

        let depth = stats.queued.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!(UPLOAD_QUEUE_DEPTH).set(depth as f64);
        let busy = stats.busy.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!(UPLOAD_WORKERS_BUSY).set(busy as f64);

        // Each upload runs in its own task so a panicking client fails only
        // that upload and the worker keeps serving the queue.
        let object_key = task.object_key.clone();
        let upload_client = Arc::clone(&client);
        let upload =
            tokio::spawn(async move { upload_client.publish(&mut task).await }.in_current_span());
        let result = match upload.await {
            Ok(result) => result,
            Err(e) => Err(PublishError::UploadAborted {
                object_key: object_key.clone(),
                reason: e.to_string(),
            }),
        };
        match &result {
            Ok(receipt) => debug!(
                "upload of '{}' done after {} attempt(s)",
                receipt.object_key, receipt.attempts
            ),
            Err(e) => warn!("upload of '{}' failed: {}", object_key, e),
        }

        let busy = stats.busy.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!(UPLOAD_WORKERS_BUSY).set(busy as f64);

        // The producer may have dropped its handle; the outcome is logged above.
        let _ = reply.send(result);
    }
    debug!("upload worker exiting");
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::publish::retry::{Backoff, RetryPolicy};
    use crate::publish::testing::{ConcurrencyProbe, ScriptedClient};
    use crate::storage::client::{ObjectStoreClient, StorageFuture};
    use crate::storage::memory::MemoryObjectStoreClient;
    use bytes::Bytes;
    use std::time::Duration;

    fn retrying(client: Arc<dyn ObjectStoreClient>) -> Arc<RetryingClient> {
        let policy = RetryPolicy::new(
            3,
            Backoff::Fixed {
                delay: Duration::ZERO,
            },
        );
        Arc::new(RetryingClient::new(client, policy))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_worker_count() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(20)));
        let executor = UploadExecutor::start(3, retrying(probe.clone()));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                executor
                    .submit(PublishTask::new(format!("dcc-rl/{i}"), Bytes::from("x")))
                    .unwrap()
            })
            .collect();

        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(probe.completed(), 20);
        assert!(probe.max_in_flight() <= 3);
        assert_eq!(probe.max_in_flight(), 3);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_tasks() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(5)));
        let executor = UploadExecutor::start(2, retrying(probe.clone()));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                executor
                    .submit(PublishTask::new(format!("k{i}"), Bytes::from("x")))
                    .unwrap()
            })
            .collect();

        executor.shutdown().await;
        assert_eq!(probe.completed(), 10);
        assert_eq!(executor.queued(), 0);
        assert_eq!(executor.busy(), 0);

        for handle in handles {
            assert!(handle.wait().await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejected() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::ZERO));
        let executor = UploadExecutor::start(1, retrying(probe));
        executor.shutdown().await;

        assert!(executor.is_shut_down());
        let err = executor
            .submit(PublishTask::new("late", Bytes::from("x")))
            .unwrap_err();
        assert!(matches!(err, PublishError::ExecutorClosed));

        // A second shutdown is harmless.
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_reported_through_handle() {
        let scripted = Arc::new(ScriptedClient::always_failing(StorageError::rejected(
            "put_object",
            "malformed key",
        )));
        let executor = UploadExecutor::start(2, retrying(scripted.clone()));

        let handle = executor
            .submit(PublishTask::new("bad key", Bytes::from("x")))
            .unwrap();
        assert_eq!(handle.object_key(), "bad key");

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert_eq!(scripted.push_calls(), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_workers_clamped() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::ZERO));
        let executor = UploadExecutor::start(0, retrying(probe.clone()));
        assert_eq!(executor.max_workers(), 1);

        let receipt = executor
            .submit(PublishTask::new("k", Bytes::from("abc")))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(receipt.bytes, 3);
        assert_eq!(receipt.attempts, 1);
        executor.shutdown().await;
    }

    /// Memory client that panics when pushing one particular key.
    struct PanicsOnKey {
        inner: MemoryObjectStoreClient,
        poisoned_key: &'static str,
    }

    impl ObjectStoreClient for PanicsOnKey {
        fn push(&self, object_key: &str, payload: Bytes) -> StorageFuture<'_, ()> {
            if object_key == self.poisoned_key {
                panic!("store client bug on '{object_key}'");
            }
            self.inner.push(object_key, payload)
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

    #[tokio::test]
    async fn test_panicking_upload_does_not_lose_queued_tasks() {
        let client = Arc::new(PanicsOnKey {
            inner: MemoryObjectStoreClient::new("dcc-rl"),
            poisoned_key: "dcc-rl/boom",
        });
        // A single worker: if it died, every later task would be lost.
        let executor = UploadExecutor::start(1, retrying(client.clone()));

        let bad = executor
            .submit(PublishTask::new("dcc-rl/boom", Bytes::from("x")))
            .unwrap();
        let healthy: Vec<_> = (0..3)
            .map(|i| {
                executor
                    .submit(PublishTask::new(format!("dcc-rl/ok{i}"), Bytes::from("x")))
                    .unwrap()
            })
            .collect();

        let err = bad.wait().await.unwrap_err();
        assert!(
            matches!(&err, PublishError::UploadAborted { object_key, .. } if object_key == "dcc-rl/boom"),
            "unexpected error: {err:?}"
        );
        for handle in healthy {
            handle.wait().await.unwrap();
        }
        assert_eq!(client.inner.len().await, 3);
        assert_eq!(executor.busy(), 0);

        // The pool is still serving after the panic.
        executor
            .submit(PublishTask::new("dcc-rl/after", Bytes::from("x")))
            .unwrap()
            .wait()
            .await
            .unwrap();
        executor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_shutdown_waits_for_drain() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(300)));
        let executor = Arc::new(UploadExecutor::start(1, retrying(probe.clone())));
        let handle = executor
            .submit(PublishTask::new("dcc-rl/slow", Bytes::from("x")))
            .unwrap();

        // Let the worker pick the task up before anyone shuts down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.busy(), 1);

        let first = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move { executor.shutdown().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.shutdown().await;
        assert_eq!(executor.busy(), 0);
        assert_eq!(probe.completed(), 1);

        first.await.unwrap();
        assert!(handle.wait().await.is_ok());

        // Once drained, later calls return straight away.
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_depth_tracks_waiting_tasks() {
        let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(100)));
        let executor = UploadExecutor::start(1, retrying(probe.clone()));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                executor
                    .submit(PublishTask::new(format!("dcc-rl/{i}"), Bytes::from("x")))
                    .unwrap()
            })
            .collect();
        assert_eq!(executor.queued(), 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(executor.busy(), 1);
        assert_eq!(executor.queued(), 2);

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(executor.queued(), 0);
        executor.shutdown().await;
    }
}
