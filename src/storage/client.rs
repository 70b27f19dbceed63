//! Object store client contract.
//!
//! Every publishing path talks to the store through [`ObjectStoreClient`].
//! Implementations are shared across upload workers behind an `Arc`, so
//! they must not hold per-call mutable state.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

use crate::errors::StorageError;

/// Boxed future returned by every client operation.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Async object store contract.
pub trait ObjectStoreClient: Send + Sync + 'static {
    /// Upload `payload` to `object_key`, overwriting any existing object.
    fn push(&self, object_key: &str, payload: Bytes) -> StorageFuture<'_, ()>;

    /// Check whether an object exists at `object_key`.
    fn exists(&self, object_key: &str) -> StorageFuture<'_, bool>;

    /// All keys starting with `prefix`.  Every page is fetched before
    /// this resolves.
    fn list_keys(&self, prefix: &str) -> StorageFuture<'_, Vec<String>>;

    /// Delete the object at `object_key`.  A missing key is not an error.
    fn delete(&self, object_key: &str) -> StorageFuture<'_, ()>;

    /// Prefix of the artifact category this client publishes under.
    fn list_path(&self) -> &str;
}
