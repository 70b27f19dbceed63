//! In-memory object store client.
//!
//! Objects are held in a `tokio::sync::RwLock<BTreeMap<...>>`, so prefix
//! listings come back in key order.  Used by tests and by the `memory`
//! backend for dry runs.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::client::{ObjectStoreClient, StorageFuture};
use crate::errors::StorageError;

/// A stored object's data plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Raw bytes of the object.
    pub data: Bytes,
    /// Hex-encoded SHA-256 of `data`.
    pub content_hash: String,
}

/// Process-local object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStoreClient {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    list_path: String,
}

impl MemoryObjectStoreClient {
    pub fn new(list_path: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            list_path: list_path.into(),
        }
    }

    /// Read back an object.
    pub async fn get(&self, object_key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(object_key).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn compute_content_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

impl ObjectStoreClient for MemoryObjectStoreClient {
    fn push(&self, object_key: &str, payload: Bytes) -> StorageFuture<'_, ()> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            if object_key.is_empty() {
                return Err(StorageError::rejected("put_object", "object key is empty"));
            }

            let content_hash = Self::compute_content_hash(&payload);
            self.objects.write().await.insert(
                object_key,
                StoredObject {
                    data: payload,
                    content_hash,
                },
            );
            Ok(())
        })
    }

    fn exists(&self, object_key: &str) -> StorageFuture<'_, bool> {
        let object_key = object_key.to_string();
        Box::pin(async move { Ok(self.objects.read().await.contains_key(&object_key)) })
    }

    fn list_keys(&self, prefix: &str) -> StorageFuture<'_, Vec<String>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    fn delete(&self, object_key: &str) -> StorageFuture<'_, ()> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            self.objects.write().await.remove(&object_key);
            Ok(())
        })
    }

    fn list_path(&self) -> &str {
        &self.list_path
    }
}

// -- Tests -------------------------------------------------------------------
