//! Object store access.
//!
//! The [`client::ObjectStoreClient`] trait abstracts over the remote
//! store.  [`s3::S3ObjectStoreClient`] talks to any S3-compatible service;
//! [`memory::MemoryObjectStoreClient`] keeps objects in process for tests
//! and dry runs.

pub mod client;
pub mod credentials;
pub mod endpoint;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use crate::config::{ObjectStoreConfig, PublishingConfig};
use client::ObjectStoreClient;

/// Build the configured client.  Called once at process start.
pub async fn build_client(
    store: &ObjectStoreConfig,
    publishing: &PublishingConfig,
) -> anyhow::Result<Arc<dyn ObjectStoreClient>> {
    let client: Arc<dyn ObjectStoreClient> = match store.backend.as_str() {
        "memory" => Arc::new(memory::MemoryObjectStoreClient::new(
            publishing.list_path.clone(),
        )),
        _ => Arc::new(s3::S3ObjectStoreClient::new(store, publishing.list_path.clone()).await?),
    };
    Ok(client)
}
