//! S3-compatible object store client.
//!
//! Wraps the AWS SDK client with static credentials and an explicit
//! endpoint, so it works against MinIO, Ceph or AWS alike.  All objects
//! land in a single bucket; callers supply full object keys.
//!
//! The SDK's own retry loop is disabled.  Retrying belongs to
//! [`crate::publish::retry`], which needs every failure classified here
//! as transient or permanent.

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::Engine;
use bytes::Bytes;
use md5::{Digest, Md5};
use sha2::Sha256;
use tracing::{debug, info};

use super::client::{ObjectStoreClient, StorageFuture};
use super::credentials::CredentialProvider;
use super::endpoint::StorageEndpoint;
use crate::config::ObjectStoreConfig;
use crate::errors::StorageError;

/// User-metadata entry carrying the hex SHA-256 of the payload.
pub const CONTENT_HASH_METADATA: &str = "content-sha256";

/// Client for an S3-compatible store.
pub struct S3ObjectStoreClient {
    /// AWS S3 SDK client.
    client: Client,
    /// Target bucket.
    bucket: String,
    /// Category prefix this client publishes under.
    list_path: String,
}

impl S3ObjectStoreClient {
    /// Create a client from configuration.
    ///
    /// Credentials come only from the configured key pair; the ambient
    /// AWS credential chain is not consulted.
    pub async fn new(config: &ObjectStoreConfig, list_path: String) -> anyhow::Result<Self> {
        if config.bucket.is_empty() {
            anyhow::bail!("object_store.bucket must not be empty");
        }

        let credentials = CredentialProvider::new(&config.access_key, &config.secret_key);
        let endpoint = StorageEndpoint::new(&config.endpoint, config.port);

        let mut timeouts = TimeoutConfig::builder();
        if let Some(timeout) = config.attempt_timeout() {
            timeouts = timeouts.operation_attempt_timeout(timeout);
        }

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(endpoint.url())
            .credentials_provider(credentials.credentials())
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts.build())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        info!(
            "S3 object store client initialized: endpoint={} bucket={} region={} list_path='{}'",
            endpoint, config.bucket, config.region, list_path
        );

        Ok(Self::from_conf(s3_config, config.bucket.clone(), list_path))
    }

    /// Wrap an already built SDK configuration.
    pub fn from_conf(conf: aws_sdk_s3::Config, bucket: String, list_path: String) -> Self {
        Self {
            client: Client::from_conf(conf),
            bucket,
            list_path,
        }
    }

    /// Base64 MD5 digest, as the `Content-MD5` header expects.
    fn content_md5(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }

    /// Hex SHA-256 digest stored alongside the object.
    fn content_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

/// Map an SDK failure onto the transient/permanent split.
fn classify<E>(operation: &'static str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            StorageError::transport(operation, message)
        }
        SdkError::DispatchFailure(failure) if failure.is_user() => {
            StorageError::rejected(operation, message)
        }
        SdkError::DispatchFailure(_) => StorageError::transport(operation, message),
        SdkError::ServiceError(service) => StorageError::from_response(
            operation,
            Some(service.raw().status().as_u16()),
            service.err().code(),
            message,
        ),
        _ => StorageError::rejected(operation, message),
    }
}

impl ObjectStoreClient for S3ObjectStoreClient {
    fn push(&self, object_key: &str, payload: Bytes) -> StorageFuture<'_, ()> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let content_md5 = Self::content_md5(&payload);
            let content_sha256 = Self::content_sha256(&payload);
            let length = payload.len();

            debug!(
                "S3 put_object: bucket={} key={} bytes={}",
                self.bucket, object_key, length
            );

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .content_md5(content_md5)
                .content_length(length as i64)
                .metadata(CONTENT_HASH_METADATA, content_sha256)
                .body(ByteStream::from(payload))
                .send()
                .await
                .map_err(|e| classify("put_object", e))?;

            Ok(())
        })
    }

    fn exists(&self, object_key: &str) -> StorageFuture<'_, bool> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            debug!("S3 head_object: bucket={} key={}", self.bucket, object_key);

            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(SdkError::ServiceError(service)) if service.err().is_not_found() => Ok(false),
                Err(e) => Err(classify("head_object", e)),
            }
        })
    }

    fn list_keys(&self, prefix: &str) -> StorageFuture<'_, Vec<String>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            debug!("S3 list_objects_v2: bucket={} prefix={}", self.bucket, prefix);

            let mut keys = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix);

                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| classify("list_objects_v2", e))?;

                keys.extend(
                    resp.contents()
                        .iter()
                        .filter_map(|obj| obj.key().map(str::to_string)),
                );

                match (resp.is_truncated(), resp.next_continuation_token()) {
                    (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                    _ => break,
                }
            }

            Ok(keys)
        })
    }

    fn delete(&self, object_key: &str) -> StorageFuture<'_, ()> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            debug!("S3 delete_object: bucket={} key={}", self.bucket, object_key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
                .map_err(|e| classify("delete_object", e))?;

            Ok(())
        })
    }

    fn list_path(&self) -> &str {
        &self.list_path
    }
}

// -- Tests -------------------------------------------------------------------
