//! Object-store client for backup artifacts.
//!
//! A thin trait over the handful of S3 operations the pipelines need, so
//! worker handlers stay testable with an in-memory implementation. The real
//! client uses path-style addressing whenever an endpoint override is
//! configured, for compatibility with non-AWS stores.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3SdkClient;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::StoreConfig;
use crate::error::ConfigError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store operation failed: {0}")]
    Operation(String),
}

/// The object-store operations the backup, restore and cleanup pipelines
/// are written against.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file as a single object.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError>;

    /// Download an object to a local file, returning the byte count.
    async fn get_to_file(&self, key: &str, path: &Path) -> Result<u64, StoreError>;

    /// Content length of an object.
    async fn head(&self, key: &str) -> Result<i64, StoreError>;

    /// All keys under a prefix, lexicographically ordered.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// The aws-sdk-s3 implementation.
pub struct S3Store {
    client: AwsS3SdkClient,
    bucket: String,
}

impl S3Store {
    /// Build a client from validated configuration. Validation failures are
    /// fatal startup errors.
    pub async fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "pgvault",
        );

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials);

        let endpoint = config.endpoint_url();
        if let Some(endpoint) = &endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if endpoint.is_some() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Ok(Self {
            client: AwsS3SdkClient::from_conf(s3_config_builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            StoreError::Operation(format!("failed to read {}: {}", path.display(), e))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Operation(format!("failed to put {}: {}", key, e)))?;

        Ok(())
    }

    async fn get_to_file(&self, key: &str, path: &Path) -> Result<u64, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = format!("failed to get {}: {}", key, e);
                if let aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_) =
                    e.into_service_error()
                {
                    StoreError::NotFound(key.to_owned())
                } else {
                    StoreError::Operation(message)
                }
            })?;

        let mut file = tokio::fs::File::create(path).await.map_err(|e| {
            StoreError::Operation(format!("failed to create {}: {}", path.display(), e))
        })?;

        let mut reader = output.body.into_async_read();
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| {
                StoreError::Operation(format!("failed to write {}: {}", path.display(), e))
            })?;
        file.flush().await.map_err(|e| {
            StoreError::Operation(format!("failed to flush {}: {}", path.display(), e))
        })?;

        Ok(written)
    }

    async fn head(&self, key: &str) -> Result<i64, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Operation(format!("failed to head {}: {}", key, e)))?;

        Ok(output.content_length().unwrap_or(0))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| StoreError::Operation(format!("failed to list {}: {}", prefix, e)))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_owned());
                }
            }
        }

        // S3 already lists lexicographically; keep the guarantee explicit
        // since retention depends on it.
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Operation(format!("failed to delete {}: {}", key, e)))?;

        Ok(())
    }
}
