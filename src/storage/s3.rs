//! S3-compatible object storage (MinIO, AWS).

use std::ops::Range;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, trace};

use super::{clamp, is_under, normalize, Storage, StorageError, StorageResult};

/// Objects in one bucket of an S3-compatible store.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Connect to a MinIO-style endpoint with static credentials.
    pub async fn connect(
        endpoint: &str,
        access_id: &str,
        access_key: &str,
        bucket: &str,
    ) -> StorageResult<Self> {
        let credentials = Credentials::new(access_id, access_key, None, None, "mrlite");
        let shared = aws_config::from_env()
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .load()
            .await;
        // MinIO serves buckets as paths, not subdomains
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();
        let storage = Self::new(Client::from_conf(config), bucket);
        storage.ensure_bucket().await?;
        Ok(storage)
    }

    /// Create the bucket if it does not exist yet.
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| StorageError::unavailable(&self.bucket, err))?;
        let present = resp
            .buckets()
            .iter()
            .any(|bucket| bucket.name() == Some(self.bucket.as_str()));
        if !present {
            debug!(bucket = %self.bucket, "creating bucket");
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|err| StorageError::unavailable(&self.bucket, err))?;
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> StorageResult<Option<u64>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(StorageError::unavailable(key, err)),
        }
    }

    async fn get(&self, key: &str, range: Option<String>) -> StorageResult<Bytes> {
        trace!(bucket = %self.bucket, key, ?range, "get object");
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::unavailable(key, err)
                }
            })?;
        let body = object
            .body
            .collect()
            .await
            .map_err(|err| StorageError::unavailable(key, err))?;
        Ok(body.into_bytes())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::unavailable(key, err))?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str, limit: Option<i32>) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_max_keys(limit)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StorageError::unavailable(prefix, err))?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
            if limit.is_some_and(|limit| keys.len() >= limit as usize) {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn open(&self, name: &str) -> StorageResult<Bytes> {
        self.get(&normalize(name), None).await
    }

    async fn open_range(&self, name: &str, range: Range<u64>) -> StorageResult<Bytes> {
        let key = normalize(name);
        let len = self
            .head(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        let (start, end) = clamp(range, len);
        if start == end {
            return Ok(Bytes::new());
        }
        self.get(&key, Some(format!("bytes={}-{}", start, end - 1))).await
    }

    async fn put(&self, name: &str, data: Bytes) -> StorageResult<()> {
        let key = normalize(name);
        trace!(bucket = %self.bucket, key, bytes = data.len(), "put object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StorageError::unavailable(key, err))?;
        Ok(())
    }

    async fn delete(&self, name: &str, recursive: bool) -> StorageResult<()> {
        let key = normalize(name);
        if recursive {
            let keys = self.list(&key).await?;
            if keys.is_empty() {
                return Err(StorageError::NotFound(key));
            }
            for object in keys {
                self.remove(&object).await?;
            }
            return Ok(());
        }
        if self.head(&key).await?.is_some() {
            self.remove(&key).await
        } else if self.exists(&key).await? {
            Err(StorageError::NotEmpty(key))
        } else {
            Err(StorageError::NotFound(key))
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = normalize(prefix);
        let mut keys: Vec<String> = self
            .list_keys(&prefix, None)
            .await?
            .into_iter()
            .filter(|key| is_under(key, &prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let key = normalize(name);
        if self.head(&key).await?.is_some() {
            return Ok(true);
        }
        let children = self.list_keys(&format!("{key}/"), Some(1)).await?;
        Ok(!children.is_empty())
    }

    async fn len(&self, name: &str) -> StorageResult<u64> {
        let key = normalize(name);
        self.head(&key).await?.ok_or(StorageError::NotFound(key))
    }
}
