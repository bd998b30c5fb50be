//! S3-compatible object storage access

use crate::config::{Credentials, StorageConfig};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::Client as S3Client;
use modelgate_core::{Error, Result, StorageLocation};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Read access to an object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the object at `location` into the file `dest`.
    ///
    /// Returns the number of bytes written. Fails with `NotFound` when the
    /// object does not exist and `Fetch` on any other failure.
    async fn download(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<u64>;

    /// List object keys under `location.key` treated as a directory prefix
    async fn list(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>>;
}

type ClientKey = (Option<String>, Option<Credentials>);

/// Object store backed by the AWS SDK, usable with MinIO and other
/// S3-compatible services.
pub struct S3ObjectStore {
    config: StorageConfig,
    clients: parking_lot::Mutex<HashMap<ClientKey, S3Client>>,
}

impl S3ObjectStore {
    /// Create a new store from storage configuration
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            clients: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Get or build a client for an endpoint and credential pair
    async fn client(&self, endpoint: Option<&str>, credentials: Option<&Credentials>) -> S3Client {
        let endpoint = endpoint
            .map(str::to_string)
            .or_else(|| self.config.endpoint_url.clone());
        let key = (endpoint.clone(), credentials.cloned());

        if let Some(client) = self.clients.lock().get(&key) {
            return client.clone();
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.config.region.clone()));
        if let Some(credentials) = credentials {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                None,
                None,
                "modelgate",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.config.force_path_style);
        if let Some(endpoint) = &endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::debug!(
            "Created S3 client for endpoint {}",
            endpoint.as_deref().unwrap_or("<default>")
        );
        let client = S3Client::from_conf(builder.build());
        self.clients.lock().insert(key, client.clone());
        client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn download(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<u64> {
        let client = self.client(location.endpoint.as_deref(), credentials).await;

        let output = client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map_or(false, |service| service.is_no_such_key())
                    || is_not_found_status(&e);
                if missing {
                    Error::not_found(format!("object {} does not exist", location))
                } else {
                    Error::fetch(format!(
                        "Failed to get {}: {}",
                        location,
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        let mut body = output.body;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| Error::fetch(format!("Failed to read body of {}: {}", location, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn list(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>> {
        let client = self.client(location.endpoint.as_deref(), credentials).await;
        let prefix = format!("{}/", location.key.trim_end_matches('/'));

        let mut keys = Vec::new();
        let mut pages = client
            .list_objects_v2()
            .bucket(&location.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                if is_not_found_status(&e) {
                    Error::not_found(format!("bucket {} does not exist", location.bucket))
                } else {
                    Error::fetch(format!(
                        "Failed to list {}: {}",
                        location,
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );
        }

        Ok(keys)
    }
}

fn is_not_found_status<E>(err: &SdkError<E>) -> bool {
    err.raw_response()
        .map_or(false, |response| response.status().as_u16() == 404)
}
