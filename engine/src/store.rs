//! Storage collaborators.
//!
//! This module provides the seams the pipeline talks to:
//! - `SourceStore`: list, read, archive and delete objects in the source container
//! - `DestinationStore`: write and read back objects in the destination bucket
//!
//! and their `object_store` backed implementations (Azure Blob Storage for
//! the source and archive containers, Google Cloud Storage for the destination).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{MultipartId, ObjectStore};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::config::{AzureConnection, DestinationConfig, SourceConfig};
use crate::error::{EngineError, StoreError};
use crate::model::ObjectHandle;

/// Streamed object content.
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// The source container plus its archive container.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Name of the source container.
    fn container(&self) -> &str;

    /// List every object whose key starts with `prefix`.
    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectHandle, StoreError>>;

    /// Open a content stream for an object.
    async fn read(&self, handle: &ObjectHandle) -> Result<ByteStream, StoreError>;

    /// Copy an object into the archive container at `archive_path`.
    async fn copy_to_archive(&self, handle: &ObjectHandle, archive_path: &str)
        -> Result<(), StoreError>;

    /// Look up an object in the archive container.
    async fn head_archive(&self, archive_path: &str) -> Result<ObjectHandle, StoreError>;

    /// Remove an object from the source container.
    async fn delete(&self, handle: &ObjectHandle) -> Result<(), StoreError>;
}

/// The destination bucket.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Name of the destination bucket.
    fn bucket(&self) -> &str;

    /// Write `content` to `path`, replacing any existing object. Returns bytes written.
    async fn write(&self, path: &str, content: ByteStream) -> Result<u64, StoreError>;

    /// Open a content stream for an existing object.
    async fn read(&self, path: &str) -> Result<ByteStream, StoreError>;
}

/// Source and archive containers backed by `object_store`.
pub struct ObjectStoreSource {
    container_name: String,
    archive_name: String,
    container: Arc<dyn ObjectStore>,
    archive: Arc<dyn ObjectStore>,
}

impl ObjectStoreSource {
    pub fn new(
        container_name: impl Into<String>,
        container: Arc<dyn ObjectStore>,
        archive_name: impl Into<String>,
        archive: Arc<dyn ObjectStore>,
    ) -> Self {
        ObjectStoreSource {
            container_name: container_name.into(),
            archive_name: archive_name.into(),
            container,
            archive,
        }
    }

    /// Connect to the configured Azure source and archive containers.
    pub fn azure(config: &SourceConfig) -> Result<Self, EngineError> {
        let container = azure_container(&config.connection, &config.container)?;
        let archive = azure_container(&config.connection, &config.archive_container)?;
        Ok(Self::new(
            config.container.clone(),
            container,
            config.archive_container.clone(),
            archive,
        ))
    }
}

#[async_trait]
impl SourceStore for ObjectStoreSource {
    fn container(&self) -> &str {
        &self.container_name
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectHandle, StoreError>> {
        let prefix_path = Path::from(prefix);
        let prefix = prefix.to_string();
        let container = self.container_name.clone();
        self.container
            .list(Some(&prefix_path))
            .map(move |item| match item {
                Ok(meta) => Ok(ObjectHandle::new(
                    container.clone(),
                    meta.location.to_string(),
                    Some(meta.size as u64),
                )),
                Err(e) => Err(StoreError::backend("list", prefix.clone(), e)),
            })
            .boxed()
    }

    async fn read(&self, handle: &ObjectHandle) -> Result<ByteStream, StoreError> {
        read_stream(self.container.as_ref(), &handle.path).await
    }

    async fn copy_to_archive(
        &self,
        handle: &ObjectHandle,
        archive_path: &str,
    ) -> Result<(), StoreError> {
        let content = read_stream(self.container.as_ref(), &handle.path).await?;
        stream_into(self.archive.as_ref(), archive_path, content).await?;
        Ok(())
    }

    async fn head_archive(&self, archive_path: &str) -> Result<ObjectHandle, StoreError> {
        let meta = self
            .archive
            .head(&Path::from(archive_path))
            .await
            .map_err(|e| StoreError::backend("head", archive_path, e))?;
        Ok(ObjectHandle::new(
            self.archive_name.clone(),
            meta.location.to_string(),
            Some(meta.size as u64),
        ))
    }

    async fn delete(&self, handle: &ObjectHandle) -> Result<(), StoreError> {
        self.container
            .delete(&Path::from(handle.path.as_str()))
            .await
            .map_err(|e| StoreError::backend("delete", handle.path.as_str(), e))
    }
}

/// Destination bucket backed by `object_store`.
pub struct ObjectStoreDestination {
    bucket_name: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreDestination {
    pub fn new(bucket_name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        ObjectStoreDestination {
            bucket_name: bucket_name.into(),
            store,
        }
    }

    /// Connect to the configured GCS bucket with the inline service-account key.
    pub fn gcs(config: &DestinationConfig) -> Result<Self, EngineError> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(&config.bucket)
            .with_service_account_key(config.service_account_key.as_str())
            .build()
            .map_err(|source| EngineError::ClientSetup {
                store: "gcs",
                source,
            })?;
        Ok(Self::new(config.bucket.clone(), Arc::new(store)))
    }
}

#[async_trait]
impl DestinationStore for ObjectStoreDestination {
    fn bucket(&self) -> &str {
        &self.bucket_name
    }

    async fn write(&self, path: &str, content: ByteStream) -> Result<u64, StoreError> {
        stream_into(self.store.as_ref(), path, content).await
    }

    async fn read(&self, path: &str) -> Result<ByteStream, StoreError> {
        read_stream(self.store.as_ref(), path).await
    }
}

fn azure_container(
    connection: &AzureConnection,
    container: &str,
) -> Result<Arc<dyn ObjectStore>, EngineError> {
    let builder = match connection {
        AzureConnection::Emulator => MicrosoftAzureBuilder::new().with_use_emulator(true),
        AzureConnection::AccountKey { account, key } => MicrosoftAzureBuilder::new()
            .with_account(account)
            .with_access_key(key),
    };
    let store = builder
        .with_container_name(container)
        .build()
        .map_err(|source| EngineError::ClientSetup {
            store: "azure",
            source,
        })?;
    Ok(Arc::new(store))
}

async fn read_stream(store: &dyn ObjectStore, path: &str) -> Result<ByteStream, StoreError> {
    let result = store
        .get(&Path::from(path))
        .await
        .map_err(|e| StoreError::backend("get", path, e))?;
    let owned = path.to_string();
    Ok(result
        .into_stream()
        .map_err(move |e| StoreError::backend("read", owned.as_str(), e))
        .boxed())
}

/// Stream `content` into `path` via a multipart upload, aborting the upload on error.
async fn stream_into(
    store: &dyn ObjectStore,
    path: &str,
    mut content: ByteStream,
) -> Result<u64, StoreError> {
    let location = Path::from(path);
    let (upload_id, mut writer) = store
        .put_multipart(&location)
        .await
        .map_err(|e| StoreError::backend("put", path, e))?;

    let mut written = 0u64;
    loop {
        let chunk = match content.next().await {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                abort_upload(store, &location, &upload_id).await;
                return Err(e);
            }
        };
        if let Err(source) = writer.write_all(&chunk).await {
            abort_upload(store, &location, &upload_id).await;
            return Err(StoreError::Io {
                path: path.to_string(),
                source,
            });
        }
        written += chunk.len() as u64;
    }

    if let Err(source) = writer.shutdown().await {
        abort_upload(store, &location, &upload_id).await;
        return Err(StoreError::Io {
            path: path.to_string(),
            source,
        });
    }
    Ok(written)
}

async fn abort_upload(store: &dyn ObjectStore, location: &Path, upload_id: &MultipartId) {
    if let Err(e) = store.abort_multipart(location, upload_id).await {
        warn!(path = %location, error = %e, "failed to abort multipart upload");
    }
}
