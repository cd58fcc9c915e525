//! Index persistence on top of `object_store` (in-memory, local disk, S3/MinIO).

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};

/// Durable key-value byte storage for serialized collection indexes.
///
/// `store` must replace the value atomically: a reader sees either the old
/// or the new bytes, never a torn write.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Read the bytes stored under `key`, if any.
    async fn load(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Atomically replace the bytes stored under `key`.
    async fn store(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Configuration for an S3/MinIO backed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "fmrc-index".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }
}

/// Where a collection index is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local, lost on exit
    #[default]
    Memory,
    /// Directory on the local filesystem
    Local { root: std::path::PathBuf },
    /// S3-compatible object storage
    S3(ObjectStorageConfig),
}

impl StoreBackend {
    /// Build the store for this backend.
    pub fn build(&self) -> StoreResult<ObjectIndexStore> {
        match self {
            StoreBackend::Memory => Ok(ObjectIndexStore::in_memory()),
            StoreBackend::Local { root } => ObjectIndexStore::local(root),
            StoreBackend::S3(config) => ObjectIndexStore::s3(config),
        }
    }
}

/// [`IndexStore`] backed by any `object_store` implementation.
pub struct ObjectIndexStore {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectIndexStore {
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    /// Store kept in process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    /// Store rooted at a local directory, created if missing.
    ///
    /// Writes go to a staging file that is renamed into place.
    pub fn local(root: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
            StoreError::Backend(format!("Failed to open {}: {}", root.display(), e))
        })?;

        Ok(Self::new(Arc::new(store), format!("file://{}", root.display())))
    }

    /// Store in an S3/MinIO bucket.
    pub fn s3(config: &ObjectStorageConfig) -> StoreResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StoreError::Backend(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self::new(Arc::new(store), format!("s3://{}", config.bucket)))
    }
}

#[async_trait]
impl IndexStore for ObjectIndexStore {
    #[instrument(skip(self), fields(store = %self.label, key = %key))]
    async fn load(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let location = Path::from(key);

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                debug!("No stored object");
                return Ok(None);
            }
            Err(e) => {
                return Err(StoreError::Backend(format!("Failed to read {}: {}", key, e)));
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(Some(bytes))
    }

    #[instrument(skip(self, data), fields(store = %self.label, key = %key))]
    async fn store(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let location = Path::from(key);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to write {}: {}", key, e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let location = Path::from(key);

        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::Backend(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
