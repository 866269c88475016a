use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use pkg_types::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Raw config-file text kept in an object store, keyed
/// `<project_id>/<uuid>-<filename>`.
#[derive(Clone)]
pub struct ManifestArchive {
    store: Arc<dyn ObjectStore>,
}

fn store_error(what: &str, path: &str, e: object_store::Error) -> CoreError {
    match e {
        object_store::Error::NotFound { .. } => CoreError::NotFound(format!("archive object {} not found", path)),
        other => CoreError::Transient(format!("archive {} {} failed: {}", what, path, other)),
    }
}

impl ManifestArchive {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Archive rooted at a local directory, created if missing.
    pub fn local(dir: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create archive directory {}: {}", dir, e))?;
        let store = LocalFileSystem::new_with_prefix(dir)
            .map_err(|e| anyhow::anyhow!("Failed to open archive directory {}: {}", dir, e))?;
        info!("Manifest archive at {}", dir);
        Ok(Self::new(Arc::new(store)))
    }

    /// Archive in an S3-compatible bucket such as MinIO.
    pub fn s3(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        use_ssl: bool,
    ) -> anyhow::Result<Self> {
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else if use_ssl {
            format!("https://{}", endpoint)
        } else {
            format!("http://{}", endpoint)
        };
        let store = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_bucket_name(bucket)
            .with_region("us-east-1")
            .with_allow_http(!use_ssl)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure archive bucket {}: {}", bucket, e))?;
        info!("Manifest archive at {}/{}", endpoint, bucket);
        Ok(Self::new(Arc::new(store)))
    }

    /// Store `raw_text` under a fresh key and return the key.
    pub async fn put(&self, project_id: u64, filename: &str, raw_text: &str) -> CoreResult<String> {
        let path = format!("{}/{}-{}", project_id, uuid::Uuid::new_v4(), filename);
        self.put_at(&path, raw_text).await?;
        Ok(path)
    }

    /// Overwrite the object at `path`.
    pub async fn put_at(&self, path: &str, raw_text: &str) -> CoreResult<()> {
        self.store
            .put(&Path::from(path), PutPayload::from(raw_text.to_string()))
            .await
            .map_err(|e| store_error("put", path, e))?;
        debug!("Archived {} ({} bytes)", path, raw_text.len());
        Ok(())
    }

    pub async fn get(&self, path: &str) -> CoreResult<String> {
        let bytes = self
            .store
            .get(&Path::from(path))
            .await
            .map_err(|e| store_error("get", path, e))?
            .bytes()
            .await
            .map_err(|e| store_error("read", path, e))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("archive object {} is not UTF-8: {}", path, e)))
    }

    /// Remove the object; a missing object is success.
    pub async fn delete(&self, path: &str) -> CoreResult<()> {
        match self.store.delete(&Path::from(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(store_error("delete", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_overwrite_delete() {
        let archive = ManifestArchive::in_memory();
        let path = archive.put(3, "bundle.yaml", "kind: Pod").await.unwrap();
        assert!(path.starts_with("3/"));
        assert!(path.ends_with("-bundle.yaml"));
        assert_eq!(archive.get(&path).await.unwrap(), "kind: Pod");

        archive.put_at(&path, "kind: ConfigMap").await.unwrap();
        assert_eq!(archive.get(&path).await.unwrap(), "kind: ConfigMap");

        archive.delete(&path).await.unwrap();
        assert!(matches!(archive.get(&path).await, Err(CoreError::NotFound(_))));
        archive.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn local_directory_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ManifestArchive::local(dir.path().to_str().unwrap()).unwrap();
        let path = archive.put(1, "a.yaml", "x: 1").await.unwrap();
        assert_eq!(archive.get(&path).await.unwrap(), "x: 1");
    }
}
