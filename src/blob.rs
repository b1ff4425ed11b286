use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{DashboardError, DashboardResult};

/// Stores call recordings and hands back a URL to reach them.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> DashboardResult<String>;

    async fn remove(&self, name: &str) -> DashboardResult<()>;
}

/// A recording that made it into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecording {
    pub name: String,
    pub url: String,
}

/// Writes blobs under a directory and serves them from `public_base_url`.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> DashboardResult<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DashboardError::Upload(format!("{}: {e}", self.root.display())))?;
        let target = self.root.join(name);
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| DashboardError::Upload(format!("{}: {e}", target.display())))?;
        Ok(format!("{}/{name}", self.public_base_url.trim_end_matches('/')))
    }

    async fn remove(&self, name: &str) -> DashboardResult<()> {
        let target = self.root.join(name);
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| DashboardError::Upload(format!("{}: {e}", target.display())))
    }
}

/// `<uuid>.<ext>`, keeping the source file's extension when it has one.
pub fn unique_name(source: &Path) -> String {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", Uuid::new_v4(), ext.to_lowercase()),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Reads `source` and uploads it. A failure is logged and yields `None`, so
/// the evaluation can still be saved without a recording.
pub async fn upload_recording(store: &dyn BlobStore, source: &Path) -> Option<StoredRecording> {
    let bytes = match tokio::fs::read(source).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(path = %source.display(), %error, "Could not read audio file");
            return None;
        }
    };

    let name = unique_name(source);
    match store.upload(&name, bytes).await {
        Ok(url) => {
            tracing::info!(%url, "Audio uploaded");
            Some(StoredRecording { name, url })
        }
        Err(error) => {
            tracing::warn!(%error, "Audio upload failed, saving evaluation without it");
            None
        }
    }
}

/// Drops a recording whose evaluation was never saved. Failure only warns.
pub async fn discard_recording(store: &dyn BlobStore, recording: &StoredRecording) {
    match store.remove(&recording.name).await {
        Ok(()) => tracing::info!(url = %recording.url, "Unreferenced audio removed"),
        Err(error) => tracing::warn!(url = %recording.url, %error, "Could not remove audio"),
    }
}
