use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{error, info};

use crate::BlobStore;

/// Filesystem-backed blob store (§4.9). Writes are atomic: bytes land in a
/// sibling temp file first and are then renamed into place, so a reader
/// never observes a partially written artifact even under at-least-once
/// re-execution of the same `task_id` (§5).
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        info!(path = %base_path.display(), "Using local blob storage");
        Ok(Self { base_path })
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload_bytes(&self, data: Vec<u8>, key: &str, _content_type: &str) -> anyhow::Result<String> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_sibling(&path);
        fs::write(&tmp_path, &data).await?;
        fs::rename(&tmp_path, &path).await?;
        info!(path = %path.display(), "Saved file locally");
        Ok(path.display().to_string())
    }

    async fn download_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.resolve(key);
        match fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!(path = %path.display(), ?err, "File not found");
                None
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let path = self.resolve(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Deleted local file");
                true
            }
            Err(_) => false,
        }
    }

    async fn get_url(&self, key: &str, _expires_in_secs: u64) -> String {
        self.resolve(key).display().to_string()
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    path.with_file_name(format!(".{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        let url = store.upload_bytes(b"hello".to_vec(), "results/a.png", "image/png").await.unwrap();
        assert!(url.ends_with("results/a.png"));

        let data = store.download_bytes("results/a.png").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn nested_key_creates_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        store.upload_bytes(b"x".to_vec(), "a/b/c.bin", "application/octet-stream").await.unwrap();
        assert!(dir.path().join("a/b/c.bin").exists());
    }

    #[tokio::test]
    async fn download_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        assert!(store.download_bytes("nope").await.is_none());
    }

    #[tokio::test]
    async fn delete_missing_key_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        assert!(!store.delete("nope").await);
    }

    #[tokio::test]
    async fn delete_existing_key_returns_true() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        store.upload_bytes(b"x".to_vec(), "k", "application/octet-stream").await.unwrap();
        assert!(store.delete("k").await);
        assert!(store.download_bytes("k").await.is_none());
    }
}
