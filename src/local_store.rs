//! Reference [`LocalStore`] backed by a content-addressed directory tree.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::instrument;

use crate::error::FileSyncError;
use crate::traits::LocalStore;

/// Filesystem-backed local blob cache rooted at a single directory.
///
/// Paths passed to its methods are relative to `root` and are expected to
/// already be content-addressed (`files/<hash prefix>/<hash>`), as produced
/// by [`crate::crud::FileCrud`].
#[derive(Debug, Clone)]
pub struct FsLocalStore {
    root: PathBuf,
}

impl FsLocalStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FileSyncError> {
        let candidate = self.root.join(path);
        if candidate.components().any(|c| c == std::path::Component::ParentDir) {
            return Err(FileSyncError::LocalStore(format!(
                "refusing to resolve path outside store root: {path}"
            )));
        }
        Ok(candidate)
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    #[instrument(skip(self, bytes))]
    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), FileSyncError> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FileSyncError::LocalStore(e.to_string()))?;
        }
        let tmp_path = full_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| FileSyncError::LocalStore(e.to_string()))?;
        tokio::fs::rename(&tmp_path, &full_path)
            .await
            .map_err(|e| FileSyncError::LocalStore(e.to_string()))?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FileSyncError> {
        let full_path = self.resolve(path)?;
        tokio::fs::read(&full_path)
            .await
            .map_err(|e| FileSyncError::LocalStore(e.to_string()))
    }

    async fn file_exists(&self, path: &str) -> Result<bool, FileSyncError> {
        let full_path = self.resolve(path)?;
        Ok(tokio::fs::metadata(&full_path).await.is_ok())
    }

    async fn delete_file(&self, path: &str) -> Result<(), FileSyncError> {
        let full_path = self.resolve(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileSyncError::LocalStore(e.to_string())),
        }
    }

    async fn list_files(&self, root: &str) -> Result<Vec<String>, FileSyncError> {
        let full_root = self.resolve(root)?;
        let mut entries = Vec::new();
        let mut stack = vec![full_root.clone()];
        while let Some(dir) = stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(FileSyncError::LocalStore(e.to_string())),
            };
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| FileSyncError::LocalStore(e.to_string()))?
            {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    entries.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn get_file_url(&self, path: &str) -> String {
        format!("file://{}", self.root.join(path).display())
    }
}

#[must_use]
pub fn content_addressed_path(content_hash: &str) -> String {
    let prefix = &content_hash[..content_hash.len().min(2)];
    format!("files/{prefix}/{content_hash}")
}
