//! File CRUD Facade: the surface application code actually calls — save,
//! update, delete, resolve a URL, notify of an out-of-band local change,
//! and retry failures. Everything here commits to the catalog first and
//! queues the resulting transfer second, so a crash between the two just
//! means the reconciler's next bootstrap pass picks up the slack.

use std::sync::Arc;

use tracing::instrument;

use crate::error::FileSyncError;
use crate::executor::TransferExecutor;
use crate::hash::hash_bytes;
use crate::local_store::content_addressed_path;
use crate::model::{FileId, FileRecord, TransferDirection, TransferStatus};
use crate::observation::{Observation, ObservationEmitter};
use crate::preprocessor::PreprocessorRegistry;
use crate::state::LocalFileStateStore;
use crate::traits::{Catalog, LocalStore, RemoteStore};

pub struct FileCrud {
    catalog: Arc<dyn Catalog>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    state: Arc<LocalFileStateStore>,
    executor: Arc<TransferExecutor>,
    observer: Arc<ObservationEmitter>,
    preprocessors: Arc<PreprocessorRegistry>,
    /// Whether [`Self::resolve_file_url`] should bump a remote-only file's
    /// download to the front of the queue. Disabled lets a caller that
    /// resolves URLs in bulk (e.g. rendering a gallery) avoid stampeding the
    /// executor with priority bumps for files nobody has actually opened.
    auto_prioritize_on_resolve: bool,
}

impl FileCrud {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        state: Arc<LocalFileStateStore>,
        executor: Arc<TransferExecutor>,
        observer: Arc<ObservationEmitter>,
        preprocessors: Arc<PreprocessorRegistry>,
        auto_prioritize_on_resolve: bool,
    ) -> Self {
        Self {
            catalog,
            local,
            remote,
            state,
            executor,
            observer,
            preprocessors,
            auto_prioritize_on_resolve,
        }
    }

    /// Creates a new catalog record for `bytes`, writes the (preprocessed)
    /// bytes to the content-addressed local store, and queues the upload.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError`] if preprocessing, the local write, or the
    /// catalog commit fails.
    #[instrument(skip(self, bytes))]
    pub async fn save_file(
        &self,
        file_id: FileId,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<FileRecord, FileSyncError> {
        let processed = self.preprocessors.process(&file_id, mime, bytes).await?;
        let content_hash = hash_bytes(&processed);
        let path = content_addressed_path(&content_hash);

        self.local.write_file(&path, &processed).await?;
        let record = self
            .catalog
            .commit_file_created(&file_id, &path, &content_hash)
            .await?;

        self.state
            .atomic_update(&file_id, &path, |entry| {
                entry.path = path.clone();
                entry.local_hash = content_hash.clone();
            })
            .await?;
        self.state
            .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::Queued)
            .await?;
        self.state
            .set_transfer_status(&file_id, TransferDirection::Download, TransferStatus::Done)
            .await?;
        self.executor.enqueue_upload(file_id).await;

        Ok(record)
    }

    /// Replaces the content of an existing catalog record and queues the
    /// upload of the new bytes. A no-op if the new content hashes the same
    /// as what's already on record. Clears the old remote key, since it no
    /// longer points at the current content, and cleans up the old local
    /// bytes and remote blob once nothing references them.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError::FileNotFound`] if `file_id` doesn't exist, or
    /// [`FileSyncError`] if preprocessing, the local write, or the catalog
    /// commit fails.
    #[instrument(skip(self, bytes))]
    pub async fn update_file(
        &self,
        file_id: &FileId,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<FileRecord, FileSyncError> {
        let existing = self
            .catalog
            .get_file(file_id)
            .await?
            .ok_or_else(|| FileSyncError::FileNotFound(file_id.clone()))?;

        let processed = self.preprocessors.process(file_id, mime, bytes).await?;
        let content_hash = hash_bytes(&processed);
        if content_hash == existing.content_hash {
            return Ok(existing);
        }
        let path = content_addressed_path(&content_hash);

        self.local.write_file(&path, &processed).await?;
        let record = self
            .catalog
            .commit_file_updated(file_id, &path, &content_hash, None)
            .await?;

        self.state
            .atomic_update(file_id, &path, |entry| {
                entry.path = path.clone();
                entry.local_hash = content_hash.clone();
            })
            .await?;
        self.state
            .set_transfer_status(file_id, TransferDirection::Upload, TransferStatus::Queued)
            .await?;
        self.state
            .set_transfer_status(file_id, TransferDirection::Download, TransferStatus::Done)
            .await?;
        self.executor.enqueue_upload(file_id.clone()).await;

        if existing.path != path {
            let _ = self.local.delete_file(&existing.path).await;
        }
        if existing.has_remote_key() {
            let _ = self.remote.delete(&existing.remote_key).await;
        }

        Ok(record)
    }

    /// Tombstones the catalog record, drops the locally cached bytes and the
    /// remote blob, and cancels any in-flight download.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError`] if the catalog commit fails.
    #[instrument(skip(self))]
    pub async fn delete_file(&self, file_id: &FileId) -> Result<(), FileSyncError> {
        self.executor.cancel_download(file_id).await;

        let record = self.catalog.get_file(file_id).await?;
        if let Some(record) = &record {
            if !record.path.is_empty() {
                let _ = self.local.delete_file(&record.path).await;
            }
            if record.has_remote_key() {
                let _ = self.remote.delete(&record.remote_key).await;
            }
        }

        self.catalog.commit_file_deleted(file_id).await?;
        self.state.remove(file_id).await?;
        Ok(())
    }

    /// Returns a URL usable right now: the local store's, if the bytes are
    /// already cached with matching content, otherwise the remote's — and,
    /// if [`auto_prioritize_on_resolve`](Self::new) is set, bumps the
    /// pending download to the front of the queue so the local copy catches
    /// up quickly.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError::FileNotFound`] if the record doesn't exist
    /// or no copy (local or remote) is available yet.
    #[instrument(skip(self))]
    pub async fn resolve_file_url(&self, file_id: &FileId) -> Result<String, FileSyncError> {
        let record = self
            .catalog
            .get_file(file_id)
            .await?
            .ok_or_else(|| FileSyncError::FileNotFound(file_id.clone()))?;

        let locally_cached = self
            .state
            .get(file_id)
            .await
            .is_some_and(|entry| !entry.local_hash.is_empty() && entry.local_hash == record.content_hash);

        if locally_cached {
            return Ok(self.local.get_file_url(&record.path));
        }

        if record.has_remote_key() {
            if self.auto_prioritize_on_resolve {
                self.executor.prioritize_download(file_id).await;
            }
            return Ok(self.remote.get_download_url(&record.remote_key));
        }

        Err(FileSyncError::FileNotFound(file_id.clone()))
    }

    /// Call when the bytes on disk for `file_id` changed outside this
    /// facade (e.g. a user edited the file directly). Re-hashes the
    /// current content and, if it actually changed, commits an update and
    /// queues the upload; a no-op if the hash is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError`] if the record doesn't exist or the
    /// local/catalog operations fail.
    #[instrument(skip(self))]
    pub async fn mark_local_file_changed(&self, file_id: &FileId) -> Result<(), FileSyncError> {
        let record = self
            .catalog
            .get_file(file_id)
            .await?
            .ok_or_else(|| FileSyncError::FileNotFound(file_id.clone()))?;

        let bytes = self.local.read_file(&record.path).await?;
        let content_hash = hash_bytes(&bytes);
        if content_hash == record.content_hash {
            return Ok(());
        }

        let path = content_addressed_path(&content_hash);
        self.local.write_file(&path, &bytes).await?;
        self.catalog
            .commit_file_updated(file_id, &path, &content_hash, None)
            .await?;

        self.state
            .atomic_update(file_id, &path, |entry| {
                entry.path = path.clone();
                entry.local_hash = content_hash.clone();
            })
            .await?;
        self.state
            .set_transfer_status(file_id, TransferDirection::Upload, TransferStatus::Queued)
            .await?;
        self.state
            .set_transfer_status(file_id, TransferDirection::Download, TransferStatus::Done)
            .await?;
        self.executor.enqueue_upload(file_id.clone()).await;
        Ok(())
    }

    /// Re-queues every file currently sitting in an `error` state, for
    /// both directions, and emits one `recovery{from=error-retry}`
    /// observation naming the affected ids. A no-op (no observation) when
    /// nothing is in `error`. Returns the affected file ids.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError`] if updating state fails.
    #[instrument(skip(self))]
    pub async fn retry_errors(&self) -> Result<Vec<FileId>, FileSyncError> {
        let mut retried = Vec::new();
        for (file_id, entry) in self.state.all().await {
            let mut touched = false;
            if entry.upload_status == TransferStatus::Error {
                self.state
                    .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::Queued)
                    .await?;
                self.executor.enqueue_upload(file_id.clone()).await;
                touched = true;
            }
            if entry.download_status == TransferStatus::Error {
                self.state
                    .set_transfer_status(&file_id, TransferDirection::Download, TransferStatus::Queued)
                    .await?;
                self.executor.enqueue_download(file_id.clone()).await;
                touched = true;
            }
            if touched {
                retried.push(file_id);
            }
        }
        if !retried.is_empty() {
            self.observer.emit(Observation::Recovery {
                from: "error-retry".to_string(),
            });
        }
        Ok(retried)
    }
}
