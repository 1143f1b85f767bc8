//! Per-event reconciliation: the decision table that turns a catalog event
//! into local disk state and transfer-queue membership.
//!
//! Disk/hash checks always happen before the state mutex is taken
//! ([`Reconciler::local_matches`]), so a slow filesystem read never holds up
//! unrelated state updates. Every branch preserves an already-active
//! (`queued`/`in_progress`) status rather than clobbering it back to
//! `pending` — a reconcile pass racing a worker must never un-start a
//! transfer that is already running.

use std::sync::Arc;

use tracing::instrument;

use crate::error::FileSyncError;
use crate::executor::TransferExecutor;
use crate::hash::hash_bytes;
use crate::model::{CatalogEvent, CatalogEventKind, FileId, TransferDirection, TransferStatus};
use crate::state::LocalFileStateStore;
use crate::traits::LocalStore;

/// Applies catalog events to local state and the transfer executor.
pub struct Reconciler {
    local: Arc<dyn LocalStore>,
    state: Arc<LocalFileStateStore>,
    executor: Arc<TransferExecutor>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        local: Arc<dyn LocalStore>,
        state: Arc<LocalFileStateStore>,
        executor: Arc<TransferExecutor>,
    ) -> Self {
        Self {
            local,
            state,
            executor,
        }
    }

    /// Applies a single event. Safe to call more than once for the same
    /// event (e.g. during bootstrap replay) — every branch is idempotent.
    #[instrument(skip(self, event))]
    pub async fn reconcile_event(&self, event: &CatalogEvent) -> Result<(), FileSyncError> {
        match &event.kind {
            CatalogEventKind::FileCreated {
                file_id,
                path,
                content_hash,
            } => self.reconcile_created(file_id, path, content_hash).await,
            CatalogEventKind::FileUpdated {
                file_id,
                path,
                content_hash,
                remote_key,
            } => {
                self.reconcile_updated(file_id, path, content_hash, remote_key)
                    .await
            }
            CatalogEventKind::FileDeleted { file_id, .. } => self.reconcile_deleted(file_id).await,
        }
    }

    async fn local_matches(&self, path: &str, content_hash: &str) -> Result<bool, FileSyncError> {
        if !self.local.file_exists(path).await? {
            return Ok(false);
        }
        let bytes = self.local.read_file(path).await?;
        Ok(hash_bytes(&bytes) == content_hash)
    }

    async fn reconcile_created(
        &self,
        file_id: &FileId,
        path: &str,
        content_hash: &str,
    ) -> Result<(), FileSyncError> {
        let local_matches = self.local_matches(path, content_hash).await?;

        // §4.4 row 1: "created, no local bytes" has no state entry at all —
        // don't conjure a `pending`/`pending` entry for a file nobody has
        // any work to do on yet. Once an entry genuinely exists (an active
        // transfer a worker or an earlier reconcile already created), keep
        // updating it in place rather than leaving it behind.
        if !local_matches && self.state.get(file_id).await.is_none() {
            return Ok(());
        }

        self.state
            .atomic_update(file_id, path, |entry| {
                entry.path = path.to_string();
                if local_matches {
                    entry.local_hash = content_hash.to_string();
                }
            })
            .await?;

        if local_matches {
            self.enqueue_upload_if_idle(file_id).await?;
            self.mark_done_if_idle(file_id, TransferDirection::Download).await?;
        }
        Ok(())
    }

    async fn reconcile_updated(
        &self,
        file_id: &FileId,
        path: &str,
        content_hash: &str,
        remote_key: &str,
    ) -> Result<(), FileSyncError> {
        let local_matches = self.local_matches(path, content_hash).await?;
        let has_remote_key = !remote_key.is_empty();

        // §4.4 row 3: "updated, no local bytes, rk empty" has no state
        // entry — nothing to transfer in either direction yet. As above,
        // an entry that already exists (e.g. an active transfer) is left
        // alone rather than erased.
        if !local_matches && !has_remote_key && self.state.get(file_id).await.is_none() {
            return Ok(());
        }

        self.state
            .atomic_update(file_id, path, |entry| {
                entry.path = path.to_string();
                if local_matches {
                    entry.local_hash = content_hash.to_string();
                } else if entry.local_hash == content_hash {
                    // Cached hash claims we have this content but the disk
                    // check just said otherwise — don't keep lying to a
                    // future reconcile pass.
                    entry.local_hash.clear();
                }
            })
            .await?;

        if local_matches && !has_remote_key {
            // We hold the new bytes and nobody has pushed them yet.
            self.enqueue_upload_if_idle(file_id).await?;
            self.mark_done_if_idle(file_id, TransferDirection::Download).await?;
        } else if !local_matches && has_remote_key {
            // Somebody else pushed content we don't have.
            self.enqueue_download_if_idle(file_id).await?;
            self.mark_done_if_idle(file_id, TransferDirection::Upload).await?;
        } else if local_matches && has_remote_key {
            // Already synced in both directions; nothing to transfer, but
            // a fresh entry (or one left over from a previous in-flight
            // transfer) should reflect that rather than sit at `pending`.
            self.mark_done_if_idle(file_id, TransferDirection::Upload).await?;
            self.mark_done_if_idle(file_id, TransferDirection::Download).await?;
        }
        Ok(())
    }

    async fn reconcile_deleted(&self, file_id: &FileId) -> Result<(), FileSyncError> {
        self.executor.cancel_download(file_id).await;
        if let Some(entry) = self.state.get(file_id).await {
            if !entry.path.is_empty() {
                let _ = self.local.delete_file(&entry.path).await;
            }
        }
        self.state.remove(file_id).await?;
        Ok(())
    }

    async fn enqueue_upload_if_idle(&self, file_id: &FileId) -> Result<(), FileSyncError> {
        let active = self
            .state
            .get(file_id)
            .await
            .is_some_and(|entry| entry.status(TransferDirection::Upload).is_active());
        if !active {
            self.state
                .set_transfer_status(file_id, TransferDirection::Upload, TransferStatus::Queued)
                .await?;
            self.executor.enqueue_upload(file_id.clone()).await;
        }
        Ok(())
    }

    async fn enqueue_download_if_idle(&self, file_id: &FileId) -> Result<(), FileSyncError> {
        let active = self
            .state
            .get(file_id)
            .await
            .is_some_and(|entry| entry.status(TransferDirection::Download).is_active());
        if !active {
            self.state
                .set_transfer_status(file_id, TransferDirection::Download, TransferStatus::Queued)
                .await?;
            self.executor.enqueue_download(file_id.clone()).await;
        }
        Ok(())
    }

    /// Marks a direction `done` unless it's already active or done —
    /// preserves an in-flight transfer the same way the enqueue paths do.
    async fn mark_done_if_idle(&self, file_id: &FileId, direction: TransferDirection) -> Result<(), FileSyncError> {
        let settled = self.state.get(file_id).await.is_some_and(|entry| {
            let status = entry.status(direction);
            status.is_active() || status == TransferStatus::Done
        });
        if !settled {
            self.state.set_transfer_status(file_id, direction, TransferStatus::Done).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::db::Database;
    use crate::executor::ExecutorConfig;
    use crate::local_store::FsLocalStore;
    use crate::observation::ObservationEmitter;
    use crate::traits::{Catalog, RemoteStore};
    use async_trait::async_trait;

    struct NullRemote;

    #[async_trait]
    impl RemoteStore for NullRemote {
        async fn upload(
            &self,
            _bytes: Vec<u8>,
            _key_hint: &str,
            _on_progress: crate::traits::ProgressCallback,
        ) -> Result<String, crate::error::TransferError> {
            Ok("remote-key".to_string())
        }
        async fn download(
            &self,
            _key: &str,
            _on_progress: crate::traits::ProgressCallback,
        ) -> Result<Vec<u8>, crate::error::TransferError> {
            Ok(vec![])
        }
        async fn delete(&self, _key: &str) -> Result<(), crate::error::TransferError> {
            Ok(())
        }
        async fn check_health(&self) -> bool {
            true
        }
        fn get_download_url(&self, key: &str) -> String {
            key.to_string()
        }
    }

    async fn reconciler() -> (Reconciler, Arc<dyn LocalStore>, Arc<dyn Catalog>, tempfile::TempDir) {
        let db = Database::new_in_memory().await.unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
        let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.unwrap());
        let executor = Arc::new(TransferExecutor::new(
            catalog.clone(),
            local.clone(),
            Arc::new(NullRemote),
            state.clone(),
            Arc::new(ObservationEmitter::new()),
            ExecutorConfig::default(),
        ));
        (Reconciler::new(local.clone(), state, executor), local, catalog, dir)
    }

    #[tokio::test]
    async fn created_with_local_bytes_present_queues_upload() {
        let (reconciler, local, catalog, _dir) = reconciler().await;
        local.write_file("files/ab/h1", b"hello").await.unwrap();
        let content_hash = hash_bytes(b"hello");
        catalog
            .commit_file_created(&"f1".to_string(), "files/ab/h1", &content_hash)
            .await
            .unwrap();

        let event = CatalogEvent {
            sequence: 1,
            kind: CatalogEventKind::FileCreated {
                file_id: "f1".to_string(),
                path: "files/ab/h1".to_string(),
                content_hash,
            },
        };
        reconciler.reconcile_event(&event).await.unwrap();

        let state = reconciler.state.get(&"f1".to_string()).await.unwrap();
        assert_eq!(state.upload_status, TransferStatus::Queued);
        assert_eq!(state.download_status, TransferStatus::Done);
    }

    #[tokio::test]
    async fn created_without_local_bytes_does_not_queue_upload() {
        let (reconciler, _local, _catalog, _dir) = reconciler().await;
        let event = CatalogEvent {
            sequence: 1,
            kind: CatalogEventKind::FileCreated {
                file_id: "f1".to_string(),
                path: "files/ab/h1".to_string(),
                content_hash: "h1".to_string(),
            },
        };
        reconciler.reconcile_event(&event).await.unwrap();
        // §4.4 row 1 ("created, no local bytes") is a "(no entry)" outcome,
        // not a `pending`/`pending` entry.
        assert!(reconciler.state.get(&"f1".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn updated_with_remote_key_and_no_local_bytes_queues_download() {
        let (reconciler, _local, _catalog, _dir) = reconciler().await;
        let event = CatalogEvent {
            sequence: 2,
            kind: CatalogEventKind::FileUpdated {
                file_id: "f1".to_string(),
                path: "files/ab/h1".to_string(),
                content_hash: "h1".to_string(),
                remote_key: "remote-key".to_string(),
            },
        };
        reconciler.reconcile_event(&event).await.unwrap();
        let state = reconciler.state.get(&"f1".to_string()).await.unwrap();
        assert_eq!(state.download_status, TransferStatus::Queued);
        assert_eq!(state.upload_status, TransferStatus::Done);
    }

    #[tokio::test]
    async fn deleted_clears_state_and_local_file() {
        let (reconciler, local, catalog, _dir) = reconciler().await;
        local.write_file("files/ab/h1", b"hello").await.unwrap();
        let content_hash = hash_bytes(b"hello");
        catalog
            .commit_file_created(&"f1".to_string(), "files/ab/h1", &content_hash)
            .await
            .unwrap();
        reconciler
            .reconcile_event(&CatalogEvent {
                sequence: 1,
                kind: CatalogEventKind::FileCreated {
                    file_id: "f1".to_string(),
                    path: "files/ab/h1".to_string(),
                    content_hash: content_hash.clone(),
                },
            })
            .await
            .unwrap();

        reconciler
            .reconcile_event(&CatalogEvent {
                sequence: 2,
                kind: CatalogEventKind::FileDeleted {
                    file_id: "f1".to_string(),
                    deleted_at: "now".to_string(),
                },
            })
            .await
            .unwrap();

        assert!(reconciler.state.get(&"f1".to_string()).await.is_none());
        assert!(!local.file_exists("files/ab/h1").await.unwrap());
    }
}
