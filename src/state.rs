//! Local File State Store: the per-client, per-file sync bookkeeping that
//! sits between the catalog and the executor.
//!
//! All mutation goes through [`LocalFileStateStore::atomic_update`], which
//! holds a single in-process mutex for the lifetime of the read-modify-write
//! so two callers (e.g. the reconciler reacting to a catalog event and a
//! worker finishing a transfer) can never race each other into a lost
//! update. Every mutation is mirrored to the catalog so state survives a
//! restart and stays visible to anything else watching this client.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::CatalogError;
use crate::model::{FileId, StateEntry, TransferDirection, TransferStatus};
use crate::traits::Catalog;

/// In-memory projection of `sync_state`, kept current by mirroring every
/// mutation back through the catalog.
pub struct LocalFileStateStore {
    catalog: Arc<dyn Catalog>,
    entries: Mutex<HashMap<FileId, StateEntry>>,
}

impl LocalFileStateStore {
    /// Loads the current state from the catalog. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the initial read fails.
    #[instrument(skip(catalog))]
    pub async fn load(catalog: Arc<dyn Catalog>) -> Result<Self, CatalogError> {
        let entries = catalog.get_state().await?;
        Ok(Self {
            catalog,
            entries: Mutex::new(entries),
        })
    }

    pub async fn get(&self, file_id: &FileId) -> Option<StateEntry> {
        self.entries.lock().await.get(file_id).cloned()
    }

    pub async fn all(&self) -> HashMap<FileId, StateEntry> {
        self.entries.lock().await.clone()
    }

    /// Applies `mutator` to the entry for `file_id` under the single state
    /// mutex, creating it from `default_path` if absent, then persists the
    /// result to the catalog before releasing other callers.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the catalog write fails; the in-memory
    /// mutation is still applied, since the catalog is the source of truth
    /// for the *next* read and a failed mirror should not desync the two
    /// more than necessary to retry.
    pub async fn atomic_update<F>(
        &self,
        file_id: &FileId,
        default_path: &str,
        mutator: F,
    ) -> Result<StateEntry, CatalogError>
    where
        F: FnOnce(&mut StateEntry),
    {
        let updated = {
            let mut guard = self.entries.lock().await;
            let entry = guard
                .entry(file_id.clone())
                .or_insert_with(|| StateEntry::new(default_path));
            mutator(entry);
            entry.clone()
        };
        self.catalog.commit_state_upsert(file_id, &updated).await?;
        Ok(updated)
    }

    /// Removes the entry for `file_id`, both in memory and in the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the catalog write fails.
    pub async fn remove(&self, file_id: &FileId) -> Result<(), CatalogError> {
        self.entries.lock().await.remove(file_id);
        self.catalog.commit_state_remove(file_id).await
    }

    /// Sets a per-direction transfer status, clearing any recorded error
    /// unless the new status is itself `error`.
    pub async fn set_transfer_status(
        &self,
        file_id: &FileId,
        direction: TransferDirection,
        status: TransferStatus,
    ) -> Result<StateEntry, CatalogError> {
        self.atomic_update(file_id, "", move |entry| {
            entry.set_status(direction, status);
            if status != TransferStatus::Error {
                entry.last_sync_error.clear();
            }
        })
        .await
    }

    /// Sets a per-direction transfer status to `error` and records the
    /// failure message.
    pub async fn set_transfer_error(
        &self,
        file_id: &FileId,
        direction: TransferDirection,
        message: impl Into<String> + Send + 'static,
    ) -> Result<StateEntry, CatalogError> {
        self.atomic_update(file_id, "", move |entry| {
            entry.set_status(direction, TransferStatus::Error);
            entry.last_sync_error = message.into();
        })
        .await
    }

    /// Demotes every `in_progress` status to `queued` and every `error`
    /// status on the given direction(s) back to `queued` with the error
    /// cleared. Used by the heartbeat's stale-transfer recovery and by the
    /// connectivity loop's reconnect handling.
    ///
    /// Returns the file ids whose state changed, so the caller can
    /// re-enqueue them with the executor.
    pub async fn demote_active_transfers(
        &self,
        demote_errors: bool,
    ) -> Result<Vec<(FileId, TransferDirection)>, CatalogError> {
        let mut changed = Vec::new();
        let snapshot: Vec<(FileId, StateEntry)> = {
            let guard = self.entries.lock().await;
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (file_id, entry) in snapshot {
            for direction in [TransferDirection::Upload, TransferDirection::Download] {
                let status = entry.status(direction);
                let should_demote = status == TransferStatus::InProgress
                    || (demote_errors && status == TransferStatus::Error);
                if should_demote {
                    self.atomic_update(&file_id, &entry.path, |e| {
                        e.set_status(direction, TransferStatus::Queued);
                        e.last_sync_error.clear();
                    })
                    .await?;
                    changed.push((file_id.clone(), direction));
                }
            }
        }

        Ok(changed)
    }
}
