//! External collaborator seams.
//!
//! The catalog/event store, the local blob backend, and the remote blob
//! backend are all external to the FileSync core (spec §1, "Out of
//! scope"). Each is expressed here as an `async_trait` so the core can be
//! driven against fakes in tests and against whatever production backend a
//! caller wires up. A reference implementation of each trait ships in
//! [`crate::catalog`], [`crate::local_store`], and [`crate::remote_store`]
//! so the crate is usable standalone.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::{CatalogError, FileSyncError, TransferError};
use crate::model::{CatalogEvent, FileId, FileRecord, StateEntry};

/// A boxed stream of catalog events, as returned by [`Catalog::subscribe`].
pub type CatalogEventStream =
    Pin<Box<dyn Stream<Item = Result<CatalogEvent, CatalogError>> + Send>>;

/// Fire-and-forget progress callback invoked by a [`RemoteStore`] during a
/// transfer. Must never block; the emitter that wraps it catches panics so a
/// misbehaving callback cannot abort the transfer (spec §4.5).
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

/// The event-sourced catalog of file records. Read-only from the core's
/// perspective except for the well-typed commits it is allowed to make.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Commits a new file record. Used by [`crate::crud::FileCrud::save_file`].
    async fn commit_file_created(
        &self,
        file_id: &FileId,
        path: &str,
        content_hash: &str,
    ) -> Result<FileRecord, CatalogError>;

    /// Commits a content/remote-key update to an existing record.
    /// `remote_key = None` clears the remote key (new content supersedes it).
    async fn commit_file_updated(
        &self,
        file_id: &FileId,
        path: &str,
        content_hash: &str,
        remote_key: Option<&str>,
    ) -> Result<FileRecord, CatalogError>;

    /// Stamps a remote key onto an existing record after a successful
    /// upload, without touching path/content_hash.
    async fn commit_remote_key(
        &self,
        file_id: &FileId,
        remote_key: &str,
    ) -> Result<FileRecord, CatalogError>;

    /// Tombstones a record.
    async fn commit_file_deleted(&self, file_id: &FileId) -> Result<(), CatalogError>;

    /// Reads a single record, live or tombstoned.
    async fn get_file(&self, file_id: &FileId) -> Result<Option<FileRecord>, CatalogError>;

    /// Reads every live (non-tombstoned) record, for the bootstrap pass.
    async fn snapshot(&self) -> Result<Vec<FileRecord>, CatalogError>;

    /// Returns the current head sequence number of the event log.
    async fn current_head(&self) -> Result<i64, CatalogError>;

    /// Subscribes to the filtered stream of `file_created`/`file_updated`/
    /// `file_deleted` events strictly newer than `since`.
    async fn subscribe(&self, since: i64) -> Result<CatalogEventStream, CatalogError>;

    /// Persists the cursor as the given sequence number.
    async fn commit_cursor(&self, sequence: i64) -> Result<(), CatalogError>;

    /// Reads the persisted cursor.
    async fn get_cursor(&self) -> Result<i64, CatalogError>;

    /// Reads every persisted per-file state entry.
    async fn get_state(&self) -> Result<HashMap<FileId, StateEntry>, CatalogError>;

    /// Commits an upsert of a single state entry.
    async fn commit_state_upsert(
        &self,
        file_id: &FileId,
        entry: &StateEntry,
    ) -> Result<(), CatalogError>;

    /// Commits a batch of state upserts as one unit, for `atomic_update`.
    async fn commit_state_batch(
        &self,
        upserts: &[(FileId, StateEntry)],
        removals: &[FileId],
    ) -> Result<(), CatalogError>;

    /// Removes a state entry.
    async fn commit_state_remove(&self, file_id: &FileId) -> Result<(), CatalogError>;
}

/// The client-resident blob cache, addressed by content-addressed path.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), FileSyncError>;
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FileSyncError>;
    async fn file_exists(&self, path: &str) -> Result<bool, FileSyncError>;
    async fn delete_file(&self, path: &str) -> Result<(), FileSyncError>;
    async fn list_files(&self, root: &str) -> Result<Vec<String>, FileSyncError>;
    fn get_file_url(&self, path: &str) -> String;
}

/// The shared object repository, addressed by opaque remote key.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        key_hint: &str,
        on_progress: ProgressCallback,
    ) -> Result<String, TransferError>;

    async fn download(
        &self,
        key: &str,
        on_progress: ProgressCallback,
    ) -> Result<Vec<u8>, TransferError>;

    async fn delete(&self, key: &str) -> Result<(), TransferError>;

    async fn check_health(&self) -> bool;

    fn get_download_url(&self, key: &str) -> String;
}

/// The eager health-check hook a transfer worker calls on every failure
/// (spec §4.5, §4.7): "if the probe reports unhealthy, the system
/// transitions offline eagerly rather than waiting for the next tick."
/// Implemented by [`crate::connectivity::ConnectivityLoop`]; expressed as a
/// trait so the executor doesn't need a concrete connectivity loop wired in
/// to be testable on its own.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self);
}
