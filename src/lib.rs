//! FileSync Core
//!
//! Per-client orchestrator that reconciles a content-addressed file catalog
//! (an external, event-sourced store) against a local blob cache and a
//! remote blob repository: it watches the catalog's event log, queues and
//! retries uploads/downloads with bounded concurrency, recovers from
//! connectivity loss and stalled streams, and exposes a small CRUD surface
//! plus a stream of [`observation::Observation`]s for callers to watch.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - `SQLite` connection and schema management for the default catalog
//! - [`catalog`] - the event-sourced catalog seam and its `SQLite` reference implementation
//! - [`local_store`] - the local blob cache seam and its filesystem reference implementation
//! - [`remote_store`] - the remote blob repository seam and its HTTP reference implementation
//! - [`traits`] - the `Catalog`/`LocalStore`/`RemoteStore` collaborator seams
//! - [`model`] - shared data types (`FileRecord`, `StateEntry`, `CatalogEvent`, ...)
//! - [`state`] - per-file sync bookkeeping, mirrored to the catalog
//! - [`executor`] - bounded-concurrency upload/download dispatch with retry
//! - [`reconcile`] - turns catalog events into local state and queue membership
//! - [`stream`] - the event stream consumer, with bootstrap replay and reconnect
//! - [`heartbeat`] - self-healing liveness checks over the stream and the executor
//! - [`connectivity`] - periodic remote health checks driving online/offline transitions
//! - [`leadership`] - gates the background fibers on an externally-driven leadership signal
//! - [`observation`] - the outward-facing event stream subscribers can watch
//! - [`preprocessor`] - MIME-pattern-dispatched hooks run over bytes before they're stored
//! - [`crud`] - the save/update/delete/resolve surface applications call
//! - [`config`] - aggregated configuration for a [`FileSync`] instance
//! - [`hash`] - content hashing

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod crud;
pub mod db;
pub mod error;
pub mod executor;
pub mod hash;
pub mod heartbeat;
pub mod leadership;
pub mod local_store;
pub mod model;
pub mod observation;
pub mod preprocessor;
pub mod reconcile;
pub mod remote_store;
pub mod state;
pub mod stream;
pub mod traits;

pub use catalog::SqliteCatalog;
pub use config::{FileSyncConfig, FileSyncConfigBuilder};
pub use connectivity::ConnectivityLoop;
pub use crud::FileCrud;
pub use db::Database;
pub use error::{CatalogError, FileSyncError, TransferError};
pub use executor::TransferExecutor;
pub use heartbeat::Heartbeat;
pub use leadership::LeadershipGate;
pub use local_store::FsLocalStore;
pub use model::{CatalogEvent, CatalogEventKind, FileId, FileRecord, StateEntry, TransferDirection, TransferStatus};
pub use observation::{Observation, ObservationEmitter};
pub use preprocessor::{Preprocessor, PreprocessorRegistry};
pub use reconcile::Reconciler;
pub use remote_store::HttpRemoteStore;
pub use state::LocalFileStateStore;
pub use stream::EventStreamConsumer;
pub use traits::{Catalog, LocalStore, ProgressCallback, RemoteStore};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Composition root that wires every collaborator and background fiber
/// together into a single per-client instance.
///
/// `FileSync` only *observes* leader election — some other layer (a
/// cross-tab election in the host application, a distributed lock in a
/// multi-process deployment) decides who leads; this just makes sure
/// exactly the leading instance runs the fibers that touch shared
/// resources. Construct with `leader = watch::channel(true).1` for a
/// single-instance deployment where this is always the leader.
pub struct FileSync {
    pub crud: FileCrud,
    pub state: Arc<LocalFileStateStore>,
    pub executor: Arc<TransferExecutor>,
    pub stream: Arc<EventStreamConsumer>,
    pub heartbeat: Arc<Heartbeat>,
    pub connectivity: Arc<ConnectivityLoop>,
    pub observer: Arc<ObservationEmitter>,
    leadership: watch::Receiver<bool>,
    config: FileSyncConfig,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FileSync {
    /// Wires the default `SQLite`/filesystem/HTTP collaborators together.
    /// Use [`Self::with_collaborators`] to supply test doubles or
    /// alternative backends.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if loading initial state from the catalog
    /// fails.
    pub async fn new(
        db: &Database,
        local_root: impl Into<std::path::PathBuf>,
        remote_base_url: impl Into<String>,
        leadership: watch::Receiver<bool>,
        config: FileSyncConfig,
    ) -> Result<Self, CatalogError> {
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(db));
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(local_root));
        let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(remote_base_url));
        Self::with_collaborators(catalog, local, remote, leadership, config).await
    }

    /// Wires arbitrary `Catalog`/`LocalStore`/`RemoteStore` implementations
    /// together — the seam used by tests and by callers with their own
    /// backends.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if loading initial state from the catalog
    /// fails.
    pub async fn with_collaborators(
        catalog: Arc<dyn Catalog>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        leadership: watch::Receiver<bool>,
        config: FileSyncConfig,
    ) -> Result<Self, CatalogError> {
        let observer = Arc::new(ObservationEmitter::new());
        let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await?);
        let executor = Arc::new(TransferExecutor::new(
            catalog.clone(),
            local.clone(),
            remote.clone(),
            state.clone(),
            observer.clone(),
            config.executor.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(local.clone(), state.clone(), executor.clone()));
        let stream = Arc::new(EventStreamConsumer::new(
            catalog.clone(),
            reconciler,
            observer.clone(),
            config.stream.clone(),
        ));
        let heartbeat = Arc::new(Heartbeat::new(
            stream.clone(),
            executor.clone(),
            state.clone(),
            observer.clone(),
            config.heartbeat.clone(),
        ));
        let connectivity = Arc::new(ConnectivityLoop::new(
            remote.clone(),
            state.clone(),
            executor.clone(),
            observer.clone(),
            config.connectivity.clone(),
        ));
        executor.set_connectivity_probe(connectivity.clone());
        let preprocessors = Arc::new(config.build_preprocessor_registry());
        let crud = FileCrud::new(
            catalog,
            local,
            remote,
            state.clone(),
            executor.clone(),
            observer.clone(),
            preprocessors,
            config.auto_prioritize_on_resolve,
        );

        Ok(Self {
            crud,
            state,
            executor,
            stream,
            heartbeat,
            connectivity,
            observer,
            leadership,
            config,
            supervisor: tokio::sync::Mutex::new(None),
        })
    }

    /// Starts the background fibers (transfer dispatchers, event stream,
    /// heartbeat, connectivity loop), gated on leadership. Idempotent: a
    /// second call while a supervisor task is already running is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let mut guard = self.supervisor.lock().await;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let executor = self.executor.clone();
        let stream = self.stream.clone();
        let heartbeat = self.heartbeat.clone();
        let connectivity = self.connectivity.clone();
        let demote_errors_on_recovery = true;
        let gate = LeadershipGate::new(self.leadership.clone());

        *guard = Some(tokio::spawn(async move {
            gate.supervise(
                || {
                    let stream = stream.clone();
                    let heartbeat = heartbeat.clone();
                    async move {
                        if let Err(err) = stream.bootstrap().await {
                            tracing::warn!(error = %err, "bootstrap reconcile pass failed");
                        }
                        if let Err(err) = heartbeat.recover_stale_transfers(demote_errors_on_recovery).await {
                            tracing::warn!(error = %err, "stale transfer recovery failed");
                        }
                    }
                },
                || {
                    let executor = executor.clone();
                    let stream = stream.clone();
                    async move {
                        executor.stop().await;
                        stream.stop().await;
                    }
                },
                || {
                    let executor = executor.clone();
                    let stream = stream.clone();
                    let heartbeat = heartbeat.clone();
                    let connectivity = connectivity.clone();
                    async move {
                        executor.start().await;
                        // The stream's own `handle` slot is the single
                        // source of truth for whether it's running — spawn
                        // it through `ensure_running` rather than a raw
                        // `tokio::spawn` so the heartbeat's liveness check
                        // sees the same handle instead of spawning a second
                        // consumer (and so `stop()` above can actually abort
                        // it on leadership loss).
                        stream.ensure_running().await;
                        vec![
                            tokio::spawn(async move { heartbeat.run().await }),
                            tokio::spawn(async move { connectivity.run().await }),
                        ]
                    }
                },
            )
            .await;
        }));
    }

    /// Stops the background supervisor and both transfer dispatchers.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        self.executor.stop().await;
    }

    #[must_use]
    pub fn config(&self) -> &FileSyncConfig {
        &self.config
    }
}
