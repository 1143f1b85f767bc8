//! Transfer Executor: bounded-concurrency upload/download queues.
//!
//! Grounded on the teacher's download engine (`Semaphore`-gated concurrent
//! downloads dispatched from a queue-draining loop), generalized to two
//! independent directions and to uploads as well as downloads. Each
//! direction gets its own dedup'd [`queue::TransferQueue`] and its own
//! `Semaphore` so a burst of downloads can't starve uploads or vice versa.

pub mod config;
pub mod queue;
pub mod retry;
pub mod worker;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::instrument;

pub use config::ExecutorConfig;
use queue::TransferQueue;
use worker::WorkerContext;

use crate::model::{FileId, TransferDirection, TransferStatus};
use crate::observation::ObservationEmitter;
use crate::state::LocalFileStateStore;
use crate::traits::{Catalog, ConnectivityProbe, LocalStore, RemoteStore};

/// Owns the upload/download queues, concurrency limits, and dispatcher
/// tasks. Cloning collaborators are cheap (`Arc`-wrapped); the executor
/// itself is meant to be held behind a single `Arc` by its caller.
pub struct TransferExecutor {
    upload_queue: Arc<TransferQueue>,
    download_queue: Arc<TransferQueue>,
    upload_semaphore: Arc<Semaphore>,
    download_semaphore: Arc<Semaphore>,
    upload_capacity: usize,
    download_capacity: usize,
    worker_ctx: WorkerContext,
    paused: Arc<AtomicBool>,
    cancelled_downloads: Arc<Mutex<HashSet<FileId>>>,
    upload_handle: Mutex<Option<JoinHandle<()>>>,
    download_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransferExecutor {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        state: Arc<LocalFileStateStore>,
        observer: Arc<ObservationEmitter>,
        config: ExecutorConfig,
    ) -> Self {
        let upload_capacity = config.max_concurrent_uploads.max(1);
        let download_capacity = config.max_concurrent_downloads.max(1);
        Self {
            upload_queue: Arc::new(TransferQueue::new()),
            download_queue: Arc::new(TransferQueue::new()),
            upload_semaphore: Arc::new(Semaphore::new(upload_capacity)),
            download_semaphore: Arc::new(Semaphore::new(download_capacity)),
            upload_capacity,
            download_capacity,
            worker_ctx: WorkerContext {
                catalog,
                local,
                remote,
                state,
                observer,
                config,
                connectivity: Arc::new(std::sync::OnceLock::new()),
            },
            paused: Arc::new(AtomicBool::new(false)),
            cancelled_downloads: Arc::new(Mutex::new(HashSet::new())),
            upload_handle: Mutex::new(None),
            download_handle: Mutex::new(None),
        }
    }

    /// Spawns the upload and download dispatcher loops. Idempotent while
    /// already running; see [`Self::ensure_workers`].
    #[instrument(skip(self))]
    pub async fn start(&self) {
        self.ensure_workers().await;
    }

    /// Wires in the connectivity loop's eager health probe, called by a
    /// worker right after a transfer failure (spec §4.5/§4.7). A no-op
    /// (logged) if called more than once — the `OnceLock` keeps the first
    /// binding.
    pub fn set_connectivity_probe(&self, probe: Arc<dyn ConnectivityProbe>) {
        if self.worker_ctx.connectivity.set(probe).is_err() {
            tracing::warn!("connectivity probe already set; ignoring duplicate wiring");
        }
    }

    /// Makes sure both dispatcher loops are alive, (re)spawning any that
    /// are missing or have died (panicked, or aborted by [`Self::stop`]).
    /// Called by the heartbeat's stuck-queue recovery as well as by
    /// [`Self::start`].
    pub async fn ensure_workers(&self) {
        self.ensure_worker(TransferDirection::Upload).await;
        self.ensure_worker(TransferDirection::Download).await;
    }

    async fn ensure_worker(&self, direction: TransferDirection) {
        let (handle_slot, queue, semaphore) = match direction {
            TransferDirection::Upload => (
                &self.upload_handle,
                self.upload_queue.clone(),
                self.upload_semaphore.clone(),
            ),
            TransferDirection::Download => (
                &self.download_handle,
                self.download_queue.clone(),
                self.download_semaphore.clone(),
            ),
        };

        let mut guard = handle_slot.lock().await;
        let needs_spawn = guard.as_ref().is_none_or(JoinHandle::is_finished);
        if needs_spawn {
            *guard = Some(tokio::spawn(run_dispatcher(
                direction,
                queue,
                semaphore,
                self.worker_ctx.clone(),
                self.paused.clone(),
                self.cancelled_downloads.clone(),
            )));
        }
    }

    /// Stops the dispatcher loops. Transfers already spawned run to
    /// completion; only new dequeues are halted.
    pub async fn stop(&self) {
        if let Some(handle) = self.upload_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.download_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Pauses dequeuing on both directions without dropping queued work.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn enqueue_upload(&self, file_id: FileId) {
        let _ = self
            .worker_ctx
            .state
            .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::Queued)
            .await;
        self.upload_queue.enqueue(file_id).await;
    }

    pub async fn enqueue_download(&self, file_id: FileId) {
        self.cancelled_downloads.lock().await.remove(&file_id);
        let _ = self
            .worker_ctx
            .state
            .set_transfer_status(&file_id, TransferDirection::Download, TransferStatus::Queued)
            .await;
        self.download_queue.enqueue(file_id).await;
    }

    /// Moves a download to the front of its queue, clearing any pending
    /// cancellation. Used for "open this file now" resolve-path urgency.
    pub async fn prioritize_download(&self, file_id: &FileId) {
        self.cancelled_downloads.lock().await.remove(file_id);
        self.download_queue.prioritize(file_id).await;
    }

    /// Marks a queued download as cancelled. A dispatch already in flight
    /// is not aborted; only a download still sitting in the queue is
    /// skipped when its turn comes.
    pub async fn cancel_download(&self, file_id: &FileId) {
        self.cancelled_downloads.lock().await.insert(file_id.clone());
        self.download_queue.remove(file_id).await;
    }

    pub async fn queued_count(&self, direction: TransferDirection) -> usize {
        match direction {
            TransferDirection::Upload => self.upload_queue.len().await,
            TransferDirection::Download => self.download_queue.len().await,
        }
    }

    #[must_use]
    pub fn inflight_count(&self, direction: TransferDirection) -> usize {
        let (semaphore, capacity) = match direction {
            TransferDirection::Upload => (&self.upload_semaphore, self.upload_capacity),
            TransferDirection::Download => (&self.download_semaphore, self.download_capacity),
        };
        capacity.saturating_sub(semaphore.available_permits())
    }
}

async fn run_dispatcher(
    direction: TransferDirection,
    queue: Arc<TransferQueue>,
    semaphore: Arc<Semaphore>,
    ctx: WorkerContext,
    paused: Arc<AtomicBool>,
    cancelled_downloads: Arc<Mutex<HashSet<FileId>>>,
) {
    loop {
        let file_id = queue.dequeue_or_wait().await;

        while paused.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(200)).await;
        }

        if direction == TransferDirection::Download
            && cancelled_downloads.lock().await.remove(&file_id)
        {
            continue;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let worker_ctx = ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match direction {
                TransferDirection::Upload => worker::run_upload(worker_ctx, file_id).await,
                TransferDirection::Download => worker::run_download(worker_ctx, file_id).await,
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::db::Database;
    use crate::local_store::FsLocalStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeRemote {
        uploaded: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn upload(
            &self,
            bytes: Vec<u8>,
            key_hint: &str,
            mut on_progress: crate::traits::ProgressCallback,
        ) -> Result<String, crate::error::TransferError> {
            on_progress(bytes.len() as u64, bytes.len() as u64);
            self.uploaded.lock().unwrap().push((key_hint.to_string(), bytes));
            Ok(format!("remote-{key_hint}"))
        }

        async fn download(
            &self,
            key: &str,
            mut on_progress: crate::traits::ProgressCallback,
        ) -> Result<Vec<u8>, crate::error::TransferError> {
            let uploaded = self.uploaded.lock().unwrap();
            let entry = uploaded
                .iter()
                .find(|(hint, _)| format!("remote-{hint}") == key)
                .cloned();
            drop(uploaded);
            match entry {
                Some((_, bytes)) => {
                    on_progress(bytes.len() as u64, bytes.len() as u64);
                    Ok(bytes)
                }
                None => Err(crate::error::TransferError::FileGoneDuringTransfer),
            }
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

    #[tokio::test]
    async fn enqueue_upload_runs_to_completion() {
        let db = Database::new_in_memory().await.unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
        let remote: Arc<dyn RemoteStore> = Arc::new(FakeRemote::default());
        let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.unwrap());
        let observer = Arc::new(ObservationEmitter::new());

        local.write_file("files/ab/h1", b"hello").await.unwrap();
        catalog
            .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
            .await
            .unwrap();

        let executor = TransferExecutor::new(
            catalog.clone(),
            local,
            remote,
            state.clone(),
            observer,
            ExecutorConfig::default(),
        );
        executor.start().await;
        executor.enqueue_upload("f1".to_string()).await;

        for _ in 0..50 {
            let record = catalog.get_file(&"f1".to_string()).await.unwrap().unwrap();
            if record.has_remote_key() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }

        let record = catalog.get_file(&"f1".to_string()).await.unwrap().unwrap();
        assert!(record.has_remote_key());
        let entry = state.get(&"f1".to_string()).await.unwrap();
        assert_eq!(entry.upload_status, TransferStatus::Done);
    }

    #[tokio::test]
    async fn pause_blocks_new_dequeues() {
        let db = Database::new_in_memory().await.unwrap();
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
        let remote: Arc<dyn RemoteStore> = Arc::new(FakeRemote::default());
        let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.unwrap());
        let observer = Arc::new(ObservationEmitter::new());

        catalog
            .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
            .await
            .unwrap();

        let executor = TransferExecutor::new(catalog.clone(), local, remote, state, observer, ExecutorConfig::default());
        executor.pause();
        assert!(executor.is_paused());
        executor.start().await;
        executor.enqueue_upload("f1".to_string()).await;

        sleep(Duration::from_millis(300)).await;
        let record = catalog.get_file(&"f1".to_string()).await.unwrap().unwrap();
        assert!(!record.has_remote_key(), "paused executor must not complete transfers");
    }
}
