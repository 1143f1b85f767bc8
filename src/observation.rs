//! Outward-facing event stream: every state transition a subscriber might
//! want to react to (progress bars, tray icons, log shipping) is emitted as
//! an [`Observation`].
//!
//! Grounded on the broadcast-channel progress/event pattern used by
//! Tauri-style file transfer managers in the reference pack: a
//! `broadcast::Sender` fans events out to any number of subscribers, and an
//! optional synchronous callback hook is wrapped in `catch_unwind` so a
//! panicking subscriber can't unwind into the worker task that produced the
//! event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::model::{FileId, TransferDirection};

/// Why the heartbeat intervened. Carried on [`Observation::HeartbeatRecovery`]
/// so a subscriber can tell a dead stream fiber apart from a stuck queue or a
/// stream that's alive but not making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatRecoveryReason {
    StreamDead,
    StuckQueue,
    StreamStalled,
}

impl std::fmt::Display for HeartbeatRecoveryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StreamDead => "stream-dead",
            Self::StuckQueue => "stuck-queue",
            Self::StreamStalled => "stream-stalled",
        };
        write!(f, "{s}")
    }
}

/// Default capacity of the broadcast channel. Slow subscribers lag rather
/// than block producers; they observe a `Lagged` error and resume from the
/// next event.
const CHANNEL_CAPACITY: usize = 256;

/// A single emitted event. `#[non_exhaustive]` because new observation
/// kinds may be added without that being a breaking change for consumers
/// that already match with a wildcard arm.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Observation {
    Online,
    Offline,
    SyncStart,
    SyncComplete,
    SyncError { message: String },
    StreamError { message: String },
    StreamRecovery { attempt: u32 },
    StreamExhausted { attempts: u32 },
    /// A manual recovery action outside the heartbeat/stream machinery,
    /// e.g. [`crate::crud::FileCrud::retry_errors`] (`from = "error-retry"`).
    Recovery { from: String },
    HeartbeatRecovery { reason: HeartbeatRecoveryReason },
    /// Emitted once per stale-transfer recovery pass with the ids it acted on.
    ErrorRetryStart { file_ids: Vec<FileId> },
    TransferErrorRetry { file_id: FileId, direction: TransferDirection },
    UploadStart { file_id: FileId },
    UploadProgress { file_id: FileId, transferred: u64, total: u64 },
    UploadComplete { file_id: FileId },
    UploadError { file_id: FileId, message: String },
    DownloadStart { file_id: FileId },
    DownloadProgress { file_id: FileId, transferred: u64, total: u64 },
    DownloadComplete { file_id: FileId },
    DownloadError { file_id: FileId, message: String },
}

type ProgressHook = dyn Fn(&Observation) + Send + Sync;

/// Fans [`Observation`]s out to a broadcast channel and, optionally, a
/// synchronous callback.
#[derive(Clone)]
pub struct ObservationEmitter {
    sender: broadcast::Sender<Observation>,
    hook: Option<Arc<ProgressHook>>,
}

impl ObservationEmitter {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, hook: None }
    }

    /// Attaches a synchronous callback invoked (in addition to the broadcast
    /// channel) for every observation. Panics inside `hook` are caught and
    /// logged rather than propagated.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<ProgressHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.sender.subscribe()
    }

    /// Emits an observation. Never fails: a channel with no subscribers, or
    /// a panicking hook, is swallowed rather than propagated to the caller
    /// driving the transfer.
    pub fn emit(&self, observation: Observation) {
        if let Some(hook) = &self.hook {
            let hook = hook.clone();
            let observation_for_hook = observation.clone();
            let result = catch_unwind(AssertUnwindSafe(|| hook(&observation_for_hook)));
            if result.is_err() {
                warn!("observation hook panicked; subscriber ignored");
            }
        }
        // Err(SendError) just means no receivers are currently subscribed.
        let _ = self.sender.send(observation);
    }

    /// Builds a progress callback that emits upload progress observations
    /// for a single file, suitable for passing to [`crate::traits::RemoteStore::upload`].
    #[must_use]
    pub fn upload_progress_callback(&self, file_id: FileId) -> crate::traits::ProgressCallback {
        let emitter = self.clone();
        Box::new(move |transferred, total| {
            emitter.emit(Observation::UploadProgress {
                file_id: file_id.clone(),
                transferred,
                total,
            });
        })
    }

    /// Builds a progress callback that emits download progress observations
    /// for a single file, suitable for passing to [`crate::traits::RemoteStore::download`].
    #[must_use]
    pub fn download_progress_callback(&self, file_id: FileId) -> crate::traits::ProgressCallback {
        let emitter = self.clone();
        Box::new(move |transferred, total| {
            emitter.emit(Observation::DownloadProgress {
                file_id: file_id.clone(),
                transferred,
                total,
            });
        })
    }
}

impl Default for ObservationEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let emitter = ObservationEmitter::new();
        emitter.emit(Observation::Online);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_observation() {
        let emitter = ObservationEmitter::new();
        let mut rx = emitter.subscribe();
        emitter.emit(Observation::Online);
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Observation::Online));
    }

    #[test]
    fn panicking_hook_is_caught() {
        let hook: Arc<ProgressHook> = Arc::new(|_obs: &Observation| panic!("boom"));
        let emitter = ObservationEmitter::new().with_hook(hook);
        emitter.emit(Observation::Online);
    }
}
