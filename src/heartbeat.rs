//! Liveness Supervisor: the self-healing loop that notices when the stream
//! or the executor has quietly stopped making progress and nudges them back
//! to life.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::error::CatalogError;
use crate::executor::TransferExecutor;
use crate::model::TransferDirection;
use crate::observation::{HeartbeatRecoveryReason, Observation, ObservationEmitter};
use crate::state::LocalFileStateStore;
use crate::stream::EventStreamConsumer;

/// Number of consecutive ticks a direction must show "queued but nothing
/// in flight" before it's treated as stuck and the dispatcher is revived.
const STUCK_QUEUE_TICK_THRESHOLD: u32 = 2;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub stream_stall_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            stream_stall_threshold: Duration::from_secs(30),
        }
    }
}

/// Periodic liveness check over the event stream and the transfer
/// executor, plus a one-time stale-transfer recovery hook run on leadership
/// acquisition.
pub struct Heartbeat {
    stream: Arc<EventStreamConsumer>,
    executor: Arc<TransferExecutor>,
    state: Arc<LocalFileStateStore>,
    observer: Arc<ObservationEmitter>,
    config: HeartbeatConfig,
    recovered_once: AtomicBool,
    stuck_ticks: Mutex<u32>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(
        stream: Arc<EventStreamConsumer>,
        executor: Arc<TransferExecutor>,
        state: Arc<LocalFileStateStore>,
        observer: Arc<ObservationEmitter>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            stream,
            executor,
            state,
            observer,
            config,
            recovered_once: AtomicBool::new(false),
            stuck_ticks: Mutex::new(0),
        }
    }

    /// Runs the periodic tick loop forever. Intended to be spawned as a
    /// long-lived task, gated by leadership.
    pub async fn run(self: Arc<Self>) {
        if self.config.interval.is_zero() {
            // A zero interval disables the heartbeat entirely: never tick,
            // never emit a `heartbeat-recovery` observation.
            std::future::pending::<()>().await;
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        self.check_stream_liveness().await;
        self.check_stuck_queues().await;
    }

    /// Restarts the stream fiber if it has exited outright (dead), or if
    /// it's alive but has delivered nothing in longer than
    /// `stream_stall_threshold` (stalled). Each condition is reported with
    /// its own [`HeartbeatRecoveryReason`] — a disabled threshold (zero)
    /// only ever reports `stream-dead`.
    async fn check_stream_liveness(&self) {
        let respawned = self.stream.ensure_running().await;
        if respawned {
            warn!("event stream fiber was dead; restarted");
            self.observer.emit(Observation::HeartbeatRecovery {
                reason: HeartbeatRecoveryReason::StreamDead,
            });
            return;
        }

        if !self.config.stream_stall_threshold.is_zero()
            && self.stream.has_processed_any()
            && self.stream.last_event_age() > self.config.stream_stall_threshold
        {
            warn!("event stream looks stalled; forcing reconnect");
            self.stream.force_restart();
            self.observer.emit(Observation::HeartbeatRecovery {
                reason: HeartbeatRecoveryReason::StreamStalled,
            });
        }
    }

    /// Spec §4.6: `queued`/`inflight` are summed across *both* directions
    /// into one combined check, not evaluated per-direction — a download
    /// flood sitting behind a single busy upload worker isn't "stuck", the
    /// executor as a whole is still making progress.
    async fn check_stuck_queues(&self) {
        let queued = self.executor.queued_count(TransferDirection::Upload).await
            + self.executor.queued_count(TransferDirection::Download).await;
        let inflight = self.executor.inflight_count(TransferDirection::Upload)
            + self.executor.inflight_count(TransferDirection::Download);

        let mut counter = self.stuck_ticks.lock().await;
        if queued > 0 && inflight == 0 {
            *counter += 1;
            if *counter >= STUCK_QUEUE_TICK_THRESHOLD {
                warn!(queued, "transfer queues look stuck; reviving dispatcher");
                *counter = 0;
                drop(counter);
                self.executor.resume();
                self.executor.ensure_workers().await;
                self.observer.emit(Observation::HeartbeatRecovery {
                    reason: HeartbeatRecoveryReason::StuckQueue,
                });
            }
        } else {
            *counter = 0;
        }
    }

    /// Demotes `in_progress` (and, if `demote_errors`, `error`) transfer
    /// statuses back to `queued` and re-enqueues them. Runs at most once
    /// per `Heartbeat` instance: a `Heartbeat` lives for the whole
    /// `FileSync::start()`/`stop()` lifecycle, so this fires exactly once
    /// even though the leadership gate may call it again on every
    /// reacquisition after a transient loss (spec §4.6: "runs exactly once
    /// per start() lifecycle").
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if reading or writing state fails.
    #[instrument(skip(self))]
    pub async fn recover_stale_transfers(&self, demote_errors: bool) -> Result<(), CatalogError> {
        if self.recovered_once.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let changed = self.state.demote_active_transfers(demote_errors).await?;
        for (file_id, direction) in &changed {
            match direction {
                TransferDirection::Upload => self.executor.enqueue_upload(file_id.clone()).await,
                TransferDirection::Download => self.executor.enqueue_download(file_id.clone()).await,
            }
        }

        if !changed.is_empty() {
            let file_ids = changed.into_iter().map(|(file_id, _)| file_id).collect();
            self.observer.emit(Observation::ErrorRetryStart { file_ids });
        }
        Ok(())
    }
}
