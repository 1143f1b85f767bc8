//! Event Stream Consumer: turns the catalog's append-only event log into a
//! live feed of reconcile passes, with bootstrap replay and crash-resistant
//! cursor persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::error::{CatalogError, FileSyncError};
use crate::model::{CatalogEvent, CatalogEventKind};
use crate::observation::{Observation, ObservationEmitter};
use crate::reconcile::Reconciler;
use crate::traits::Catalog;

/// Reconnect tuning for the event stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub max_recovery_attempts: u32,
    pub recovery_base_delay: Duration,
    pub recovery_max_delay: Duration,
    /// Total wall-clock budget across a run of consecutive reconnect
    /// attempts; reset once a connection is held long enough to deliver an
    /// event. Bounds recovery even if `max_recovery_attempts` alone would
    /// allow a very long tail of fast-failing retries.
    pub recovery_deadline: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 5,
            recovery_base_delay: Duration::from_secs(1),
            recovery_max_delay: Duration::from_secs(60),
            recovery_deadline: Duration::from_secs(10 * 60),
        }
    }
}

enum ConsumeOutcome {
    /// Another fiber (the heartbeat) asked for a forced reconnect.
    Restarted,
    Error(CatalogError),
}

/// Drives the catalog's filtered event subscription into the reconciler,
/// from a persisted cursor, with exponential-backoff reconnects.
pub struct EventStreamConsumer {
    catalog: Arc<dyn Catalog>,
    reconciler: Arc<Reconciler>,
    observer: Arc<ObservationEmitter>,
    config: StreamConfig,
    last_event_at: StdMutex<Instant>,
    /// Set once the stream has delivered at least one batch, so the stall
    /// check never fires against a freshly started, legitimately quiet
    /// stream (spec: "we have processed at least one batch").
    has_processed_any: AtomicBool,
    restart: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamConsumer {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        reconciler: Arc<Reconciler>,
        observer: Arc<ObservationEmitter>,
        config: StreamConfig,
    ) -> Self {
        Self {
            catalog,
            reconciler,
            observer,
            config,
            last_event_at: StdMutex::new(Instant::now()),
            has_processed_any: AtomicBool::new(false),
            restart: Notify::new(),
            handle: Mutex::new(None),
        }
    }

    /// Whether at least one event has been reconciled since this consumer
    /// was constructed.
    #[must_use]
    pub fn has_processed_any(&self) -> bool {
        self.has_processed_any.load(Ordering::SeqCst)
    }

    /// Makes sure the subscribe-reconcile-checkpoint loop is running,
    /// (re)spawning it if it has never started or has exited (panicked, hit
    /// [`Self::run`]'s exhaustion return, or was aborted by [`Self::stop`]).
    /// Returns `true` if a fresh task was spawned, so the heartbeat can tell
    /// a dead fiber apart from one that was already alive.
    pub async fn ensure_running(self: &Arc<Self>) -> bool {
        let mut guard = self.handle.lock().await;
        let needs_spawn = guard.as_ref().is_none_or(JoinHandle::is_finished);
        if needs_spawn {
            let this = self.clone();
            *guard = Some(tokio::spawn(async move { this.run().await }));
        }
        needs_spawn
    }

    /// Aborts the running subscribe loop, if any. Used when leadership is
    /// lost and by the top-level `stop()` lifecycle.
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    /// How long it has been since an event was last delivered (or since
    /// construction, if none ever has). Used by the heartbeat to detect a
    /// stalled stream that hasn't surfaced an error.
    #[must_use]
    pub fn last_event_age(&self) -> Duration {
        self.last_event_at.lock().expect("last_event_at mutex poisoned").elapsed()
    }

    /// Forces the current subscription to be torn down and reopened from
    /// the persisted cursor. Used by the heartbeat's stall recovery.
    pub fn force_restart(&self) {
        self.restart.notify_waiters();
    }

    /// Replays every live catalog record as a synthetic `file_updated`
    /// reconcile pass. Run once at startup, before subscribing, so a file
    /// that changed while this client was offline is still reconciled even
    /// though its creation event already scrolled past the stream.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError`] if the snapshot read or any reconcile pass
    /// fails.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<(), FileSyncError> {
        let snapshot = self.catalog.snapshot().await?;
        for record in snapshot {
            let synthetic = CatalogEvent {
                sequence: 0,
                kind: CatalogEventKind::FileUpdated {
                    file_id: record.file_id,
                    path: record.path,
                    content_hash: record.content_hash,
                    remote_key: record.remote_key,
                },
            };
            self.reconciler.reconcile_event(&synthetic).await?;
        }
        // Bootstrap has just observed every live record directly; skip
        // straight to the current head so the subsequent subscribe doesn't
        // replay events the snapshot already accounted for (spec §4.3).
        let head = self.catalog.current_head().await?;
        self.catalog.commit_cursor(head).await?;
        Ok(())
    }

    /// Runs the subscribe-reconcile-checkpoint loop until recovery is
    /// exhausted. Intended to be spawned as a long-lived task.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        let mut attempt = 0u32;
        let mut recovery_started: Option<Instant> = None;

        loop {
            let cursor = match self.catalog.get_cursor().await {
                Ok(cursor) => cursor,
                Err(err) => {
                    warn!(error = %err, "failed to read sync cursor; retrying shortly");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            match self.consume_from(cursor).await {
                ConsumeOutcome::Restarted => {
                    attempt = 0;
                    recovery_started = None;
                }
                ConsumeOutcome::Error(err) => {
                    self.observer.emit(Observation::StreamError {
                        message: err.to_string(),
                    });

                    let started = *recovery_started.get_or_insert_with(Instant::now);
                    attempt += 1;

                    if attempt > self.config.max_recovery_attempts
                        || started.elapsed() >= self.config.recovery_deadline
                    {
                        self.observer
                            .emit(Observation::StreamExhausted { attempts: attempt });
                        return;
                    }

                    self.observer.emit(Observation::StreamRecovery { attempt });
                    sleep(backoff_delay(&self.config, attempt)).await;
                }
            }
        }
    }

    async fn consume_from(&self, cursor: i64) -> ConsumeOutcome {
        let mut stream = match self.catalog.subscribe(cursor).await {
            Ok(stream) => stream,
            Err(err) => return ConsumeOutcome::Error(err),
        };

        loop {
            tokio::select! {
                () = self.restart.notified() => return ConsumeOutcome::Restarted,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            *self.last_event_at.lock().expect("last_event_at mutex poisoned") = Instant::now();
                            self.has_processed_any.store(true, Ordering::SeqCst);
                            if let Err(err) = self.reconciler.reconcile_event(&event).await {
                                warn!(error = %err, sequence = event.sequence, "reconcile failed for event");
                            }
                            if let Err(err) = self.catalog.commit_cursor(event.sequence).await {
                                warn!(error = %err, "failed to persist sync cursor");
                            }
                        }
                        Some(Err(err)) => return ConsumeOutcome::Error(err),
                        None => {
                            return ConsumeOutcome::Error(CatalogError::StreamExhausted {
                                attempts: 0,
                                last_error: "event stream closed unexpectedly".to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
}

fn backoff_delay(config: &StreamConfig, attempt: u32) -> Duration {
    let base_ms = config.recovery_base_delay.as_millis() as f64;
    let exponent = f64::from(attempt.saturating_sub(1));
    let delay_ms = (base_ms * 2f64.powf(exponent)).min(config.recovery_max_delay.as_millis() as f64);
    let jitter_ms = rand::thread_rng().gen_range(0..=500);
    Duration::from_millis(delay_ms as u64) + Duration::from_millis(jitter_ms)
}
