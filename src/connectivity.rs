//! Connectivity Loop: periodic remote health checks that drive the
//! online/offline transitions the rest of the core reacts to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use async_trait::async_trait;

use crate::executor::TransferExecutor;
use crate::model::TransferStatus;
use crate::observation::{Observation, ObservationEmitter};
use crate::state::LocalFileStateStore;
use crate::traits::{ConnectivityProbe, RemoteStore};

#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    pub health_check_interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
        }
    }
}

/// Polls [`RemoteStore::check_health`] and reacts to edge transitions.
/// Starts optimistic (`online`) so a client with a momentarily-unreachable
/// remote at boot still attempts its first sync pass rather than sitting
/// idle until the first tick.
pub struct ConnectivityLoop {
    remote: Arc<dyn RemoteStore>,
    state: Arc<LocalFileStateStore>,
    executor: Arc<TransferExecutor>,
    observer: Arc<ObservationEmitter>,
    config: ConnectivityConfig,
    online: AtomicBool,
}

impl ConnectivityLoop {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        state: Arc<LocalFileStateStore>,
        executor: Arc<TransferExecutor>,
        observer: Arc<ObservationEmitter>,
        config: ConnectivityConfig,
    ) -> Self {
        Self {
            remote,
            state,
            executor,
            observer,
            config,
            online: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Runs the periodic health-check loop forever. Intended to be spawned
    /// as a long-lived task.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        loop {
            ticker.tick().await;
            self.check().await;
        }
    }

    /// Runs one health check immediately instead of waiting for the next
    /// tick. Called by a transfer worker right after a failure so a
    /// sustained outage is detected eagerly rather than on the next
    /// `health_check_interval` tick.
    #[instrument(skip(self))]
    pub async fn check(&self) {
        let healthy = self.remote.check_health().await;
        let was_online = self.online.swap(healthy, Ordering::SeqCst);

        if healthy && !was_online {
            info!("remote reachable again; resuming transfers");
            self.observer.emit(Observation::Online);
            self.go_online().await;
        } else if !healthy && was_online {
            warn!("remote unreachable; pausing in-flight transfers");
            self.observer.emit(Observation::Offline);
            self.go_offline().await;
        }
    }

    /// Pauses the executor, then demotes `in_progress` transfers back to
    /// `queued` and re-enqueues them. Leaves `error` transfers alone: a
    /// connectivity blip didn't cause those, so going offline shouldn't
    /// quietly clear and retry them.
    async fn go_offline(&self) {
        self.executor.pause();
        match self.state.demote_active_transfers(false).await {
            Ok(changed) => {
                for (file_id, direction) in changed {
                    match direction {
                        crate::model::TransferDirection::Upload => {
                            self.executor.enqueue_upload(file_id).await;
                        }
                        crate::model::TransferDirection::Download => {
                            self.executor.enqueue_download(file_id).await;
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to demote active transfers while going offline"),
        }
    }

    /// Resumes the executor, re-enqueues anything left sitting at
    /// `queued`, and makes sure the dispatcher loops are alive, in case
    /// they were stopped while offline.
    async fn go_online(&self) {
        self.executor.resume();
        for (file_id, entry) in self.state.all().await {
            if entry.upload_status == TransferStatus::Queued {
                self.executor.enqueue_upload(file_id.clone()).await;
            }
            if entry.download_status == TransferStatus::Queued {
                self.executor.enqueue_download(file_id).await;
            }
        }
        self.executor.ensure_workers().await;
    }
}

#[async_trait]
impl ConnectivityProbe for ConnectivityLoop {
    async fn probe(&self) {
        self.check().await;
    }
}
