//! Per-transfer upload/download logic run by the executor's worker tasks.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::config::ExecutorConfig;
use super::retry::{decide, RetryDecision};
use crate::error::TransferError;
use crate::hash::hash_bytes;
use crate::model::{FileId, TransferDirection, TransferStatus};
use crate::observation::{Observation, ObservationEmitter};
use crate::state::LocalFileStateStore;
use crate::traits::{Catalog, ConnectivityProbe, LocalStore, RemoteStore};

/// Shared collaborators a worker task needs; cheap to clone (all `Arc`s).
///
/// `connectivity` is a late-bound `OnceLock` rather than a constructor
/// argument because [`crate::connectivity::ConnectivityLoop`] itself holds
/// a reference to the executor — wiring it in eagerly would be circular.
/// [`super::TransferExecutor::set_connectivity_probe`] fills it in once,
/// after both sides exist; every already-cloned `WorkerContext` observes
/// the same cell, so workers spawned before and after the call both see it.
#[derive(Clone)]
pub struct WorkerContext {
    pub catalog: Arc<dyn Catalog>,
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub state: Arc<LocalFileStateStore>,
    pub observer: Arc<ObservationEmitter>,
    pub config: ExecutorConfig,
    pub connectivity: Arc<std::sync::OnceLock<Arc<dyn ConnectivityProbe>>>,
}

/// Runs a single upload to completion (success or permanent failure),
/// retrying transient errors per [`ExecutorConfig`].
#[instrument(skip(ctx), fields(file_id = %file_id))]
pub async fn run_upload(ctx: WorkerContext, file_id: FileId) {
    let record = match ctx.catalog.get_file(&file_id).await {
        Ok(Some(record)) if !record.is_tombstoned() => record,
        Ok(_) => {
            debug!("upload target no longer exists in catalog; dropping");
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to read catalog record before upload");
            let _ = ctx
                .state
                .set_transfer_error(&file_id, TransferDirection::Upload, err.to_string())
                .await;
            return;
        }
    };

    let bytes = match ctx.local.read_file(&record.path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "local read failed before upload");
            let _ = ctx
                .state
                .set_transfer_error(&file_id, TransferDirection::Upload, err.to_string())
                .await;
            ctx.observer.emit(Observation::UploadError {
                file_id,
                message: err.to_string(),
            });
            return;
        }
    };

    let _ = ctx
        .state
        .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::InProgress)
        .await;
    ctx.observer.emit(Observation::UploadStart {
        file_id: file_id.clone(),
    });

    let mut attempt = 1;
    loop {
        let progress = ctx.observer.upload_progress_callback(file_id.clone());
        match ctx
            .remote
            .upload(bytes.clone(), &record.content_hash, progress)
            .await
        {
            Ok(remote_key) => {
                // The record we read before the upload may have been
                // tombstoned while the bytes were in flight; re-check
                // before stamping a remote key onto a deleted file (spec
                // §4.5 step 2: "for upload-in-flight, delete any
                // just-uploaded remote key").
                let still_live = matches!(
                    ctx.catalog.get_file(&file_id).await,
                    Ok(Some(current)) if !current.is_tombstoned()
                );
                if !still_live {
                    debug!("upload target deleted during transfer; discarding uploaded blob");
                    if let Err(err) = ctx.remote.delete(&remote_key).await {
                        warn!(error = %err, "failed to delete orphaned remote blob after late-arriving delete");
                    }
                    let _ = ctx.state.remove(&file_id).await;
                    return;
                }

                if let Err(err) = ctx.catalog.commit_remote_key(&file_id, &remote_key).await {
                    warn!(error = %err, "upload succeeded but failed to stamp remote key");
                }
                let _ = ctx
                    .state
                    .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::Done)
                    .await;
                ctx.observer.emit(Observation::UploadComplete { file_id });
                return;
            }
            Err(err) => match handle_failure(&ctx, &file_id, TransferDirection::Upload, &err, attempt).await {
                Some(next_attempt) => attempt = next_attempt,
                None => return,
            },
        }
    }
}

/// Runs a single download to completion (success or permanent failure),
/// retrying transient errors per [`ExecutorConfig`].
#[instrument(skip(ctx), fields(file_id = %file_id))]
pub async fn run_download(ctx: WorkerContext, file_id: FileId) {
    let record = match ctx.catalog.get_file(&file_id).await {
        Ok(Some(record)) if !record.is_tombstoned() => record,
        Ok(_) => {
            debug!("download target no longer exists in catalog; dropping");
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to read catalog record before download");
            let _ = ctx
                .state
                .set_transfer_error(&file_id, TransferDirection::Download, err.to_string())
                .await;
            return;
        }
    };

    if !record.has_remote_key() {
        debug!("no remote key yet; nothing to download");
        let _ = ctx
            .state
            .set_transfer_status(&file_id, TransferDirection::Download, TransferStatus::Pending)
            .await;
        return;
    }

    let _ = ctx
        .state
        .set_transfer_status(&file_id, TransferDirection::Download, TransferStatus::InProgress)
        .await;
    ctx.observer.emit(Observation::DownloadStart {
        file_id: file_id.clone(),
    });

    let mut attempt = 1;
    loop {
        let progress = ctx.observer.download_progress_callback(file_id.clone());
        let outcome = ctx.remote.download(&record.remote_key, progress).await;

        let result = outcome.and_then(|bytes| {
            let actual_hash = hash_bytes(&bytes);
            if actual_hash == record.content_hash {
                Ok(bytes)
            } else {
                Err(TransferError::Transient(format!(
                    "downloaded content hash {actual_hash} does not match catalog hash {}",
                    record.content_hash
                )))
            }
        });

        match result {
            Ok(bytes) => {
                if let Err(err) = ctx.local.write_file(&record.path, &bytes).await {
                    warn!(error = %err, "download succeeded but local write failed");
                    let _ = ctx
                        .state
                        .set_transfer_error(&file_id, TransferDirection::Download, err.to_string())
                        .await;
                    ctx.observer.emit(Observation::DownloadError {
                        file_id,
                        message: err.to_string(),
                    });
                    return;
                }
                let _ = ctx
                    .state
                    .atomic_update(&file_id, &record.path, |entry| {
                        entry.local_hash = record.content_hash.clone();
                        entry.set_status(TransferDirection::Download, TransferStatus::Done);
                        entry.last_sync_error.clear();
                    })
                    .await;
                ctx.observer.emit(Observation::DownloadComplete { file_id });
                return;
            }
            Err(err) => match handle_failure(&ctx, &file_id, TransferDirection::Download, &err, attempt).await {
                Some(next_attempt) => attempt = next_attempt,
                None => return,
            },
        }
    }
}

/// Applies the retry decision for a failed attempt: sleeps and returns the
/// next attempt number to retry, or records the permanent failure and
/// returns `None` to stop.
async fn handle_failure(
    ctx: &WorkerContext,
    file_id: &FileId,
    direction: TransferDirection,
    error: &TransferError,
    attempt: u32,
) -> Option<u32> {
    if let Some(probe) = ctx.connectivity.get() {
        probe.probe().await;
    }

    match decide(&ctx.config, error, attempt) {
        RetryDecision::Retry { delay, attempt: next_attempt } => {
            ctx.observer.emit(Observation::TransferErrorRetry {
                file_id: file_id.clone(),
                direction,
            });
            sleep(delay).await;
            Some(next_attempt)
        }
        RetryDecision::GiveUp { reason } => {
            let _ = ctx.state.set_transfer_error(file_id, direction, reason.clone()).await;
            let observation = match direction {
                TransferDirection::Upload => Observation::UploadError {
                    file_id: file_id.clone(),
                    message: reason,
                },
                TransferDirection::Download => Observation::DownloadError {
                    file_id: file_id.clone(),
                    message: reason,
                },
            };
            ctx.observer.emit(observation);
            None
        }
    }
}
