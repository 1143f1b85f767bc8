//! Transient network failures must be retried by the executor rather than
//! surfaced as a permanent error, and a sustained outage must be detected
//! by the connectivity loop and recovered from once the remote comes back.

use std::sync::Arc;
use std::time::Duration;

use filesync_core::executor::ExecutorConfig;
use filesync_core::{
    Catalog, ConnectivityLoop, Database, FsLocalStore, LocalFileStateStore, LocalStore,
    ObservationEmitter, RemoteStore, SqliteCatalog, TransferExecutor, TransferStatus,
};

use crate::support::FlakyRemote;

async fn harness() -> (
    Arc<dyn Catalog>,
    Arc<dyn LocalStore>,
    Arc<FlakyRemote>,
    Arc<LocalFileStateStore>,
    Arc<TransferExecutor>,
    tempfile::TempDir,
) {
    let db = Database::new_in_memory().await.expect("create db");
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
    let dir = tempfile::tempdir().expect("tempdir");
    let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
    let remote = Arc::new(FlakyRemote::new());
    let remote_trait: Arc<dyn RemoteStore> = remote.clone();
    let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.expect("load state"));
    let executor = Arc::new(TransferExecutor::new(
        catalog.clone(),
        local.clone(),
        remote_trait,
        state.clone(),
        Arc::new(ObservationEmitter::new()),
        ExecutorConfig {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            ..ExecutorConfig::default()
        },
    ));
    (catalog, local, remote, state, executor, dir)
}

#[tokio::test]
async fn upload_survives_transient_failures_and_eventually_completes() {
    let (catalog, local, remote, state, executor, _dir) = harness().await;

    local.write_file("files/ab/h1", b"hello").await.expect("write");
    catalog
        .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
        .await
        .expect("commit created");

    remote.fail_next_uploads(2);
    executor.start().await;
    executor.enqueue_upload("f1".to_string()).await;

    let mut record = catalog.get_file(&"f1".to_string()).await.expect("get file").expect("exists");
    for _ in 0..100 {
        record = catalog.get_file(&"f1".to_string()).await.expect("get file").expect("exists");
        if record.has_remote_key() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(record.has_remote_key(), "upload should eventually succeed after retries");
    let entry = state.get(&"f1".to_string()).await.expect("entry");
    assert_eq!(entry.upload_status, TransferStatus::Done);
}

#[tokio::test]
async fn going_offline_then_online_requeues_stalled_transfers() {
    let (catalog, local, remote, state, executor, _dir) = harness().await;

    local.write_file("files/ab/h1", b"hello").await.expect("write");
    catalog
        .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
        .await
        .expect("commit created");
    state
        .set_transfer_status(
            &"f1".to_string(),
            filesync_core::TransferDirection::Upload,
            TransferStatus::InProgress,
        )
        .await
        .expect("mark in progress");

    remote.set_healthy(false);
    let connectivity = Arc::new(ConnectivityLoop::new(
        remote.clone() as Arc<dyn RemoteStore>,
        state.clone(),
        executor.clone(),
        Arc::new(ObservationEmitter::new()),
        filesync_core::connectivity::ConnectivityConfig {
            health_check_interval: Duration::from_millis(20),
        },
    ));
    tokio::spawn(connectivity.clone().run());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!connectivity.is_online());
    let entry = state.get(&"f1".to_string()).await.expect("entry");
    assert_eq!(entry.upload_status, TransferStatus::Queued, "offline demotes in-progress to queued");

    remote.set_healthy(true);
    executor.start().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(connectivity.is_online());

    let mut record = catalog.get_file(&"f1".to_string()).await.expect("get file").expect("exists");
    for _ in 0..100 {
        record = catalog.get_file(&"f1".to_string()).await.expect("get file").expect("exists");
        if record.has_remote_key() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(record.has_remote_key(), "reconnect should requeue and complete the stalled upload");
}

#[tokio::test]
async fn going_offline_does_not_clear_existing_errors() {
    let (catalog, local, remote, state, executor, _dir) = harness().await;

    local.write_file("files/ab/h1", b"hello").await.expect("write");
    catalog
        .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
        .await
        .expect("commit created");
    state
        .set_transfer_error(&"f1".to_string(), filesync_core::TransferDirection::Upload, "gave up".to_string())
        .await
        .expect("mark error");

    remote.set_healthy(false);
    let connectivity = Arc::new(ConnectivityLoop::new(
        remote.clone() as Arc<dyn RemoteStore>,
        state.clone(),
        executor.clone(),
        Arc::new(ObservationEmitter::new()),
        filesync_core::connectivity::ConnectivityConfig {
            health_check_interval: Duration::from_millis(20),
        },
    ));
    tokio::spawn(connectivity.clone().run());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!connectivity.is_online());

    let entry = state.get(&"f1".to_string()).await.expect("entry");
    assert_eq!(
        entry.upload_status,
        TransferStatus::Error,
        "going offline must not clear a pre-existing error status"
    );
}
