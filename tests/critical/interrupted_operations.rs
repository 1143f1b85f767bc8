//! Cancelling a queued download must prevent it from ever reaching the
//! remote, without disturbing unrelated queued work.

use std::sync::Arc;
use std::time::Duration;

use filesync_core::executor::ExecutorConfig;
use filesync_core::hash::hash_bytes;
use filesync_core::{
    Catalog, Database, FsLocalStore, LocalFileStateStore, LocalStore, ObservationEmitter,
    RemoteStore, SqliteCatalog, TransferExecutor, TransferStatus,
};

use crate::support::FlakyRemote;

#[tokio::test]
async fn cancelled_download_never_completes() {
    let db = Database::new_in_memory().await.expect("create db");
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
    let dir = tempfile::tempdir().expect("tempdir");
    let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
    let remote = Arc::new(FlakyRemote::new());

    catalog
        .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
        .await
        .expect("commit created");
    catalog
        .commit_remote_key(&"f1".to_string(), "remote-h1")
        .await
        .expect("commit remote key");
    remote
        .upload(b"hello".to_vec(), "h1", Box::new(|_, _| {}))
        .await
        .expect("seed remote blob");

    let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.expect("load state"));
    let executor = Arc::new(TransferExecutor::new(
        catalog.clone(),
        local.clone(),
        remote.clone() as Arc<dyn RemoteStore>,
        state.clone(),
        Arc::new(ObservationEmitter::new()),
        ExecutorConfig::default(),
    ));

    executor.pause();
    executor.start().await;
    executor.enqueue_download("f1".to_string()).await;
    executor.cancel_download(&"f1".to_string()).await;
    executor.resume();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        !local.file_exists("files/ab/h1").await.expect("file_exists"),
        "a cancelled download must never write bytes locally"
    );
    let entry = state.get(&"f1".to_string()).await.expect("entry");
    assert_ne!(entry.download_status, TransferStatus::Done);
}

#[tokio::test]
async fn cancelling_one_download_does_not_affect_another_queued_download() {
    let db = Database::new_in_memory().await.expect("create db");
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
    let dir = tempfile::tempdir().expect("tempdir");
    let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(dir.path()));
    let remote = Arc::new(FlakyRemote::new());

    for (file_id, path, bytes) in [
        ("f1", "files/ab/h1", b"first".to_vec()),
        ("f2", "files/cd/h2", b"second".to_vec()),
    ] {
        let content_hash = hash_bytes(&bytes);
        catalog
            .commit_file_created(&file_id.to_string(), path, &content_hash)
            .await
            .expect("commit created");
        let key = remote
            .upload(bytes, &content_hash, Box::new(|_, _| {}))
            .await
            .expect("seed remote blob");
        catalog
            .commit_remote_key(&file_id.to_string(), &key)
            .await
            .expect("commit remote key");
    }

    let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.expect("load state"));
    let executor = Arc::new(TransferExecutor::new(
        catalog.clone(),
        local.clone(),
        remote.clone() as Arc<dyn RemoteStore>,
        state.clone(),
        Arc::new(ObservationEmitter::new()),
        ExecutorConfig::default(),
    ));

    executor.enqueue_download("f1".to_string()).await;
    executor.enqueue_download("f2".to_string()).await;
    executor.cancel_download(&"f1".to_string()).await;
    executor.start().await;

    for _ in 0..100 {
        let entry = state.get(&"f2".to_string()).await.expect("entry");
        if entry.download_status == TransferStatus::Done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!local.file_exists("files/ab/h1").await.expect("file_exists"));
    let f2_entry = state.get(&"f2".to_string()).await.expect("entry");
    assert_eq!(f2_entry.download_status, TransferStatus::Done);
}
