//! Simulates a client that crashes before it can upload a newly-saved file,
//! then restarts: the event stream's bootstrap replay must rediscover the
//! file from the catalog snapshot and queue its upload, even though the
//! original `file_created` event already scrolled past any fresh
//! subscription cursor.

use std::sync::Arc;

use filesync_core::hash::hash_bytes;
use filesync_core::{
    Catalog, Database, EventStreamConsumer, FsLocalStore, LocalFileStateStore, LocalStore,
    ObservationEmitter, Reconciler, RemoteStore, SqliteCatalog, TransferExecutor, TransferStatus,
};
use filesync_core::executor::ExecutorConfig;
use filesync_core::stream::StreamConfig;
use tempfile::TempDir;

struct NullRemote;

#[async_trait::async_trait]
impl RemoteStore for NullRemote {
    async fn upload(
        &self,
        _bytes: Vec<u8>,
        key_hint: &str,
        _on_progress: filesync_core::ProgressCallback,
    ) -> Result<String, filesync_core::TransferError> {
        Ok(format!("remote-{key_hint}"))
    }
    async fn download(
        &self,
        _key: &str,
        _on_progress: filesync_core::ProgressCallback,
    ) -> Result<Vec<u8>, filesync_core::TransferError> {
        Ok(vec![])
    }
    async fn delete(&self, _key: &str) -> Result<(), filesync_core::TransferError> {
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
async fn bootstrap_after_restart_rediscovers_unsynced_file() {
    let temp_dir = TempDir::new().expect("temp dir");
    let db_path = temp_dir.path().join("power.db");
    let cache_dir = TempDir::new().expect("cache dir");
    let bytes = b"not yet uploaded when the power died".to_vec();
    let content_hash = hash_bytes(&bytes);

    {
        let db = Database::new(&db_path).await.expect("create db");
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
        let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(cache_dir.path()));

        local.write_file("files/ab/h1", &bytes).await.expect("write file");
        catalog
            .commit_file_created(&"f1".to_string(), "files/ab/h1", &content_hash)
            .await
            .expect("commit created");
        // No subscribe/consume ever ran, and no upload was attempted: the
        // process "died" right after the catalog commit.
        db.close().await;
    }

    // Restart: fresh catalog handle, fresh in-memory state, nothing queued yet.
    let db = Database::new(&db_path).await.expect("reopen db");
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
    let local: Arc<dyn LocalStore> = Arc::new(FsLocalStore::new(cache_dir.path()));
    let state = Arc::new(LocalFileStateStore::load(catalog.clone()).await.expect("load state"));
    let executor = Arc::new(TransferExecutor::new(
        catalog.clone(),
        local.clone(),
        Arc::new(NullRemote) as Arc<dyn RemoteStore>,
        state.clone(),
        Arc::new(ObservationEmitter::new()),
        ExecutorConfig::default(),
    ));
    let reconciler = Arc::new(Reconciler::new(local, state.clone(), executor.clone()));
    let observer = Arc::new(ObservationEmitter::new());
    let consumer = EventStreamConsumer::new(catalog.clone(), reconciler, observer, StreamConfig::default());

    assert!(
        state.get(&"f1".to_string()).await.is_none(),
        "freshly loaded state should not yet know about f1's local bytes"
    );

    consumer.bootstrap().await.expect("bootstrap replay");

    let entry = state.get(&"f1".to_string()).await.expect("entry discovered by bootstrap");
    assert_eq!(entry.upload_status, TransferStatus::Queued);

    executor.start().await;
    for _ in 0..100 {
        let record = catalog.get_file(&"f1".to_string()).await.expect("get file").expect("exists");
        if record.has_remote_key() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("rediscovered upload never completed");
}
