//! Process restart: a file-backed catalog must survive a dropped and
//! reopened `Database`, with the sync cursor and any in-flight transfer
//! state intact for the heartbeat's stale-transfer recovery to act on.

use std::sync::Arc;

use filesync_core::{Catalog, Database, LocalFileStateStore, SqliteCatalog, TransferDirection, TransferStatus};
use tempfile::TempDir;

#[tokio::test]
async fn cursor_and_in_progress_state_survive_reopen() {
    let temp_dir = TempDir::new().expect("temp dir");
    let db_path = temp_dir.path().join("crash.db");

    {
        let db = Database::new(&db_path).await.expect("create db");
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
        catalog
            .commit_file_created(&"f1".to_string(), "files/ab/h1", "h1")
            .await
            .expect("commit created");
        let state = LocalFileStateStore::load(catalog.clone()).await.expect("load state");
        state
            .set_transfer_status(&"f1".to_string(), TransferDirection::Upload, TransferStatus::InProgress)
            .await
            .expect("set in-progress");
        catalog.commit_cursor(1).await.expect("commit cursor");
        db.close().await;
        // db, catalog, and state all drop here, simulating an abrupt restart
        // mid-upload.
    }

    let db = Database::new(&db_path).await.expect("reopen db");
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));

    assert_eq!(catalog.get_cursor().await.expect("get cursor"), 1);

    let state = LocalFileStateStore::load(catalog.clone()).await.expect("load state");
    let entry = state.get(&"f1".to_string()).await.expect("entry survives restart");
    assert_eq!(entry.upload_status, TransferStatus::InProgress);

    let changed = state.demote_active_transfers(false).await.expect("demote");
    assert_eq!(changed, vec![("f1".to_string(), TransferDirection::Upload)]);

    let entry = state.get(&"f1".to_string()).await.expect("entry");
    assert_eq!(entry.upload_status, TransferStatus::Queued);
}
