//! Concurrent state mutation: multiple fibers racing to update the same
//! file's sync state must never lose an update or leave the in-memory
//! projection and the catalog's mirror disagreeing.

use std::sync::Arc;

use filesync_core::{Catalog, Database, LocalFileStateStore, SqliteCatalog, TransferDirection, TransferStatus};

async fn store() -> (Arc<dyn Catalog>, LocalFileStateStore) {
    let db = Database::new_in_memory().await.expect("create db");
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(&db));
    let state = LocalFileStateStore::load(catalog.clone()).await.expect("load state");
    (catalog, state)
}

#[tokio::test]
async fn concurrent_atomic_updates_never_lose_a_write() {
    let (_catalog, state) = store().await;
    let state = Arc::new(state);
    let file_id = "f1".to_string();

    let mut handles = Vec::new();
    for i in 0..50 {
        let state = state.clone();
        let file_id = file_id.clone();
        handles.push(tokio::spawn(async move {
            state
                .atomic_update(&file_id, "files/ab/h1", move |entry| {
                    entry.local_hash = format!("hash-{i}");
                })
                .await
                .expect("atomic update");
        }));
    }

    for handle in handles {
        handle.await.expect("task join");
    }

    let entry = state.get(&file_id).await.expect("entry exists");
    assert!(entry.local_hash.starts_with("hash-"));
}

#[tokio::test]
async fn concurrent_status_flips_settle_on_a_consistent_final_state() {
    let (_catalog, state) = store().await;
    let state = Arc::new(state);
    let file_id = "f1".to_string();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let state = state.clone();
        let file_id = file_id.clone();
        handles.push(tokio::spawn(async move {
            state
                .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::Queued)
                .await
                .expect("set status");
        }));
    }
    for _ in 0..20 {
        let state = state.clone();
        let file_id = file_id.clone();
        handles.push(tokio::spawn(async move {
            state
                .set_transfer_status(&file_id, TransferDirection::Upload, TransferStatus::Done)
                .await
                .expect("set status");
        }));
    }

    for handle in handles {
        handle.await.expect("task join");
    }

    let entry = state.get(&file_id).await.expect("entry exists");
    assert!(matches!(
        entry.upload_status,
        TransferStatus::Queued | TransferStatus::Done
    ));
}
