//! Demo entry point: wires up a `FileSync` instance against a local
//! `SQLite` file, a local cache directory, and an HTTP remote, then saves
//! one file and reports what happened.
//!
//! Usage: `filesync-demo <remote-base-url> [local-cache-dir] [db-path]`

use std::path::PathBuf;

use filesync_core::{Database, FileSync, FileSyncConfig};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let Some(remote_base_url) = args.next() else {
        info!("Usage: filesync-demo <remote-base-url> [local-cache-dir] [db-path]");
        return Ok(());
    };
    let local_cache_dir = args
        .next()
        .map_or_else(|| PathBuf::from("./filesync-demo-cache"), PathBuf::from);
    let db_path = args.next();

    let db = match db_path {
        Some(path) => Database::new(&PathBuf::from(path)).await?,
        None => Database::new_in_memory().await?,
    };

    // Single-instance deployment: always the leader.
    let (_leadership_tx, leadership_rx) = watch::channel(true);

    let sync = FileSync::new(
        &db,
        local_cache_dir,
        remote_base_url,
        leadership_rx,
        FileSyncConfig::default(),
    )
    .await?;

    let mut observations = sync.observer.subscribe();
    tokio::spawn(async move {
        while let Ok(observation) = observations.recv().await {
            info!(?observation, "observation");
        }
    });

    sync.start().await;

    let record = sync
        .crud
        .save_file("demo-file".to_string(), "text/plain", b"hello, filesync".to_vec())
        .await?;
    info!(file_id = %record.file_id, content_hash = %record.content_hash, "saved demo file");

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    match sync.crud.resolve_file_url(&"demo-file".to_string()).await {
        Ok(url) => info!(url, "resolved demo file"),
        Err(err) => warn!(error = %err, "could not resolve demo file"),
    }

    sync.stop().await;
    Ok(())
}
