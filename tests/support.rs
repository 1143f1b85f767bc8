//! Shared test doubles for the critical test matrix.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use filesync_core::{ProgressCallback, RemoteStore, TransferError};

/// A `RemoteStore` whose `upload`/`download` can be told to fail a fixed
/// number of times before succeeding, and whose health can be toggled, for
/// exercising retry and connectivity recovery paths.
#[derive(Default)]
pub struct FlakyRemote {
    blobs: StdMutex<Vec<(String, Vec<u8>)>>,
    upload_failures_remaining: AtomicUsize,
    download_failures_remaining: AtomicUsize,
    healthy: std::sync::atomic::AtomicBool,
}

impl FlakyRemote {
    pub fn new() -> Self {
        Self {
            blobs: StdMutex::new(Vec::new()),
            upload_failures_remaining: AtomicUsize::new(0),
            download_failures_remaining: AtomicUsize::new(0),
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn fail_next_uploads(&self, count: usize) {
        self.upload_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_downloads(&self, count: usize) {
        self.download_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        key_hint: &str,
        mut on_progress: ProgressCallback,
    ) -> Result<String, TransferError> {
        if self
            .upload_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then_some(n - 1))
            .is_ok()
        {
            return Err(TransferError::Transient("simulated upload failure".to_string()));
        }
        on_progress(bytes.len() as u64, bytes.len() as u64);
        let key = format!("remote-{key_hint}");
        self.blobs.lock().unwrap().push((key.clone(), bytes));
        Ok(key)
    }

    async fn download(&self, key: &str, mut on_progress: ProgressCallback) -> Result<Vec<u8>, TransferError> {
        if self
            .download_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then_some(n - 1))
            .is_ok()
        {
            return Err(TransferError::Transient("simulated download failure".to_string()));
        }
        let blobs = self.blobs.lock().unwrap();
        let found = blobs.iter().find(|(k, _)| k == key).cloned();
        drop(blobs);
        match found {
            Some((_, bytes)) => {
                on_progress(bytes.len() as u64, bytes.len() as u64);
                Ok(bytes)
            }
            None => Err(TransferError::FileGoneDuringTransfer),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), TransferError> {
        self.blobs.lock().unwrap().retain(|(k, _)| k != key);
        Ok(())
    }

    async fn check_health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn get_download_url(&self, key: &str) -> String {
        key.to_string()
    }
}
