//! Reference [`RemoteStore`] backed by a plain HTTP object endpoint.
//!
//! Grounded on the teacher's download engine (`reqwest::Client`, streamed
//! bodies, progress reported via chunk counters) but generalized to also
//! cover uploads and deletes, since the remote here is a read/write object
//! repository rather than a one-directional download source.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::instrument;

use crate::error::TransferError;
use crate::traits::{ProgressCallback, RemoteStore};

fn classify_reqwest_error(error: &reqwest::Error) -> TransferError {
    if error.is_connect() || error.is_timeout() {
        TransferError::Connectivity(error.to_string())
    } else {
        TransferError::Transient(error.to_string())
    }
}

/// `RemoteStore` implementation that treats the remote as `{base_url}/{key}`
/// object storage: `PUT` to upload, `GET` to download, `DELETE` to remove,
/// and a `HEAD /` health probe.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    #[instrument(skip(self, bytes, on_progress))]
    async fn upload(
        &self,
        bytes: Vec<u8>,
        key_hint: &str,
        mut on_progress: ProgressCallback,
    ) -> Result<String, TransferError> {
        let total = bytes.len() as u64;
        on_progress(0, total);

        let response = self
            .client
            .put(self.object_url(key_hint))
            .body(bytes)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !response.status().is_success() {
            return Err(TransferError::Transient(format!(
                "upload rejected with status {}",
                response.status()
            )));
        }

        on_progress(total, total);
        Ok(key_hint.to_string())
    }

    #[instrument(skip(self, on_progress))]
    async fn download(
        &self,
        key: &str,
        mut on_progress: ProgressCallback,
    ) -> Result<Vec<u8>, TransferError> {
        let response = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransferError::FileGoneDuringTransfer);
        }
        if !response.status().is_success() {
            return Err(TransferError::Transient(format!(
                "download rejected with status {}",
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(0);
        let mut downloaded = 0u64;
        let mut buffer = Vec::with_capacity(total as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify_reqwest_error(&e))?;
            downloaded += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            on_progress(downloaded, total);
        }

        Ok(buffer)
    }

    async fn delete(&self, key: &str) -> Result<(), TransferError> {
        let response = self
            .client
            .delete(self.object_url(key))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(TransferError::Transient(format!(
                "delete rejected with status {}",
                response.status()
            )))
        }
    }

    async fn check_health(&self) -> bool {
        self.client
            .head(&self.base_url)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success() || response.status().is_redirection())
    }

    fn get_download_url(&self, key: &str) -> String {
        self.object_url(key)
    }
}
