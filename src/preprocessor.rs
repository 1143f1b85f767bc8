//! Preprocessor Registry: MIME-pattern-dispatched hooks run over a file's
//! bytes before it's handed to the local store (e.g. on `save_file`).
//!
//! Modeled on the resolver registry's priority-ordered dispatch loop: every
//! registered pattern that matches is tried, most specific first — an exact
//! `"image/png"` registration runs before a `"image/*"` one, which in turn
//! runs before a catch-all `"*/*"`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::FileSyncError;
use crate::model::FileId;

/// A hook that transforms a file's bytes before they're written to the
/// local store. Implementations might strip EXIF data, recompress an
/// image, or normalize line endings in a text format.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn process(&self, file_id: &FileId, bytes: Vec<u8>) -> Result<Vec<u8>, FileSyncError>;
}

/// Lower is more specific and runs first: exact match, then same-type
/// wildcard (`type/*`), then catch-all (`*/*`). `None` means the pattern
/// doesn't match at all.
fn specificity(pattern: &str, mime: &str) -> Option<u8> {
    if pattern == mime {
        return Some(0);
    }
    if pattern == "*" || pattern == "*/*" {
        return Some(2);
    }
    let (pattern_type, pattern_subtype) = pattern.split_once('/')?;
    let (mime_type, _) = mime.split_once('/')?;
    if pattern_subtype == "*" && pattern_type == mime_type {
        return Some(1);
    }
    None
}

/// Priority-ordered collection of MIME-pattern-matched preprocessors.
pub struct PreprocessorRegistry {
    entries: Vec<(String, Arc<dyn Preprocessor>)>,
}

impl PreprocessorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a preprocessor for a MIME pattern (`"image/png"`,
    /// `"image/*"`, or `"*/*"`).
    #[instrument(skip(self, preprocessor), fields(pattern = %pattern.as_ref()))]
    pub fn register(&mut self, pattern: impl AsRef<str>, preprocessor: Arc<dyn Preprocessor>) {
        self.entries.push((pattern.as_ref().to_string(), preprocessor));
    }

    /// Returns every preprocessor whose pattern matches `mime`, most
    /// specific first, in registration order within the same specificity.
    #[must_use]
    pub fn find_handlers(&self, mime: &str) -> Vec<&Arc<dyn Preprocessor>> {
        let mut matches: Vec<(u8, &Arc<dyn Preprocessor>)> = self
            .entries
            .iter()
            .filter_map(|(pattern, handler)| specificity(pattern, mime).map(|rank| (rank, handler)))
            .collect();
        matches.sort_by_key(|(rank, _)| *rank);
        matches.into_iter().map(|(_, handler)| handler).collect()
    }

    /// Runs the single best-matching preprocessor over `bytes`: exact MIME
    /// wins over a `type/*` registration, which wins over a `*`/`*/*`
    /// catch-all. Returns `bytes` unchanged if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`FileSyncError::Preprocessor`] if the matched handler fails.
    pub async fn process(
        &self,
        file_id: &FileId,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>, FileSyncError> {
        match self.find_handlers(mime).into_iter().next() {
            Some(handler) => handler.process(file_id, bytes).await,
            None => {
                debug!(mime, "no preprocessor registered for mime type");
                Ok(bytes)
            }
        }
    }
}

impl Default for PreprocessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
