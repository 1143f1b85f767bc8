//! Top-level configuration knobs for a [`crate::FileSync`] instance,
//! aggregating each subsystem's own config plus the preprocessor
//! registrations that apply across the whole client.

use std::sync::Arc;

use crate::connectivity::ConnectivityConfig;
use crate::executor::ExecutorConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::preprocessor::{Preprocessor, PreprocessorRegistry};
use crate::stream::StreamConfig;

/// Aggregated configuration for every background fiber plus the
/// preprocessor registry. Built with [`FileSyncConfig::builder`] or used
/// directly via [`Default`].
pub struct FileSyncConfig {
    pub executor: ExecutorConfig,
    pub stream: StreamConfig,
    pub heartbeat: HeartbeatConfig,
    pub connectivity: ConnectivityConfig,
    /// Whether [`crate::crud::FileCrud::resolve_file_url`] should prioritize
    /// a file's pending download when it's resolved before the local copy
    /// has arrived.
    pub auto_prioritize_on_resolve: bool,
    preprocessors: Vec<(String, Arc<dyn Preprocessor>)>,
}

impl Default for FileSyncConfig {
    /// `#[derive(Default)]` would give `auto_prioritize_on_resolve = false`
    /// via `bool::default()`; the spec's documented default (§6) is `true`,
    /// same as [`FileSyncConfigBuilder`]'s.
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            stream: StreamConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connectivity: ConnectivityConfig::default(),
            auto_prioritize_on_resolve: true,
            preprocessors: Vec::new(),
        }
    }
}

impl FileSyncConfig {
    #[must_use]
    pub fn builder() -> FileSyncConfigBuilder {
        FileSyncConfigBuilder::default()
    }

    /// Consumes the configured preprocessor registrations into a fresh
    /// [`PreprocessorRegistry`].
    #[must_use]
    pub fn build_preprocessor_registry(&self) -> PreprocessorRegistry {
        let mut registry = PreprocessorRegistry::new();
        for (pattern, handler) in &self.preprocessors {
            registry.register(pattern, handler.clone());
        }
        registry
    }
}

/// Builder for [`FileSyncConfig`], following the documented defaults:
/// `auto_prioritize_on_resolve = true`, a 15s heartbeat interval, a 10s
/// health-check interval, and the stream's 5-attempt / 1s-60s backoff
/// recovery policy.
pub struct FileSyncConfigBuilder {
    config: FileSyncConfig,
}

impl Default for FileSyncConfigBuilder {
    fn default() -> Self {
        Self {
            config: FileSyncConfig::default(),
        }
    }
}

impl FileSyncConfigBuilder {
    #[must_use]
    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.config.executor = executor;
        self
    }

    #[must_use]
    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.config.stream = stream;
        self
    }

    #[must_use]
    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn connectivity(mut self, connectivity: ConnectivityConfig) -> Self {
        self.config.connectivity = connectivity;
        self
    }

    #[must_use]
    pub fn auto_prioritize_on_resolve(mut self, enabled: bool) -> Self {
        self.config.auto_prioritize_on_resolve = enabled;
        self
    }

    /// Registers a preprocessor for a MIME pattern (`"image/png"`,
    /// `"image/*"`, or `"*/*"`); see [`PreprocessorRegistry::register`].
    #[must_use]
    pub fn preprocessor(mut self, pattern: impl AsRef<str>, handler: Arc<dyn Preprocessor>) -> Self {
        self.config
            .preprocessors
            .push((pattern.as_ref().to_string(), handler));
        self
    }

    #[must_use]
    pub fn build(self) -> FileSyncConfig {
        self.config
    }
}
