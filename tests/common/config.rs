//! Test configuration helpers for building task services over a temporary root

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use media_dl::media::{PassthroughExporter, VideoExporter};
use media_dl::source::{Source, StreamResolver};
use media_dl::{Config, DownloadTask, RetryConfig, TaskServices};

/// Source key every test download uses
pub const SOURCE_KEY: &str = "src";

/// Configuration rooted at `root` with retries off and no ffmpeg lookup
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.to_path_buf();
    config.retry = RetryConfig::disabled();
    config.tools.search_path = false;
    config
}

/// Builder for the services a test task runs against
pub struct TestServices {
    config: Config,
    source: Option<Arc<dyn Source>>,
    resolver: Option<Arc<dyn StreamResolver>>,
    exporter: Arc<dyn VideoExporter>,
}

impl TestServices {
    /// Services over `root` with no source and the passthrough exporter
    pub fn new(root: &Path) -> Self {
        Self {
            config: test_config(root),
            source: None,
            resolver: None,
            exporter: Arc::new(PassthroughExporter),
        }
    }

    pub fn config(mut self, edit: impl FnOnce(&mut Config)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn StreamResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn VideoExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn build(self) -> Arc<TaskServices> {
        let mut sources: HashMap<String, Arc<dyn Source>> = HashMap::new();
        if let Some(source) = self.source {
            sources.insert(SOURCE_KEY.to_string(), source);
        }
        let mut services = TaskServices::new(self.config, Arc::new(sources))
            .expect("Failed to build task services")
            .with_exporter(self.exporter);
        if let Some(resolver) = self.resolver {
            services = services.with_stream_resolver(resolver);
        }
        Arc::new(services)
    }

    /// Build the services and spawn a task for [`SOURCE_KEY`]
    pub fn spawn(self) -> (DownloadTask, Arc<TaskServices>) {
        let services = self.build();
        (DownloadTask::spawn(SOURCE_KEY, services.clone()), services)
    }
}

/// Temporary download root
pub fn temp_root() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}
