//! Download task: one sequential state machine per source.
//!
//! A [`DownloadTask`] is a cheap handle to a spawned worker that owns the pending list.
//! Every mutation (enqueue, start, pause, the three cancellation granularities and the
//! reports coming back from a running pipeline) is a [`Command`] on one bounded queue,
//! so the list is never touched from two places at once.
//!
//! Split into focused submodules:
//! - [`worker`] - Command loop and the `advance` step
//! - [`cancellation`] - Pause and the single/series/global cancel paths
//! - [`context`] - State handed to a running pipeline
//! - [`manga`] - Page list, inline pages and batched page fetches
//! - [`video`] - Stream resolution, segment batches, merge and export
//! - [`finalization`] - Moving results into place, sidecars, cover and subtitle

mod cancellation;
mod context;
mod finalization;
mod manga;
mod video;
mod worker;


use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::cache::DownloadCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::{VideoExporter, exporter_from_config};
use crate::paths::DirectoryLayout;
use crate::source::hls::{HlsClient, M3u8HlsClient};
use crate::source::{NoOpStreamResolver, SourceRegistry, StreamResolver};
use crate::types::{ChapterId, Download, Page, SeriesId, TaskEvent};

use worker::Worker;

const COMMAND_QUEUE_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Collaborators shared by every task of an application
pub struct TaskServices {
    pub(crate) config: Arc<Config>,
    pub(crate) layout: DirectoryLayout,
    pub(crate) cache: Arc<DownloadCache>,
    pub(crate) http: reqwest::Client,
    pub(crate) sources: Arc<dyn SourceRegistry>,
    pub(crate) streams: Arc<dyn StreamResolver>,
    pub(crate) hls: Arc<dyn HlsClient>,
    pub(crate) exporter: Arc<dyn VideoExporter>,
}

impl TaskServices {
    /// Build services from configuration.
    ///
    /// Creates the HTTP client, a fresh [`DownloadCache`] over the download root, the
    /// m3u8 playlist client and the exporter named by `config.tools`. Video downloads
    /// with non-http stream identifiers need [`TaskServices::with_stream_resolver`].
    pub fn new(config: Config, sources: Arc<dyn SourceRegistry>) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.download.request_timeout)
            .user_agent(config.download.user_agent.clone())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {e}"),
                key: Some("user_agent".to_string()),
            })?;
        let layout = DirectoryLayout::new(config.download_dir().clone());
        let cache = Arc::new(DownloadCache::new(layout.clone()));
        let hls = Arc::new(M3u8HlsClient::new(http.clone(), config.retry.clone()));
        let exporter = exporter_from_config(&config.tools);

        Ok(Self {
            config: Arc::new(config),
            layout,
            cache,
            http,
            sources,
            streams: Arc::new(NoOpStreamResolver),
            hls,
            exporter,
        })
    }

    /// Share an existing cache (tasks of different sources should use the same one)
    pub fn with_cache(mut self, cache: Arc<DownloadCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Resolver for opaque episode identifiers
    pub fn with_stream_resolver(mut self, streams: Arc<dyn StreamResolver>) -> Self {
        self.streams = streams;
        self
    }

    /// Replace the playlist client
    pub fn with_hls_client(mut self, hls: Arc<dyn HlsClient>) -> Self {
        self.hls = hls;
        self
    }

    /// Replace the video exporter
    pub fn with_exporter(mut self, exporter: Arc<dyn VideoExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// The download cache these services update
    pub fn cache(&self) -> &Arc<DownloadCache> {
        &self.cache
    }

    /// Directory layout of the download root
    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Terminal report of one pipeline run
#[derive(Debug)]
pub(crate) enum PipelineOutcome {
    /// Finalized and registered with the cache
    Finished,
    /// Rolled back (total failure, setup failure or detected race)
    Failed,
    /// Stopped because the task was paused or the item cancelled; no side effects
    Aborted,
}

/// Everything the worker can be asked to do
pub(crate) enum Command {
    Enqueue(Vec<Download>),
    Start,
    Pause,
    Cancel(ChapterId),
    CancelSeries(SeriesId),
    CancelAll,
    Snapshot(oneshot::Sender<Vec<Download>>),
    IsRunning(oneshot::Sender<bool>),
    PageListFetched {
        generation: u64,
        pages: Arc<Vec<Page>>,
    },
    Progress {
        generation: u64,
        progress: usize,
        total: usize,
    },
    PipelineDone {
        generation: u64,
        outcome: PipelineOutcome,
    },
}

/// Handle to a download task
///
/// Cloning is cheap; all clones drive the same worker. The worker stops once every
/// handle is dropped and no pipeline is running.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use media_dl::config::Config;
/// use media_dl::source::Source;
/// use media_dl::task::{DownloadTask, TaskServices};
/// use media_dl::types::TaskEvent;
///
/// # async fn example(downloads: Vec<media_dl::types::Download>) -> media_dl::Result<()> {
/// let sources: HashMap<String, Arc<dyn Source>> = HashMap::new();
/// let services = Arc::new(TaskServices::new(Config::default(), Arc::new(sources))?);
///
/// let task = DownloadTask::spawn("my-source", services);
/// let mut events = task.subscribe();
/// task.enqueue(downloads).await;
/// task.start().await;
///
/// while let Ok(event) = events.recv().await {
///     if matches!(event, TaskEvent::TaskFinished { .. }) {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadTask {
    source_key: Arc<str>,
    commands: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl DownloadTask {
    /// Spawn the worker for `source_key` on the current tokio runtime.
    ///
    /// The task starts idle; call [`DownloadTask::start`] after enqueueing.
    pub fn spawn(source_key: impl Into<String>, services: Arc<TaskServices>) -> Self {
        let source_key: Arc<str> = Arc::from(source_key.into());
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let worker = Worker::new(
            source_key.to_string(),
            services,
            commands.downgrade(),
            event_tx.clone(),
        );
        tokio::spawn(worker.run(rx));

        Self {
            source_key,
            commands,
            event_tx,
        }
    }

    /// Source (task group) key
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Subscribe to lifecycle and progress events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    /// Append downloads to the pending list. Ids already pending are skipped.
    pub async fn enqueue(&self, downloads: Vec<Download>) {
        self.send(Command::Enqueue(downloads)).await;
    }

    /// Start or resume draining the pending list
    pub async fn start(&self) {
        self.send(Command::Start).await;
    }

    /// Stop dispatching work and cooperatively stop the active download
    pub async fn pause(&self) {
        self.send(Command::Pause).await;
    }

    /// Cancel one chapter or episode
    pub async fn cancel(&self, id: &ChapterId) {
        self.send(Command::Cancel(id.clone())).await;
    }

    /// Cancel every pending item of a series
    pub async fn cancel_series(&self, series: &SeriesId) {
        self.send(Command::CancelSeries(series.clone())).await;
    }

    /// Cancel everything and clear the pending list
    pub async fn cancel_all(&self) {
        self.send(Command::CancelAll).await;
    }

    /// Snapshot of the pending list, active item first
    pub async fn downloads(&self) -> Vec<Download> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await;
        rx.await.unwrap_or_default()
    }

    /// Whether the task is currently draining its list
    pub async fn is_running(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.send(Command::IsRunning(tx)).await;
        rx.await.unwrap_or(false)
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!(source = %self.source_key, "download task worker has stopped");
        }
    }
}
