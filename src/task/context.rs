//! State handed to a running pipeline, and its channel back to the worker.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::paths::{DirectoryLayout, path_exists, remove_path};
use crate::types::{ChapterId, Download, Page};

use super::{Command, PipelineOutcome, TaskServices};

/// Shared context for a single pipeline run, reducing parameter passing between helpers.
pub(super) struct PipelineContext {
    pub(super) download: Download,
    pub(super) generation: u64,
    pub(super) services: Arc<TaskServices>,
    pub(super) cancel: CancellationToken,
    commands: mpsc::Sender<Command>,
}

impl PipelineContext {
    pub(super) fn new(
        download: Download,
        generation: u64,
        services: Arc<TaskServices>,
        cancel: CancellationToken,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            download,
            generation,
            services,
            cancel,
            commands,
        }
    }

    pub(super) fn id(&self) -> &ChapterId {
        &self.download.id
    }

    pub(super) fn config(&self) -> &Config {
        &self.services.config
    }

    pub(super) fn layout(&self) -> &DirectoryLayout {
        &self.services.layout
    }

    /// Whether the task stopped or this item was cancelled or replaced
    pub(super) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await `fut` unless the run is cancelled first
    pub(super) async fn until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Create a working directory for this run.
    ///
    /// Returns `false` when the run was cancelled meanwhile. A directory this call
    /// created is removed again in that case; one that already existed is kept.
    pub(super) async fn create_working_dir(&self, dir: &Path) -> std::io::Result<bool> {
        let existed = path_exists(dir).await;
        tokio::fs::create_dir_all(dir).await?;
        if !self.is_cancelled() {
            return Ok(true);
        }
        if !existed && let Err(e) = remove_path(dir).await {
            tracing::warn!(path = ?dir, error = %e, "failed to remove working directory");
        }
        Ok(false)
    }

    /// Send a progress report; the worker applies it to the pending item
    pub(super) async fn report_progress(&self, progress: usize, total: usize) {
        self.send(Command::Progress {
            generation: self.generation,
            progress,
            total,
        })
        .await;
    }

    /// Hand a freshly fetched page list to the worker for reuse on resume
    pub(super) async fn report_page_list(&self, pages: Arc<Vec<Page>>) {
        self.send(Command::PageListFetched {
            generation: self.generation,
            pages,
        })
        .await;
    }

    /// Report the terminal outcome; consumes the context
    pub(super) async fn finish(self, outcome: PipelineOutcome) {
        tracing::debug!(
            chapter = %self.download.id,
            generation = self.generation,
            ?outcome,
            "pipeline finished"
        );
        self.send(Command::PipelineDone {
            generation: self.generation,
            outcome,
        })
        .await;
    }

    async fn send(&self, command: Command) {
        self.commands.send(command).await.ok();
    }
}
