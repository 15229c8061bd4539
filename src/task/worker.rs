//! The single consumer of a task's command queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::types::{ChapterId, Download, DownloadKind, DownloadStatus, Page, TaskEvent};

use super::context::PipelineContext;
use super::{Command, PipelineOutcome, TaskServices, manga, video};

/// The pipeline currently working on the head of the list
pub(super) struct ActiveDownload {
    pub(super) id: ChapterId,
    pub(super) generation: u64,
    pub(super) cancel: CancellationToken,
}

/// Owns all mutable task state; only ever driven from [`Worker::run`]
pub(super) struct Worker {
    pub(super) source_key: String,
    pub(super) services: Arc<TaskServices>,
    pub(super) pending: VecDeque<Download>,
    pub(super) running: bool,
    pub(super) active: Option<ActiveDownload>,
    /// Page lists already fetched for pending manga items
    pub(super) page_lists: HashMap<ChapterId, Arc<Vec<Page>>>,
    generation: u64,
    commands: mpsc::WeakSender<Command>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl Worker {
    pub(super) fn new(
        source_key: String,
        services: Arc<TaskServices>,
        commands: mpsc::WeakSender<Command>,
        event_tx: broadcast::Sender<TaskEvent>,
    ) -> Self {
        Self {
            source_key,
            services,
            pending: VecDeque::new(),
            running: false,
            active: None,
            page_lists: HashMap::new(),
            generation: 0,
            commands,
            event_tx,
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::debug!(source = %self.source_key, "download task worker started");
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        tracing::debug!(source = %self.source_key, "download task worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue(downloads) => self.enqueue(downloads),
            Command::Start => self.start().await,
            Command::Pause => self.pause(),
            Command::Cancel(id) => self.cancel(&id).await,
            Command::CancelSeries(series) => self.cancel_series(&series).await,
            Command::CancelAll => self.cancel_all().await,
            Command::Snapshot(reply) => {
                reply.send(self.pending.iter().cloned().collect()).ok();
            }
            Command::IsRunning(reply) => {
                reply.send(self.running).ok();
            }
            Command::PageListFetched { generation, pages } => {
                if let Some(id) = self.active_id(generation) {
                    self.page_lists.insert(id, pages);
                }
            }
            Command::Progress {
                generation,
                progress,
                total,
            } => self.apply_progress(generation, progress, total),
            Command::PipelineDone {
                generation,
                outcome,
            } => self.pipeline_done(generation, outcome).await,
        }
    }

    pub(super) fn emit(&self, event: TaskEvent) {
        self.event_tx.send(event).ok();
    }

    fn enqueue(&mut self, downloads: Vec<Download>) {
        let mut added = 0;
        for download in downloads {
            if self.pending.iter().any(|d| d.id == download.id) {
                tracing::debug!(chapter = %download.id, "already pending, skipping");
                continue;
            }
            self.pending.push_back(download);
            added += 1;
        }
        tracing::debug!(source = %self.source_key, added, pending = self.pending.len(), "enqueued downloads");
    }

    async fn start(&mut self) {
        self.running = true;
        for download in self.pending.iter_mut() {
            if download.status == DownloadStatus::Paused {
                download.status = DownloadStatus::Queued;
            }
        }
        self.advance().await;
    }

    /// Id of the active item if `generation` is still the current run
    fn active_id(&self, generation: u64) -> Option<ChapterId> {
        self.active
            .as_ref()
            .filter(|a| a.generation == generation)
            .map(|a| a.id.clone())
    }

    fn apply_progress(&mut self, generation: u64, progress: usize, total: usize) {
        let Some(id) = self.active_id(generation) else {
            return;
        };
        let Some(download) = self.pending.iter_mut().find(|d| d.id == id) else {
            return;
        };
        download.record_progress(progress, total);
        let snapshot = download.clone();
        self.emit(TaskEvent::DownloadProgressChanged { download: snapshot });
    }

    async fn pipeline_done(&mut self, generation: u64, outcome: PipelineOutcome) {
        let Some(id) = self.active_id(generation) else {
            tracing::debug!(generation, "ignoring stale pipeline report");
            return;
        };
        self.active = None;

        match outcome {
            PipelineOutcome::Aborted => {}
            PipelineOutcome::Finished => {
                if let Some(mut download) = self.take_pending(&id) {
                    download.status = DownloadStatus::Finished;
                    tracing::info!(chapter = %id, "download finished");
                    self.emit(TaskEvent::DownloadFinished {
                        download: download.clone(),
                    });
                }
            }
            PipelineOutcome::Failed => {
                if let Some(mut download) = self.take_pending(&id) {
                    download.status = DownloadStatus::Cancelled;
                    download.reset_progress();
                    tracing::warn!(chapter = %id, "download rolled back");
                    self.emit(TaskEvent::DownloadCancelled { download });
                }
            }
        }

        self.advance().await;
    }

    /// Remove an item from the pending list along with its memoized page list
    pub(super) fn take_pending(&mut self, id: &ChapterId) -> Option<Download> {
        self.page_lists.remove(id);
        let index = self.pending.iter().position(|d| &d.id == id)?;
        self.pending.remove(index)
    }

    /// Drain the head of the list until a pipeline is dispatched or the task goes idle
    pub(super) async fn advance(&mut self) {
        loop {
            if !self.running || self.active.is_some() {
                return;
            }
            let Some(download) = self.pending.front().cloned() else {
                self.running = false;
                tracing::info!(source = %self.source_key, "download task finished");
                self.emit(TaskEvent::TaskFinished {
                    source_key: self.source_key.clone(),
                });
                return;
            };
            let id = download.id.clone();

            if download.kind == DownloadKind::Manga
                && self.services.sources.source(&id.source_key).is_none()
            {
                tracing::warn!(chapter = %id, "source is not installed, dropping download");
                self.take_pending(&id);
                continue;
            }

            if self.is_already_on_disk(&download).await {
                tracing::info!(chapter = %id, "already downloaded, skipping");
                if let Some(mut done) = self.take_pending(&id) {
                    done.status = DownloadStatus::Finished;
                    self.emit(TaskEvent::DownloadFinished { download: done });
                }
                continue;
            }

            if !download.status.is_pending() {
                if let Some(mut cancelled) = self.take_pending(&id) {
                    cancelled.status = DownloadStatus::Cancelled;
                    self.emit(TaskEvent::DownloadCancelled {
                        download: cancelled,
                    });
                }
                continue;
            }

            self.dispatch(download);
            return;
        }
    }

    async fn is_already_on_disk(&self, download: &Download) -> bool {
        let layout = &self.services.layout;
        match download.kind {
            DownloadKind::Manga => layout.is_downloaded_on_disk(&download.id).await,
            DownloadKind::Video => {
                layout
                    .is_episode_on_disk(&download.id, &self.services.config.download.video_extension)
                    .await
            }
        }
    }

    /// Spawn the pipeline for the head item
    fn dispatch(&mut self, mut download: Download) {
        let Some(commands) = self.commands.upgrade() else {
            // every handle is gone, nobody is listening
            self.running = false;
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();

        download.status = DownloadStatus::Downloading;
        if let Some(head) = self.pending.front_mut() {
            head.status = DownloadStatus::Downloading;
        }
        let page_list = self.page_lists.get(&download.id).cloned();

        self.active = Some(ActiveDownload {
            id: download.id.clone(),
            generation,
            cancel: cancel.clone(),
        });

        tracing::info!(
            chapter = %download.id,
            kind = ?download.kind,
            generation,
            "starting download"
        );

        let kind = download.kind;
        let ctx = PipelineContext::new(download, generation, self.services.clone(), cancel, commands);
        tokio::spawn(async move {
            let outcome = match kind {
                DownloadKind::Manga => manga::run(&ctx, page_list).await,
                DownloadKind::Video => video::run(&ctx).await,
            };
            ctx.finish(outcome).await;
        });
    }
}
