//! Pause and the three cancellation granularities.
//!
//! Cancelling never waits for the active pipeline: its token is cancelled, its working
//! files are removed here, and the `Aborted` report it sends later is ignored because
//! the item is no longer active.

use std::collections::HashSet;
use std::path::Path;

use crate::paths::{DirectoryLayout, TEMP_PREFIX, is_temp_name, path_exists, remove_path};
use crate::types::{ChapterId, Download, DownloadKind, DownloadStatus, SeriesId, TaskEvent};

use super::worker::Worker;

impl Worker {
    pub(super) fn pause(&mut self) {
        self.running = false;
        if let Some(active) = &self.active {
            active.cancel.cancel();
            let id = active.id.clone();
            if let Some(download) = self.pending.iter_mut().find(|d| d.id == id) {
                download.status = DownloadStatus::Paused;
            }
        }
        tracing::info!(source = %self.source_key, "download task paused");
        self.emit(TaskEvent::TaskPaused {
            source_key: self.source_key.clone(),
        });
    }

    pub(super) async fn cancel(&mut self, id: &ChapterId) {
        let was_running = self.running;
        self.running = false;

        let Some((mut download, was_active)) = self.cancel_item(id) else {
            tracing::debug!(chapter = %id, "cancel requested for unknown download");
            self.running = was_running;
            return;
        };
        self.remove_working_files(&download, was_active).await;

        download.status = DownloadStatus::Cancelled;
        tracing::info!(chapter = %id, "download cancelled");
        self.emit(TaskEvent::DownloadCancelled { download });

        if !self.pending.is_empty() {
            self.running = true;
            self.advance().await;
        }
    }

    pub(super) async fn cancel_series(&mut self, series: &SeriesId) {
        self.running = false;

        let ids: Vec<ChapterId> = self
            .pending
            .iter()
            .filter(|d| d.id.belongs_to(series))
            .map(|d| d.id.clone())
            .collect();

        for id in &ids {
            if let Some((mut download, was_active)) = self.cancel_item(id) {
                self.remove_working_files(&download, was_active).await;
                download.status = DownloadStatus::Cancelled;
                self.emit(TaskEvent::DownloadCancelled { download });
            }
        }
        tracing::info!(series = %series, cancelled = ids.len(), "series downloads cancelled");

        let keep = self
            .active
            .as_ref()
            .map(|a| self.services.layout.scratch_directory(&a.id));
        let source_dir = self.services.layout.source_directory(&series.source_key);
        purge_temp_directories(&source_dir, keep.as_deref()).await;

        if !self.pending.is_empty() {
            self.running = true;
            self.advance().await;
        }
    }

    pub(super) async fn cancel_all(&mut self) {
        self.running = false;
        let active_id = self.active.take().map(|active| {
            active.cancel.cancel();
            active.id
        });

        let downloads: Vec<Download> = self.pending.drain(..).collect();
        self.page_lists.clear();

        let mut sources = HashSet::new();
        for mut download in downloads {
            sources.insert(download.id.source_key.clone());
            let was_active = active_id.as_ref() == Some(&download.id);
            if was_active || download.kind == DownloadKind::Video {
                self.remove_working_files(&download, was_active).await;
            }
            download.status = DownloadStatus::Cancelled;
        }
        for source_key in &sources {
            let source_dir = self.services.layout.source_directory(source_key);
            purge_temp_directories(&source_dir, None).await;
        }

        tracing::info!(source = %self.source_key, "all downloads cancelled");
        self.emit(TaskEvent::TaskCancelled {
            source_key: self.source_key.clone(),
        });
    }

    /// Take an item out of the list, stopping its pipeline if it is the active one.
    /// The flag tells whether it was.
    fn cancel_item(&mut self, id: &ChapterId) -> Option<(Download, bool)> {
        let is_active = self.active.as_ref().is_some_and(|a| &a.id == id);
        if is_active && let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        let mut download = self.take_pending(id)?;
        if is_active {
            download.reset_progress();
        }
        Some((download, is_active))
    }

    /// Delete whatever a cancelled item left behind.
    ///
    /// The active item may already be finalizing, so its chapter directory and cache
    /// entry go too: anything there was produced by the run being cancelled.
    async fn remove_working_files(&self, download: &Download, was_active: bool) {
        let layout = &self.services.layout;
        let chapter_dir = layout.chapter_directory(&download.id);
        match download.kind {
            DownloadKind::Manga => {
                let scratch = layout.scratch_directory(&download.id);
                if let Err(e) = remove_path(&scratch).await {
                    tracing::warn!(path = ?scratch, error = %e, "failed to remove scratch directory");
                }
                if !was_active {
                    return;
                }
            }
            DownloadKind::Video => {
                let extension = &self.services.config.download.video_extension;
                purge_video_junk(layout, &download.id, extension).await;
                if !was_active && path_exists(&layout.metadata_path(&download.id)).await {
                    return;
                }
            }
        }
        if let Err(e) = remove_path(&chapter_dir).await {
            tracing::warn!(path = ?chapter_dir, error = %e, "failed to remove chapter directory");
        }
        if was_active {
            self.services.cache.remove_chapter(&download.id);
        }
    }
}

/// Remove the segment directory, raw stream and any partial export of an episode
pub(super) async fn purge_video_junk(
    layout: &DirectoryLayout,
    id: &ChapterId,
    extension: &str,
) {
    let mut junk = vec![layout.segments_directory(id), layout.raw_stream_file(id)];
    // a finalized episode keeps its export
    if !path_exists(&layout.metadata_path(id)).await {
        junk.push(layout.video_file(id, extension));
    }
    for path in junk {
        if let Err(e) = remove_path(&path).await {
            tracing::warn!(path = ?path, error = %e, "failed to remove video working file");
        }
    }
}

/// Delete every `.tmp_` directory in the series directories of a source, except `keep`
pub(super) async fn purge_temp_directories(source_dir: &Path, keep: Option<&Path>) {
    let Ok(mut series_dirs) = tokio::fs::read_dir(source_dir).await else {
        return;
    };

    let mut removed = 0usize;
    while let Ok(Some(series)) = series_dirs.next_entry().await {
        let Ok(mut entries) = tokio::fs::read_dir(series.path()).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_temp = entry.file_name().to_str().is_some_and(is_temp_name);
            if !is_temp || keep == Some(path.as_path()) {
                continue;
            }
            match remove_path(&path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = ?path, error = %e, "failed to remove temporary directory"),
            }
        }
    }
    if removed > 0 {
        tracing::debug!(dir = ?source_dir, removed, prefix = TEMP_PREFIX, "purged temporary directories");
    }
}
