//! Finalization: moving results into place and the best-effort extras
//!
//! Metadata, cover and subtitle are never allowed to fail a download; their errors
//! are logged and dropped.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths::{path_exists, remove_path};
use crate::retry::with_retry;
use crate::source::to_header_map;
use crate::types::{ChapterId, ChapterMetadata};
use crate::utils::extension_from_response;

use super::PipelineOutcome;
use super::context::PipelineContext;

/// Run an optional finalization step, logging instead of propagating its error
pub(super) async fn best_effort<F>(id: &ChapterId, what: &str, fut: F)
where
    F: Future<Output = Result<()>>,
{
    if let Err(e) = fut.await {
        tracing::warn!(chapter = %id, step = what, error = %e, "optional download step failed");
    }
}

/// Promote a manga scratch directory to the final chapter directory
pub(super) async fn finalize_chapter(
    ctx: &PipelineContext,
    completed: usize,
    failed: usize,
    total: usize,
) -> PipelineOutcome {
    let id = ctx.id();
    let layout = ctx.layout();
    let scratch = layout.scratch_directory(id);

    if failed >= total {
        tracing::warn!(chapter = %id, failed, total, "every page failed, discarding chapter");
        if let Err(e) = remove_path(&scratch).await {
            tracing::warn!(path = ?scratch, error = %e, "failed to remove scratch directory");
        }
        return PipelineOutcome::Failed;
    }

    if !path_exists(&scratch).await {
        // only a cancellation removes the scratch directory, and that is checked first
        tracing::error!(
            chapter = %id,
            path = ?scratch,
            "scratch directory vanished before finalization"
        );
        return PipelineOutcome::Failed;
    }

    if ctx.is_cancelled() {
        return PipelineOutcome::Aborted;
    }
    let chapter_dir = layout.chapter_directory(id);
    if let Err(e) = tokio::fs::create_dir_all(&chapter_dir).await {
        tracing::error!(chapter = %id, path = ?chapter_dir, error = %e, "failed to create chapter directory");
        return PipelineOutcome::Failed;
    }

    match move_entries(&scratch, &chapter_dir).await {
        Ok(moved) => {
            tracing::debug!(chapter = %id, moved, "moved pages into chapter directory");
        }
        Err(Error::DirectoryMissing { path }) => {
            tracing::error!(chapter = %id, path = ?path, "working directory vanished while finalizing");
            undo_promotion(&scratch, &chapter_dir).await;
            return PipelineOutcome::Failed;
        }
        Err(e) => {
            tracing::error!(chapter = %id, error = %e, "failed to finalize chapter");
            undo_promotion(&scratch, &chapter_dir).await;
            return PipelineOutcome::Failed;
        }
    }
    if let Err(e) = remove_path(&scratch).await {
        tracing::warn!(path = ?scratch, error = %e, "failed to remove scratch directory");
    }

    tracing::info!(
        chapter = %id,
        pages = completed,
        failed,
        "chapter finalized"
    );
    register(ctx, completed, failed, chapter_dir).await
}

/// Write the metadata sidecar, fetch the cover and record the chapter in the cache.
///
/// A cancellation seen before the cache entry is written discards the chapter
/// directory instead, so a cancelled item never ends up registered.
pub(super) async fn register(
    ctx: &PipelineContext,
    items: usize,
    failed_items: usize,
    chapter_dir: PathBuf,
) -> PipelineOutcome {
    let id = ctx.id();
    if ctx.is_cancelled() {
        return discard(ctx, &chapter_dir).await;
    }
    best_effort(id, "metadata", write_metadata(ctx, items, failed_items)).await;
    best_effort(id, "cover", fetch_cover(ctx)).await;
    if ctx.is_cancelled() {
        return discard(ctx, &chapter_dir).await;
    }
    ctx.services.cache.add(id, Some(chapter_dir));
    PipelineOutcome::Finished
}

async fn discard(ctx: &PipelineContext, chapter_dir: &Path) -> PipelineOutcome {
    tracing::debug!(chapter = %ctx.id(), "cancelled while finalizing, discarding result");
    if let Err(e) = remove_path(chapter_dir).await {
        tracing::warn!(path = ?chapter_dir, error = %e, "failed to remove chapter directory");
    }
    PipelineOutcome::Aborted
}

/// Put pages back into the scratch directory (when it is still there) and drop the
/// half-filled chapter directory, so the chapter is not mistaken for a finished one
async fn undo_promotion(scratch: &Path, chapter_dir: &Path) {
    if path_exists(scratch).await
        && let Ok(mut entries) = tokio::fs::read_dir(chapter_dir).await
    {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let target = scratch.join(entry.file_name());
            if let Err(e) = tokio::fs::rename(entry.path(), &target).await {
                tracing::warn!(path = ?entry.path(), error = %e, "failed to restore page to scratch directory");
            }
        }
    }
    if let Err(e) = remove_path(chapter_dir).await {
        tracing::warn!(path = ?chapter_dir, error = %e, "failed to remove chapter directory");
    }
}

async fn move_entries(from: &Path, to: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(from).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::directory_missing(from));
        }
        Err(e) => return Err(e.into()),
    };

    let mut moved = 0;
    while let Some(entry) = entries.next_entry().await? {
        let target = to.join(entry.file_name());
        match tokio::fs::rename(entry.path(), &target).await {
            Ok(()) => moved += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::directory_missing(from));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(moved)
}

async fn write_metadata(ctx: &PipelineContext, items: usize, failed_items: usize) -> Result<()> {
    let metadata = ChapterMetadata::for_download(&ctx.download, items, failed_items);
    let json = serde_json::to_vec_pretty(&metadata)?;
    tokio::fs::write(ctx.layout().metadata_path(ctx.id()), json).await?;
    Ok(())
}

/// Save the series cover next to its chapters unless one is already there
pub(super) async fn fetch_cover(ctx: &PipelineContext) -> Result<()> {
    let series = ctx.id().series();
    if ctx.layout().find_cover(&series).await.is_some() {
        return Ok(());
    }
    let download = &ctx.download;
    let url = download.series.cover_url.clone().or_else(|| {
        download
            .video
            .as_ref()
            .and_then(|video| video.poster_url.clone())
    });
    let Some(url) = url else {
        return Ok(());
    };

    let headers = download
        .video
        .as_ref()
        .map(|video| video.headers.clone())
        .unwrap_or_default();
    let (bytes, extension) = fetch_with_extension(ctx, &url, &headers, "jpg").await?;
    let path = ctx.layout().cover_path(&series, &extension);
    tokio::fs::write(&path, bytes).await?;
    tracing::debug!(series = %series, path = ?path, "saved series cover");
    Ok(())
}

/// Save an episode's subtitle file as `<episode>.<ext>` in the episode directory
pub(super) async fn fetch_subtitle(
    ctx: &PipelineContext,
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<()> {
    let (bytes, mut extension) = fetch_with_extension(ctx, url, headers, "vtt").await?;
    if extension == "ts" || extension == ctx.config().download.video_extension {
        // never shadow the episode's own video file
        extension = "vtt".to_string();
    }
    let path = ctx.layout().video_file(ctx.id(), &extension);
    tokio::fs::write(&path, bytes).await?;
    tracing::debug!(chapter = %ctx.id(), path = ?path, "saved subtitle");
    Ok(())
}

async fn fetch_with_extension(
    ctx: &PipelineContext,
    url: &str,
    headers: &HashMap<String, String>,
    default_extension: &str,
) -> Result<(Vec<u8>, String)> {
    let client = &ctx.services.http;
    let header_map = &to_header_map(headers);
    with_retry(&ctx.config().retry, || async move {
        let response = client
            .get(url)
            .headers(header_map.clone())
            .send()
            .await?
            .error_for_status()?;
        let extension = extension_from_response(&response, url, default_extension);
        let bytes = response.bytes().await?;
        Ok::<_, Error>((bytes.to_vec(), extension))
    })
    .await
}
