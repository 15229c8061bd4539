//! HLS video pipeline
//!
//! Segments are fetched into `<episode>/segments/` under 0-based zero-padded names,
//! merged into `<episode>.ts`, probed, and exported to the configured container. The
//! segments directory is removed only after the final file is confirmed, so an
//! interrupted episode resumes from whatever segments are already on disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::media::{merge_segments, ts};
use crate::paths::{path_exists, remove_path};
use crate::retry::with_retry;
use crate::source::{decorate_headers, to_header_map};
use crate::types::VideoSegment;
use crate::utils::{index_width, indexed_name, is_http_url};

use super::PipelineOutcome;
use super::cancellation::purge_video_junk;
use super::context::PipelineContext;
use super::finalization::{best_effort, fetch_cover, fetch_subtitle, register};

const MIN_SEGMENT_WIDTH: usize = 5;

/// A playable stream after resolution and header decoration
struct Stream {
    url: String,
    headers: HashMap<String, String>,
    subtitle_url: Option<String>,
}

pub(super) async fn run(ctx: &PipelineContext) -> PipelineOutcome {
    match download(ctx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if ctx.is_cancelled() {
                return PipelineOutcome::Aborted;
            }
            tracing::warn!(chapter = %ctx.id(), error = %e, "video download failed");
            roll_back(ctx).await;
            PipelineOutcome::Failed
        }
    }
}

async fn download(ctx: &PipelineContext) -> Result<PipelineOutcome> {
    let id = ctx.id();
    let layout = ctx.layout();

    tokio::fs::create_dir_all(layout.series_directory(&id.series())).await?;
    best_effort(id, "cover", fetch_cover(ctx)).await;

    let Some(stream) = resolve(ctx).await? else {
        return Ok(PipelineOutcome::Aborted);
    };

    if ctx.is_cancelled() {
        return Ok(PipelineOutcome::Aborted);
    }
    let episode_dir = layout.chapter_directory(id);
    if !ctx.create_working_dir(&episode_dir).await? {
        return Ok(PipelineOutcome::Aborted);
    }

    let hls = &ctx.services.hls;
    let Some(variant) = ctx
        .until_cancelled(hls.resolve_best_variant(&stream.url, &stream.headers))
        .await
    else {
        return Ok(PipelineOutcome::Aborted);
    };
    let variant = variant?;
    let Some(segments) = ctx
        .until_cancelled(hls.fetch_segments(&variant, &stream.headers))
        .await
    else {
        return Ok(PipelineOutcome::Aborted);
    };
    let segments = segments?;
    if segments.is_empty() {
        return Err(Error::Playlist(format!("playlist {variant} has no segments")));
    }

    let total = segments.len();
    ctx.report_progress(0, total).await;
    tracing::debug!(chapter = %id, segments = total, variant = %variant, "fetching segments");

    let segments_dir = layout.segments_directory(id);
    if !ctx.create_working_dir(&segments_dir).await? {
        return Ok(PipelineOutcome::Aborted);
    }

    let fetcher = SegmentFetcher {
        ctx,
        headers: &stream.headers,
        dir: &segments_dir,
        width: index_width(total, MIN_SEGMENT_WIDTH),
        total,
        completed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    };
    for batch in segments.chunks(ctx.config().batch_size()) {
        if ctx.is_cancelled() {
            tracing::debug!(chapter = %id, "stopping segment fetches");
            return Ok(PipelineOutcome::Aborted);
        }
        futures::future::join_all(batch.iter().map(|segment| fetcher.fetch(segment))).await;
    }
    if ctx.is_cancelled() {
        return Ok(PipelineOutcome::Aborted);
    }

    let completed = fetcher.completed.load(Ordering::SeqCst);
    let failed = fetcher.failed.load(Ordering::SeqCst);
    if failed > 0 {
        tracing::warn!(chapter = %id, failed, total, "some segments failed, merging the rest");
    }

    let raw = layout.raw_stream_file(id);
    let merged = merge_segments(&segments_dir, &raw).await?;
    let probe = ts::verify_file(&raw).await?;
    let video_tracks = probe
        .streams
        .iter()
        .filter(|s| s.kind() == ts::StreamKind::Video)
        .count();
    let audio_tracks = probe
        .streams
        .iter()
        .filter(|s| s.kind() == ts::StreamKind::Audio)
        .count();
    tracing::debug!(chapter = %id, merged, video_tracks, audio_tracks, "merged stream verified");

    let output = layout.video_file(id, &ctx.config().download.video_extension);
    if output != raw {
        let Some(exported) = ctx
            .until_cancelled(ctx.services.exporter.export(&raw, &output))
            .await
        else {
            return Ok(PipelineOutcome::Aborted);
        };
        match exported {
            Ok(()) => {
                if let Err(e) = remove_path(&raw).await {
                    tracing::warn!(path = ?raw, error = %e, "failed to remove raw stream");
                }
            }
            Err(e) => {
                tracing::warn!(
                    chapter = %id,
                    exporter = ctx.services.exporter.name(),
                    error = %e,
                    "export failed, keeping the merged stream as is"
                );
                remove_path(&output).await?;
                tokio::fs::rename(&raw, &output).await?;
            }
        }
    }

    if let Some(subtitle_url) = &stream.subtitle_url {
        best_effort(id, "subtitle", fetch_subtitle(ctx, subtitle_url, &stream.headers)).await;
    }

    if ctx.is_cancelled() {
        return Ok(PipelineOutcome::Aborted);
    }
    if !path_exists(&output).await {
        return Err(Error::NotFound(format!(
            "video file {} missing after export",
            output.display()
        )));
    }

    if let Err(e) = remove_path(&segments_dir).await {
        tracing::warn!(path = ?segments_dir, error = %e, "failed to remove segments directory");
    }
    tracing::info!(chapter = %id, segments = completed, failed, path = ?output, "episode finalized");
    Ok(register(ctx, completed, failed, episode_dir).await)
}

/// Playable URL and headers; `None` when cancelled while resolving
async fn resolve(ctx: &PipelineContext) -> Result<Option<Stream>> {
    let Some(video) = &ctx.download.video else {
        return Err(Error::Other(format!("{} has no stream details", ctx.id())));
    };

    let mut stream = if is_http_url(&video.stream_url) {
        Stream {
            url: video.stream_url.clone(),
            headers: video.headers.clone(),
            subtitle_url: video.subtitle_url.clone(),
        }
    } else {
        let Some(resolved) = ctx
            .until_cancelled(ctx.services.streams.resolve_stream(&ctx.download))
            .await
        else {
            return Ok(None);
        };
        let resolved = resolved?;
        Stream {
            url: resolved.url,
            headers: resolved.headers,
            subtitle_url: resolved.subtitle_url.or_else(|| video.subtitle_url.clone()),
        }
    };

    if stream.url.is_empty() {
        return Err(Error::Source(format!("no stream URL resolved for {}", ctx.id())));
    }
    decorate_headers(&mut stream.headers, &ctx.config().download.user_agent, &stream.url);
    Ok(Some(stream))
}

/// Delete everything a failed episode left behind
async fn roll_back(ctx: &PipelineContext) {
    let layout = ctx.layout();
    let id = ctx.id();
    purge_video_junk(layout, id, &ctx.config().download.video_extension).await;
    if path_exists(&layout.metadata_path(id)).await {
        return;
    }
    let episode_dir = layout.chapter_directory(id);
    if let Err(e) = remove_path(&episode_dir).await {
        tracing::warn!(path = ?episode_dir, error = %e, "failed to remove episode directory");
    }
}

struct SegmentFetcher<'a> {
    ctx: &'a PipelineContext,
    headers: &'a HashMap<String, String>,
    dir: &'a Path,
    width: usize,
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl SegmentFetcher<'_> {
    async fn fetch(&self, segment: &VideoSegment) {
        match self.save(segment).await {
            Ok(()) => {
                let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
                self.ctx.report_progress(done, self.total).await;
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    chapter = %self.ctx.id(),
                    segment = segment.index,
                    error = %e,
                    "segment download failed"
                );
            }
        }
    }

    async fn save(&self, segment: &VideoSegment) -> Result<()> {
        let path = self
            .dir
            .join(format!("{}.ts", indexed_name(segment.index, self.width)));
        if path_exists(&path).await {
            return Ok(());
        }

        let client = &self.ctx.services.http;
        let header_map = &to_header_map(self.headers);
        let url = segment.url.as_str();
        let bytes = with_retry(&self.ctx.config().retry, || async move {
            let response = client
                .get(url)
                .headers(header_map.clone())
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, Error>(response.bytes().await?)
        })
        .await?;

        if self.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !path_exists(self.dir).await {
            return Err(Error::directory_missing(self.dir));
        }
        tokio::fs::write(&path, &bytes).await?;
        Ok(())
    }
}
