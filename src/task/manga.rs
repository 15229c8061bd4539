//! Manga page pipeline
//!
//! Pages land in the chapter's scratch directory under 1-based zero-padded names
//! (`001.png`, `002.jpg`, ...). Files already present are counted as done without a
//! request, so a rerun only fetches what is missing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::paths::{path_exists, remove_path};
use crate::retry::with_retry;
use crate::source::{PageInterceptor, Source};
use crate::types::{NetworkPage, Page, PageContent};
use crate::utils::{extension_from_response, image_extension, index_width, indexed_name};

use super::PipelineOutcome;
use super::context::PipelineContext;
use super::finalization::finalize_chapter;

const MIN_PAGE_WIDTH: usize = 3;

/// Running page counters, shared by the fetches of one batch
#[derive(Default)]
struct Tally {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn complete(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn fail(&self, pages: usize) {
        self.failed.fetch_add(pages, Ordering::SeqCst);
    }

    fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

pub(super) async fn run(ctx: &PipelineContext, page_list: Option<Arc<Vec<Page>>>) -> PipelineOutcome {
    let id = ctx.id();
    let layout = ctx.layout();
    let scratch = layout.scratch_directory(id);

    match prepare_directories(ctx, &layout.series_directory(&id.series()), &scratch).await {
        Ok(true) => {}
        Ok(false) => return PipelineOutcome::Aborted,
        Err(e) => {
            tracing::error!(chapter = %id, path = ?scratch, error = %e, "failed to prepare scratch directory");
            return PipelineOutcome::Failed;
        }
    }

    let Some(source) = ctx.services.sources.source(&id.source_key) else {
        tracing::warn!(chapter = %id, "source disappeared before download");
        discard_scratch(&scratch).await;
        return PipelineOutcome::Failed;
    };

    let pages = match page_list {
        Some(pages) => pages,
        None => match ctx.until_cancelled(source.page_list(&ctx.download)).await {
            None => return PipelineOutcome::Aborted,
            Some(Err(e)) => {
                tracing::warn!(chapter = %id, error = %e, "failed to fetch page list");
                discard_scratch(&scratch).await;
                return PipelineOutcome::Failed;
            }
            Some(Ok(pages)) => {
                let pages = Arc::new(pages);
                ctx.report_page_list(pages.clone()).await;
                pages
            }
        },
    };
    if ctx.is_cancelled() {
        return PipelineOutcome::Aborted;
    }

    let total = pages.len();
    ctx.report_progress(0, total).await;
    if total == 0 {
        tracing::warn!(chapter = %id, "source returned an empty page list");
        discard_scratch(&scratch).await;
        return PipelineOutcome::Failed;
    }

    let width = index_width(total, MIN_PAGE_WIDTH);
    let existing = existing_stems(&scratch).await;
    let default_extension = &ctx.config().download.default_page_extension;
    let tally = Tally::default();
    let mut network = Vec::new();

    for (index, page) in pages.iter().enumerate() {
        let stem = indexed_name(index + 1, width);
        if let Some(description) = &page.description
            && let Err(e) = write_into(&scratch, &scratch.join(format!("{stem}.desc.txt")), description.as_bytes()).await
        {
            tracing::debug!(chapter = %id, page = index + 1, error = %e, "failed to write page description");
        }

        if existing.contains(&stem) {
            tally.complete();
            continue;
        }

        match &page.content {
            PageContent::Remote { url, context } => network.push(NetworkPage {
                index,
                url: url.clone(),
                context: context.clone(),
                target: scratch.join(&stem),
            }),
            inline => match write_inline(&scratch, &stem, inline, default_extension).await {
                Ok(()) => {
                    tally.complete();
                }
                Err(e) => {
                    tracing::warn!(chapter = %id, page = index + 1, error = %e, "failed to write inline page");
                    tally.fail(1);
                }
            },
        }
    }

    let skipped = total - network.len();
    if skipped > 0 {
        tracing::debug!(chapter = %id, skipped, "pages written without network requests");
        ctx.report_progress(tally.completed(), total).await;
    }

    let interceptor = source.interceptor();
    let fetcher = PageFetcher {
        ctx,
        source: source.as_ref(),
        interceptor,
        scratch: &scratch,
        tally: &tally,
        total,
    };
    if ctx.config().download.concurrent_page_fetch {
        fetcher.fetch_batched(&network).await;
    } else {
        fetcher.fetch_serial(&network).await;
    }

    if ctx.is_cancelled() {
        return PipelineOutcome::Aborted;
    }
    finalize_chapter(ctx, tally.completed(), tally.failed(), total).await
}

/// `Ok(false)` when the run was cancelled while the scratch directory was created
async fn prepare_directories(ctx: &PipelineContext, series_dir: &Path, scratch: &Path) -> Result<bool> {
    tokio::fs::create_dir_all(series_dir).await?;
    if !ctx.create_working_dir(scratch).await? {
        return Ok(false);
    }
    if !path_exists(scratch).await {
        return Err(Error::directory_missing(scratch));
    }
    Ok(true)
}

async fn discard_scratch(scratch: &Path) {
    if let Err(e) = remove_path(scratch).await {
        tracing::warn!(path = ?scratch, error = %e, "failed to remove scratch directory");
    }
}

/// File stems of pages already in the scratch directory
async fn existing_stems(scratch: &Path) -> HashSet<String> {
    let mut stems = HashSet::new();
    let Ok(mut entries) = tokio::fs::read_dir(scratch).await else {
        return stems;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            && !stem.ends_with(".desc")
        {
            stems.insert(stem.to_string());
        }
    }
    stems
}

/// Write `bytes` to `path` only while `dir` still exists
async fn write_into(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    if !path_exists(dir).await {
        return Err(Error::directory_missing(dir));
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn write_inline(scratch: &Path, stem: &str, content: &PageContent, default_extension: &str) -> Result<()> {
    let (bytes, extension) = match content {
        PageContent::Image(bytes) => {
            let extension = image_extension(bytes).unwrap_or(default_extension);
            (bytes.clone(), extension.to_string())
        }
        PageContent::Base64(encoded) => {
            let bytes = decode_base64(encoded)?;
            let extension = image_extension(&bytes).unwrap_or(default_extension).to_string();
            (bytes, extension)
        }
        PageContent::Text(text) => (text.clone().into_bytes(), "txt".to_string()),
        PageContent::Remote { url, .. } => {
            return Err(Error::Other(format!("page {url} needs a network fetch")));
        }
    };
    write_into(scratch, &scratch.join(format!("{stem}.{extension}")), &bytes).await
}

/// Decode plain base64 or a `data:` URL
pub(super) fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.strip_prefix("data:") {
        Some(data_url) => data_url.split_once(',').map(|(_, p)| p).unwrap_or(data_url),
        None => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Source(format!("invalid base64 page data: {e}")))
}

struct PageFetcher<'a> {
    ctx: &'a PipelineContext,
    source: &'a dyn Source,
    interceptor: Option<Arc<dyn PageInterceptor>>,
    scratch: &'a Path,
    tally: &'a Tally,
    total: usize,
}

impl PageFetcher<'_> {
    /// Fixed-size batches in parallel; batches one after another
    async fn fetch_batched(&self, pages: &[NetworkPage]) {
        for batch in pages.chunks(self.ctx.config().batch_size()) {
            if self.ctx.is_cancelled() {
                tracing::debug!(chapter = %self.ctx.id(), "stopping page fetches");
                return;
            }
            futures::future::join_all(batch.iter().map(|page| self.fetch(page))).await;
        }
    }

    /// One page at a time; the rest are abandoned once the scratch directory is gone
    async fn fetch_serial(&self, pages: &[NetworkPage]) {
        for (position, page) in pages.iter().enumerate() {
            if self.ctx.is_cancelled() {
                tracing::debug!(chapter = %self.ctx.id(), "stopping page fetches");
                return;
            }
            if !path_exists(self.scratch).await {
                let abandoned = pages.len() - position;
                tracing::warn!(
                    chapter = %self.ctx.id(),
                    abandoned,
                    "scratch directory disappeared, abandoning remaining pages"
                );
                self.tally.fail(abandoned);
                return;
            }
            self.fetch(page).await;
        }
    }

    async fn fetch(&self, page: &NetworkPage) {
        match self.download(page).await {
            Ok(path) => {
                let done = self.tally.complete();
                tracing::debug!(chapter = %self.ctx.id(), page = page.index + 1, path = ?path, "page saved");
                self.ctx.report_progress(done, self.total).await;
            }
            Err(e) => {
                self.tally.fail(1);
                tracing::warn!(
                    chapter = %self.ctx.id(),
                    page = page.index + 1,
                    url = %page.url,
                    error = %e,
                    "page download failed"
                );
            }
        }
    }

    async fn download(&self, page: &NetworkPage) -> Result<PathBuf> {
        let client = &self.ctx.services.http;
        let source = self.source;
        let default_extension = self.ctx.config().download.default_page_extension.as_str();

        let (bytes, extension) = with_retry(&self.ctx.config().retry, || async move {
            let response = source
                .page_request(client, page)
                .send()
                .await?
                .error_for_status()?;
            let extension = extension_from_response(&response, &page.url, default_extension);
            let bytes = response.bytes().await?;
            Ok::<_, Error>((bytes.to_vec(), extension))
        })
        .await?;

        let (bytes, extension) = match &self.interceptor {
            Some(interceptor) => (intercept(interceptor.clone(), bytes).await?, "png".to_string()),
            None => (bytes, extension),
        };

        if self.ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let path = page.target.with_extension(extension);
        write_into(self.scratch, &path, &bytes).await?;
        Ok(path)
    }
}

/// Decode, transform and re-encode a page on a blocking thread
async fn intercept(interceptor: Arc<dyn PageInterceptor>, bytes: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let image = image::load_from_memory(&bytes)?;
        let image = interceptor.process(image)?;
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png)?;
        Ok(out.into_inner())
    })
    .await
    .map_err(|e| Error::Other(format!("page interceptor task failed: {e}")))?
}
