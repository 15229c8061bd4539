//! Turning downloaded HLS segments into one playable file
//!
//! Segments are concatenated in filename order into a raw transport stream, the raw file
//! is probed for at least one track, and a [`VideoExporter`] remuxes it into the final
//! container. Two exporters are provided:
//!
//! - [`FfmpegExporter`]: lossless remux through the external `ffmpeg` binary
//! - [`PassthroughExporter`]: always unsupported, so the caller renames the raw file

mod ffmpeg;
mod passthrough;
pub mod ts;

pub use ffmpeg::FfmpegExporter;
pub use passthrough::PassthroughExporter;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::error::{Error, Result};

/// Converts a merged transport stream into the destination container
#[async_trait]
pub trait VideoExporter: Send + Sync {
    /// Export `input` to `output`, replacing `output` if present
    async fn export(&self, input: &Path, output: &Path) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Pick the exporter described by the tools configuration.
///
/// An explicit `ffmpeg_path` wins; otherwise PATH is searched when allowed. Without a
/// binary the passthrough exporter is used.
pub fn exporter_from_config(tools: &ToolsConfig) -> Arc<dyn VideoExporter> {
    if let Some(path) = &tools.ffmpeg_path {
        return Arc::new(FfmpegExporter::new(path.clone()));
    }
    if tools.search_path
        && let Some(exporter) = FfmpegExporter::from_path()
    {
        tracing::debug!(binary = ?exporter.binary_path(), "using ffmpeg from PATH");
        return Arc::new(exporter);
    }
    tracing::debug!("ffmpeg not available, merged streams will be renamed instead of remuxed");
    Arc::new(PassthroughExporter)
}

/// Sorted `.ts` files of a segment directory
pub async fn segment_files(segments_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(segments_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::directory_missing(segments_dir));
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_segment = path.extension().and_then(|e| e.to_str()) == Some("ts");
        if is_segment && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    // fixed-width names, so lexical order is playback order
    files.sort();
    Ok(files)
}

/// Concatenate every segment file into `output`. Returns the number of segments merged.
pub async fn merge_segments(segments_dir: &Path, output: &Path) -> Result<usize> {
    let files = segment_files(segments_dir).await?;
    if files.is_empty() {
        return Err(Error::NotFound(format!(
            "no segment files in {}",
            segments_dir.display()
        )));
    }

    let mut out = tokio::fs::File::create(output).await?;
    for file in &files {
        let mut segment = tokio::fs::File::open(file).await?;
        tokio::io::copy(&mut segment, &mut out).await?;
    }
    tokio::io::AsyncWriteExt::flush(&mut out).await?;

    tracing::debug!(
        segments = files.len(),
        output = ?output,
        "merged transport stream segments"
    );
    Ok(files.len())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_follows_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        let segments = dir.path().join("segments");
        std::fs::create_dir(&segments).unwrap();
        // written out of order on purpose
        for (name, body) in [("00002.ts", "c"), ("00000.ts", "a"), ("00001.ts", "b")] {
            std::fs::write(segments.join(name), body).unwrap();
        }
        std::fs::write(segments.join("notes.txt"), "ignored").unwrap();

        let output = dir.path().join("raw.ts");
        let merged = merge_segments(&segments, &output).await.unwrap();

        assert_eq!(merged, 3);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "abc");
    }

    #[tokio::test]
    async fn merge_of_missing_directory_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let result = merge_segments(&dir.path().join("gone"), &dir.path().join("raw.ts")).await;
        assert!(matches!(result, Err(Error::DirectoryMissing { .. })));
        assert!(!dir.path().join("raw.ts").exists());
    }

    #[tokio::test]
    async fn merge_of_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = merge_segments(dir.path(), &dir.path().join("raw.ts")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn passthrough_is_unsupported() {
        let result = PassthroughExporter
            .export(Path::new("in.ts"), Path::new("out.mp4"))
            .await;
        assert!(matches!(result, Err(Error::NotSupported(_))));
    }

    #[test]
    fn explicit_ffmpeg_path_is_used() {
        let tools = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/opt/ffmpeg")),
            search_path: false,
        };
        assert_eq!(exporter_from_config(&tools).name(), "ffmpeg");
    }

    #[test]
    fn no_path_and_no_search_falls_back_to_passthrough() {
        let tools = ToolsConfig {
            ffmpeg_path: None,
            search_path: false,
        };
        assert_eq!(exporter_from_config(&tools).name(), "passthrough");
    }
}
