//! Canonical on-disk locations for downloaded content
//!
//! Layout below the download root:
//!
//! ```text
//! <root>/<source>/<series>/cover.<ext>
//! <root>/<source>/<series>/<chapter>/001.png ...        finished manga chapter
//! <root>/<source>/<series>/<chapter>/.metadata.json
//! <root>/<source>/<series>/<chapter>.cbz                 archived chapter
//! <root>/<source>/<series>/.tmp_<chapter>/               manga scratch directory
//! <root>/<source>/<series>/<episode>/<episode>.mp4       finished episode
//! <root>/<source>/<series>/<episode>/segments/00000.ts   in-progress segments
//! ```
//!
//! Every path component goes through [`sanitize_file_name`], so the download cache can
//! key its tree by the same names it reads back from disk.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::types::{ChapterId, SeriesId};

/// Name prefix reserved for in-progress scratch directories
pub const TEMP_PREFIX: &str = ".tmp_";

/// Extension of archived chapters
pub const ARCHIVE_EXTENSION: &str = "cbz";

/// File name of the per-chapter metadata sidecar
pub const METADATA_FILE: &str = ".metadata.json";

/// Name of the video segment working directory inside an episode directory
pub const SEGMENTS_DIR: &str = "segments";

/// File stem of a series cover image
pub const COVER_STEM: &str = "cover";

const MAX_COMPONENT_BYTES: usize = 200;

#[allow(clippy::unwrap_used)]
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Make `name` safe to use as a single path component.
///
/// Path separators, reserved characters and control characters become `_`, runs of
/// whitespace collapse to one space, trailing dots and surrounding whitespace are
/// trimmed, and the result is capped at 200 bytes. Idempotent.
///
/// # Examples
///
/// ```
/// use media_dl::paths::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("Vol. 1: Ch/2?"), "Vol. 1_ Ch_2_");
/// assert_eq!(sanitize_file_name("  spaced   out.  "), "spaced out");
/// ```
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let collapsed = WHITESPACE_RUN.replace_all(&replaced, " ");

    let mut end = collapsed.len().min(MAX_COMPONENT_BYTES);
    while !collapsed.is_char_boundary(end) {
        end -= 1;
    }
    let trimmed = collapsed[..end]
        .trim()
        .trim_end_matches('.')
        .trim_end();

    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether a directory entry name marks an in-progress scratch directory
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Maps source/series/chapter identifiers to canonical filesystem paths
#[derive(Clone, Debug)]
pub struct DirectoryLayout {
    root: PathBuf,
}

impl DirectoryLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Download root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<source>`
    pub fn source_directory(&self, source_key: &str) -> PathBuf {
        self.root.join(sanitize_file_name(source_key))
    }

    /// `<root>/<source>/<series>` (the series entry directory)
    pub fn series_directory(&self, series: &SeriesId) -> PathBuf {
        self.source_directory(&series.source_key)
            .join(sanitize_file_name(&series.series_key))
    }

    /// Final directory of a chapter or episode
    pub fn chapter_directory(&self, id: &ChapterId) -> PathBuf {
        self.series_directory(&id.series())
            .join(sanitize_file_name(&id.chapter_key))
    }

    /// Archive form of a finished chapter
    pub fn chapter_archive(&self, id: &ChapterId) -> PathBuf {
        self.series_directory(&id.series()).join(format!(
            "{}.{}",
            sanitize_file_name(&id.chapter_key),
            ARCHIVE_EXTENSION
        ))
    }

    /// Scratch directory a manga chapter is assembled in before finalization
    pub fn scratch_directory(&self, id: &ChapterId) -> PathBuf {
        self.series_directory(&id.series()).join(format!(
            "{}{}",
            TEMP_PREFIX,
            sanitize_file_name(&id.chapter_key)
        ))
    }

    /// Segment working directory of a video episode
    pub fn segments_directory(&self, id: &ChapterId) -> PathBuf {
        self.chapter_directory(id).join(SEGMENTS_DIR)
    }

    /// Final merged video file of an episode
    pub fn video_file(&self, id: &ChapterId, extension: &str) -> PathBuf {
        self.chapter_directory(id).join(format!(
            "{}.{}",
            sanitize_file_name(&id.chapter_key),
            extension
        ))
    }

    /// Concatenated raw transport stream of an episode
    pub fn raw_stream_file(&self, id: &ChapterId) -> PathBuf {
        self.video_file(id, "ts")
    }

    /// Metadata sidecar of a finished chapter or episode
    pub fn metadata_path(&self, id: &ChapterId) -> PathBuf {
        self.chapter_directory(id).join(METADATA_FILE)
    }

    /// Cover image path for a given extension
    pub fn cover_path(&self, series: &SeriesId, extension: &str) -> PathBuf {
        self.series_directory(series)
            .join(format!("{COVER_STEM}.{extension}"))
    }

    /// Existing cover image of a series, whatever its extension
    pub async fn find_cover(&self, series: &SeriesId) -> Option<PathBuf> {
        let dir = self.series_directory(series);
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(COVER_STEM) {
                return Some(path);
            }
        }
        None
    }

    /// Whether the chapter's final directory or archive is already on disk
    pub async fn is_downloaded_on_disk(&self, id: &ChapterId) -> bool {
        path_exists(&self.chapter_directory(id)).await
            || path_exists(&self.chapter_archive(id)).await
    }

    /// Whether an episode was finalized.
    ///
    /// The episode directory exists while segments are still downloading, so it only
    /// counts once the metadata sidecar is written, or the final video file is present
    /// with no segment directory left beside it.
    pub async fn is_episode_on_disk(&self, id: &ChapterId, extension: &str) -> bool {
        if path_exists(&self.metadata_path(id)).await {
            return true;
        }
        path_exists(&self.video_file(id, extension)).await
            && !path_exists(&self.segments_directory(id)).await
    }
}

/// Async existence check that treats errors as "absent"
pub async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Remove a file or directory tree, ignoring "not found"
pub async fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_file_name("  Chapter \t 12  "), "Chapter 12");
    }

    #[test]
    fn sanitize_strips_trailing_dots() {
        assert_eq!(sanitize_file_name("The End..."), "The End");
    }

    #[test]
    fn sanitize_keeps_leading_temp_marker() {
        assert_eq!(sanitize_file_name(".tmp_ch1"), ".tmp_ch1");
        assert!(is_temp_name(&sanitize_file_name(".tmp_ch1")));
    }

    #[test]
    fn sanitize_empty_becomes_underscore() {
        assert_eq!(sanitize_file_name(""), "_");
        assert_eq!(sanitize_file_name(" . "), "_");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["Vol. 1: Ch/2?", "  x  y ", "ünïcödé name.", "....", "a\u{0007}b"] {
            let once = sanitize_file_name(raw);
            assert_eq!(sanitize_file_name(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let out = sanitize_file_name(&long);
        assert!(out.len() <= MAX_COMPONENT_BYTES);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn layout_paths_nest_under_series() {
        let layout = DirectoryLayout::new("/dl");
        let id = ChapterId::new("src.en", "One: Piece", "ch 1");
        assert_eq!(
            layout.chapter_directory(&id),
            PathBuf::from("/dl/src.en/One_ Piece/ch 1")
        );
        assert_eq!(
            layout.scratch_directory(&id),
            PathBuf::from("/dl/src.en/One_ Piece/.tmp_ch 1")
        );
        assert_eq!(
            layout.chapter_archive(&id),
            PathBuf::from("/dl/src.en/One_ Piece/ch 1.cbz")
        );
        assert_eq!(
            layout.video_file(&id, "mp4"),
            PathBuf::from("/dl/src.en/One_ Piece/ch 1/ch 1.mp4")
        );
        assert_eq!(
            layout.segments_directory(&id),
            PathBuf::from("/dl/src.en/One_ Piece/ch 1/segments")
        );
    }

    #[tokio::test]
    async fn find_cover_matches_any_extension() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DirectoryLayout::new(dir.path());
        let series = SeriesId::new("src", "series");
        assert!(layout.find_cover(&series).await.is_none());

        let cover = layout.cover_path(&series, "webp");
        std::fs::create_dir_all(cover.parent().unwrap()).unwrap();
        std::fs::write(&cover, b"img").unwrap();

        assert_eq!(layout.find_cover(&series).await, Some(cover));
    }

    #[tokio::test]
    async fn partial_episode_is_not_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DirectoryLayout::new(dir.path());
        let id = ChapterId::new("src", "show", "ep1");

        std::fs::create_dir_all(layout.segments_directory(&id)).unwrap();
        std::fs::write(layout.video_file(&id, "mp4"), b"partial").unwrap();
        assert!(!layout.is_episode_on_disk(&id, "mp4").await);

        std::fs::remove_dir(layout.segments_directory(&id)).unwrap();
        assert!(layout.is_episode_on_disk(&id, "mp4").await);
    }

    #[tokio::test]
    async fn remove_path_ignores_missing_targets() {
        let dir = tempfile::tempdir().unwrap();
        remove_path(&dir.path().join("nope")).await.unwrap();

        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("f"), b"x").unwrap();
        remove_path(&dir.path().join("a")).await.unwrap();
        assert!(!dir.path().join("a").exists());
    }
}
