//! Core types for media-dl

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Identifies one series (manga title or show) within a source
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesId {
    /// Opaque key of the source/module that provides the series
    pub source_key: String,
    /// Opaque key of the series within its source
    pub series_key: String,
}

impl SeriesId {
    /// Create a new SeriesId
    pub fn new(source_key: impl Into<String>, series_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            series_key: series_key.into(),
        }
    }

    /// Identify a chapter or episode of this series
    pub fn chapter(&self, chapter_key: impl Into<String>) -> ChapterId {
        ChapterId {
            source_key: self.source_key.clone(),
            series_key: self.series_key.clone(),
            chapter_key: chapter_key.into(),
        }
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source_key, self.series_key)
    }
}

/// Identifies one chapter or episode
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterId {
    /// Opaque key of the source/module
    pub source_key: String,
    /// Opaque key of the series within its source
    pub series_key: String,
    /// Opaque key of the chapter or episode within its series
    pub chapter_key: String,
}

impl ChapterId {
    /// Create a new ChapterId
    pub fn new(
        source_key: impl Into<String>,
        series_key: impl Into<String>,
        chapter_key: impl Into<String>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            series_key: series_key.into(),
            chapter_key: chapter_key.into(),
        }
    }

    /// The series this chapter belongs to
    pub fn series(&self) -> SeriesId {
        SeriesId::new(self.source_key.clone(), self.series_key.clone())
    }

    /// Whether this chapter belongs to `series`
    pub fn belongs_to(&self, series: &SeriesId) -> bool {
        self.source_key == series.source_key && self.series_key == series.series_key
    }
}

impl std::fmt::Display for ChapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_key, self.series_key, self.chapter_key
        )
    }
}

/// Download status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Queued and waiting to start
    #[default]
    Queued,
    /// Currently downloading
    Downloading,
    /// Paused by user
    Paused,
    /// Cancelled by user or rolled back after a total failure
    Cancelled,
    /// Successfully finalized
    Finished,
}

impl DownloadStatus {
    /// Whether a task should still work on an item in this status
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Queued | DownloadStatus::Downloading | DownloadStatus::Paused
        )
    }
}

/// Which acquisition pipeline a download runs through
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    /// Paginated images (manga chapter)
    #[default]
    Manga,
    /// HTTP Live Streaming video (episode)
    Video,
}

/// Series metadata carried by a download
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    /// Display title
    pub title: String,
    /// Cover image URL, fetched opportunistically at finalization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

/// Chapter or episode metadata carried by a download
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Chapter or episode number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f32>,
    /// Volume or season number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

/// Stream details for a video download
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Playable URL, or an opaque episode identifier the stream resolver understands
    pub stream_url: String,
    /// HTTP headers required by the stream host
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Subtitle URL, if already known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_url: Option<String>,
    /// Poster image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    /// Display name of the source/module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

/// A unit of work owned by a download task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Download {
    /// Chapter or episode identifier
    pub id: ChapterId,
    /// Current status
    pub status: DownloadStatus,
    /// Pipeline selector
    pub kind: DownloadKind,
    /// Pages or segments completed so far
    pub progress: usize,
    /// Pages or segments in total; zero until the page list or playlist is known
    pub total: usize,
    /// Series metadata
    pub series: SeriesInfo,
    /// Chapter/episode metadata
    pub chapter: ChapterInfo,
    /// Stream details (video downloads only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoInfo>,
}

impl Download {
    /// A queued manga chapter download
    pub fn manga(id: ChapterId, series: SeriesInfo, chapter: ChapterInfo) -> Self {
        Self {
            id,
            status: DownloadStatus::Queued,
            kind: DownloadKind::Manga,
            progress: 0,
            total: 0,
            series,
            chapter,
            video: None,
        }
    }

    /// A queued video episode download
    pub fn video(id: ChapterId, series: SeriesInfo, chapter: ChapterInfo, video: VideoInfo) -> Self {
        Self {
            id,
            status: DownloadStatus::Queued,
            kind: DownloadKind::Video,
            progress: 0,
            total: 0,
            series,
            chapter,
            video: Some(video),
        }
    }

    /// Record a new progress value.
    ///
    /// Progress never decreases and never exceeds `total` once `total` is known.
    pub fn record_progress(&mut self, progress: usize, total: usize) {
        if total > 0 {
            self.total = total;
        }
        let mut next = self.progress.max(progress);
        if self.total > 0 {
            next = next.min(self.total);
        }
        self.progress = next;
    }

    /// Clear per-download progress counters
    pub fn reset_progress(&mut self) {
        self.progress = 0;
        self.total = 0;
    }
}

/// One page of a chapter as returned by a source
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// Where the page's content comes from
    pub content: PageContent,
    /// Optional caption text persisted next to the page
    pub description: Option<String>,
}

impl Page {
    /// A page that must be fetched from `url`
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            content: PageContent::Remote {
                url: url.into(),
                context: HashMap::new(),
            },
            description: None,
        }
    }
}

/// Payload of a [`Page`]
#[derive(Clone, Debug, PartialEq)]
pub enum PageContent {
    /// Image behind a URL; `context` is opaque per-page request data for the source
    Remote {
        /// Image URL
        url: String,
        /// Opaque request context (headers, tokens) interpreted by the source
        context: HashMap<String, String>,
    },
    /// Raw image bytes
    Image(Vec<u8>),
    /// Base64-encoded image bytes
    Base64(String),
    /// Text page (novels, notices)
    Text(String),
}

/// A page whose image must be fetched over the network
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkPage {
    /// Zero-based position of the page in its chapter
    pub index: usize,
    /// Image URL
    pub url: String,
    /// Opaque per-page request context
    pub context: HashMap<String, String>,
    /// Target path without extension; the extension is resolved from the response
    pub target: PathBuf,
}

/// One HLS transport-stream chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoSegment {
    /// Zero-based sequence index
    pub index: usize,
    /// Absolute segment URL
    pub url: String,
}

/// Sidecar written next to every finished chapter or episode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterMetadata {
    /// Source key
    pub source_key: String,
    /// Series key
    pub series_key: String,
    /// Chapter or episode key
    pub chapter_key: String,
    /// Pipeline the content came from
    pub kind: DownloadKind,
    /// Series display title
    pub series_title: String,
    /// Chapter display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_title: Option<String>,
    /// Chapter or episode number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f32>,
    /// Volume or season number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    /// Display name of the source (video downloads)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Pages or segments that made it to disk
    pub items: usize,
    /// Pages or segments that failed
    pub failed_items: usize,
    /// When finalization completed
    pub downloaded_at: chrono::DateTime<chrono::Utc>,
}

impl ChapterMetadata {
    /// Metadata describing `download` as finalized now
    pub fn for_download(download: &Download, items: usize, failed_items: usize) -> Self {
        Self {
            source_key: download.id.source_key.clone(),
            series_key: download.id.series_key.clone(),
            chapter_key: download.id.chapter_key.clone(),
            kind: download.kind,
            series_title: download.series.title.clone(),
            chapter_title: download.chapter.title.clone(),
            number: download.chapter.number,
            volume: download.chapter.volume,
            source_name: download.video.as_ref().and_then(|v| v.source_name.clone()),
            items,
            failed_items,
            downloaded_at: chrono::Utc::now(),
        }
    }
}

/// Notification emitted by a download task to its scheduler
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Every pending download was cancelled
    TaskCancelled {
        /// Task group (source) key
        source_key: String,
    },
    /// The task was paused
    TaskPaused {
        /// Task group (source) key
        source_key: String,
    },
    /// The pending list drained
    TaskFinished {
        /// Task group (source) key
        source_key: String,
    },
    /// Progress or total changed for a download
    DownloadProgressChanged {
        /// Snapshot of the download
        download: Download,
    },
    /// A download finished (or was already present on disk)
    DownloadFinished {
        /// Snapshot of the download
        download: Download,
    },
    /// A download was cancelled or rolled back
    DownloadCancelled {
        /// Snapshot of the download
        download: Download,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> Download {
        Download::manga(
            ChapterId::new("src", "series", "ch1"),
            SeriesInfo::default(),
            ChapterInfo::default(),
        )
    }

    #[test]
    fn progress_is_clamped_to_total() {
        let mut download = chapter();
        download.record_progress(7, 5);
        assert_eq!(download.progress, 5);
        assert_eq!(download.total, 5);
    }

    #[test]
    fn progress_never_decreases() {
        let mut download = chapter();
        download.record_progress(3, 10);
        download.record_progress(2, 10);
        assert_eq!(download.progress, 3);
    }

    #[test]
    fn zero_total_keeps_known_total() {
        let mut download = chapter();
        download.record_progress(1, 4);
        download.record_progress(2, 0);
        assert_eq!(download.total, 4);
        assert_eq!(download.progress, 2);
    }

    #[test]
    fn pending_statuses() {
        assert!(DownloadStatus::Queued.is_pending());
        assert!(DownloadStatus::Downloading.is_pending());
        assert!(DownloadStatus::Paused.is_pending());
        assert!(!DownloadStatus::Cancelled.is_pending());
        assert!(!DownloadStatus::Finished.is_pending());
    }

    #[test]
    fn chapter_belongs_to_its_series() {
        let id = ChapterId::new("src", "series", "ch1");
        assert!(id.belongs_to(&SeriesId::new("src", "series")));
        assert!(!id.belongs_to(&SeriesId::new("src", "other")));
        assert_eq!(id.series().chapter("ch1"), id);
    }

    #[test]
    fn metadata_copies_download_details() {
        let mut download = chapter();
        download.series.title = "Series".to_string();
        download.chapter.number = Some(12.5);

        let meta = ChapterMetadata::for_download(&download, 9, 1);
        let json = serde_json::to_value(&meta).unwrap();

        assert_eq!(json["series_title"], "Series");
        assert_eq!(json["number"], 12.5);
        assert_eq!(json["kind"], "manga");
        assert_eq!(json["failed_items"], 1);
        assert!(json.get("chapter_title").is_none());
    }

    #[test]
    fn task_event_serializes_with_type_tag() {
        let event = TaskEvent::TaskFinished {
            source_key: "src".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_finished");
        assert_eq!(json["source_key"], "src");
    }
}
