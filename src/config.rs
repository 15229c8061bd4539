//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Download behavior configuration (directories, fetch strategy, naming)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download root directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Fetch network pages in parallel batches instead of one at a time (default: true)
    ///
    /// This is the user-facing "parallel page downloads" preference. When disabled,
    /// pages are fetched serially and the remaining pages are abandoned as soon as the
    /// scratch directory disappears.
    #[serde(default = "default_true")]
    pub concurrent_page_fetch: bool,

    /// Number of pages or video segments fetched simultaneously per batch (default: 5)
    ///
    /// Batches run one after another; a batch finishes only when all of its fetches have.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Extension used when a page response reveals neither a filename nor a MIME type
    #[serde(default = "default_page_extension")]
    pub default_page_extension: String,

    /// Container extension of the merged video file (default: "mp4")
    #[serde(default = "default_video_extension")]
    pub video_extension: String,

    /// Browser-like user agent added to stream requests that lack one
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout for page, segment, playlist, cover and subtitle fetches
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            concurrent_page_fetch: true,
            batch_size: default_batch_size(),
            default_page_extension: default_page_extension(),
            video_extension: default_video_extension(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Retry behavior for individual page and segment requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// External tool paths (ffmpeg)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for ffmpeg if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            search_path: true,
        }
    }
}

/// Main configuration for the download engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Request retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Download root directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Effective fetch batch size (never zero)
    pub fn batch_size(&self) -> usize {
        self.download.batch_size.max(1)
    }

    /// Check settings that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.batch_size == 0 {
            return Err(Error::Config {
                message: "batch_size must be at least 1".to_string(),
                key: Some("batch_size".to_string()),
            });
        }
        if self.download.video_extension.trim().is_empty() {
            return Err(Error::Config {
                message: "video_extension must not be empty".to_string(),
                key: Some("video_extension".to_string()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be >= 1.0".to_string(),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    5
}

fn default_page_extension() -> String {
    "png".to_string()
}

fn default_video_extension() -> String {
    "mp4".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"
        .to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
