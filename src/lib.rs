//! # media-dl
//!
//! Download acquisition engine for manga chapters and HLS video episodes.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to [`TaskEvent`]s, no polling required
//! - **Resumable** - Pages and segments already on disk are never fetched twice
//! - **Scraper-agnostic** - Page lists and stream URLs come from injected [`source::Source`]
//!   and [`source::StreamResolver`] implementations
//!
//! One [`DownloadTask`] runs per source. It drains its pending list one download at a
//! time, writes pages or segments into a scratch area, and finalizes finished content
//! into `<root>/<source>/<series>/<chapter>/`, which the shared [`DownloadCache`] indexes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use media_dl::{Config, DownloadTask, TaskServices, TaskEvent};
//! use media_dl::source::Source;
//! use media_dl::types::{ChapterId, ChapterInfo, Download, SeriesInfo};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sources: HashMap<String, Arc<dyn Source>> = HashMap::new();
//!     let services = Arc::new(TaskServices::new(Config::default(), Arc::new(sources))?);
//!
//!     let task = DownloadTask::spawn("example", services);
//!     let mut events = task.subscribe();
//!
//!     task.enqueue(vec![Download::manga(
//!         ChapterId::new("example", "series", "chapter-1"),
//!         SeriesInfo::default(),
//!         ChapterInfo::default(),
//!     )])
//!     .await;
//!     task.start().await;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!         if matches!(event, TaskEvent::TaskFinished { .. }) {
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Index of finished downloads on disk
pub mod cache;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Segment merging, stream probing and video export
pub mod media;
/// On-disk layout and file name sanitizing
pub mod paths;
/// Retry logic with exponential backoff
pub mod retry;
/// Source, interceptor, stream and playlist seams
pub mod source;
/// Download task and its pipelines (decomposed into focused submodules)
pub mod task;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

pub use cache::DownloadCache;
pub use config::{Config, DownloadConfig, RetryConfig, ToolsConfig};
pub use error::{Error, Result};
pub use paths::DirectoryLayout;
pub use task::{DownloadTask, TaskServices};
pub use types::{
    ChapterId, ChapterInfo, Download, DownloadKind, DownloadStatus, Page, PageContent, SeriesId,
    SeriesInfo, TaskEvent, VideoInfo,
};
