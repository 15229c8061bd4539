//! Exporter used when no transcoder is available

use async_trait::async_trait;
use std::path::Path;

use super::VideoExporter;
use crate::error::{Error, Result};

/// Exporter that never exports
///
/// Every call returns [`Error::NotSupported`], which sends the video pipeline down its
/// rename fallback: the raw merged transport stream becomes the final file.
pub struct PassthroughExporter;

#[async_trait]
impl VideoExporter for PassthroughExporter {
    async fn export(&self, _input: &Path, _output: &Path) -> Result<()> {
        Err(Error::NotSupported(
            "video export requires ffmpeg. \
             Configure ffmpeg_path in config or ensure ffmpeg is in PATH."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
