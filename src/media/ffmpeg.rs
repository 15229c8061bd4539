//! Video exporter backed by the external ffmpeg binary

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::VideoExporter;
use crate::error::{Error, Result};

/// Remuxes a raw transport stream into the destination container with `ffmpeg`.
///
/// Streams are copied, not re-encoded, so the output keeps the highest quality the
/// source offered.
pub struct FfmpegExporter {
    binary_path: PathBuf,
}

impl FfmpegExporter {
    /// Create an exporter with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Binary this exporter runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

#[async_trait]
impl VideoExporter for FfmpegExporter {
    async fn export(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.binary_path)
            .args(build_args(input, output))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("failed to execute ffmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::ExternalTool(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// ffmpeg arguments for a lossless remux of `input` into `output`
fn build_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());
    args.extend(["-map", "0", "-c", "copy"].map(OsString::from));

    // ADTS AAC must be rewrapped for ISO BMFF containers
    let is_mp4_family = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "mp4" | "m4v" | "mov"));
    if is_mp4_family {
        args.extend(["-bsf:a", "aac_adtstoasc"].map(OsString::from));
    }

    args.push(output.as_os_str().to_owned());
    args
}
