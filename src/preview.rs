//! Low-bandwidth preview copies of the library videos, made by ffmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{ControlError, Result};

const TOOL: &str = "ffmpeg";

#[derive(Debug, Clone)]
pub struct PreviewCompressor {
    ffmpeg: String,
    out_dir: PathBuf,
    timeout: Duration,
    /// `width:height` passed to the scale filter.
    scale: &'static str,
    fps: u32,
    crf: u32,
}

impl PreviewCompressor {
    pub fn new(ffmpeg: impl Into<String>, out_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            out_dir,
            timeout,
            scale: "426:240",
            fps: 10,
            crf: 28,
        }
    }

    pub fn output_path(&self, input: &Path) -> Result<PathBuf> {
        let name = input
            .file_name()
            .ok_or_else(|| ControlError::InvalidInput(format!("no file name in {}", input.display())))?;
        Ok(self.out_dir.join(name))
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-loglevel").arg("error")
            .arg("-i").arg(input)
            .arg("-vf").arg(format!("scale={}", self.scale))
            .arg("-c:v").arg("libx264")
            .arg("-preset").arg("ultrafast")
            .arg("-crf").arg(self.crf.to_string())
            .arg("-r").arg(self.fps.to_string())
            .arg("-an")
            .arg("-pix_fmt").arg("yuv420p")
            .arg("-tune").arg("fastdecode")
            .arg("-movflags").arg("+faststart")
            .arg("-f").arg("mp4")
            .arg("-y")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Returns the preview for `input`, compressing it first if it does not
    /// exist yet. Output is written under a unique partial name and renamed,
    /// so an existing file is always a finished preview.
    pub async fn ensure_preview(&self, input: &Path) -> Result<PathBuf> {
        let output = self.output_path(input)?;
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Ok(output);
        }
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(ControlError::NotFound(format!("video file not found: {}", input.display())));
        }

        tokio::fs::create_dir_all(&self.out_dir).await.map_err(|e| {
            ControlError::Persistence(format!("failed to create {}: {e}", self.out_dir.display()))
        })?;

        // Unique per call, so parallel requests and inputs that share a
        // stem never write into the same partial file. Removed on drop.
        let mut prefix = output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "preview".into());
        prefix.push(".");
        let partial = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".part")
            .tempfile_in(&self.out_dir)
            .map_err(|e| {
                ControlError::Persistence(format!("failed to create partial in {}: {e}", self.out_dir.display()))
            })?
            .into_temp_path();
        tracing::info!(input = %input.display(), "compressing preview");

        let res = tokio::time::timeout(self.timeout, self.command(input, &partial).output()).await;
        let out = match res {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(ControlError::external(TOOL, format!("spawn {}: {e}", self.ffmpeg))),
            Err(_) => {
                return Err(ControlError::external(
                    TOOL,
                    format!("preview timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let detail = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exited: {}", out.status));
            return Err(ControlError::external(TOOL, detail));
        }

        partial.persist(&output).map_err(|e| {
            ControlError::Persistence(format!("failed to finalize {}: {}", output.display(), e.error))
        })?;
        tracing::info!(output = %output.display(), "preview ready");
        Ok(output)
    }
}
