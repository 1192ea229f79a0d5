use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;

/// Media duration via `ffprobe`. Fails on nonzero exit, empty output, or a
/// non-positive duration.
pub async fn probe_duration(ffprobe: &str, path: &Path, timeout: Duration) -> anyhow::Result<Duration> {
    let mut cmd = Command::new(ffprobe);
    cmd.arg("-v").arg("error")
        .arg("-show_entries").arg("format=duration")
        .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .kill_on_drop(true);

    let out = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("ffprobe timed out after {}s", timeout.as_secs()))?
        .with_context(|| format!("failed to run {ffprobe}"))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let detail = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty());
        anyhow::bail!(
            "ffprobe exited {}: {}",
            out.status,
            detail.unwrap_or("no output")
        );
    }

    parse_duration(&String::from_utf8_lossy(&out.stdout))
}

fn parse_duration(stdout: &str) -> anyhow::Result<Duration> {
    let s = stdout.trim();
    if s.is_empty() {
        anyhow::bail!("ffprobe reported no duration");
    }

    let secs: f64 = s
        .parse()
        .with_context(|| format!("unparsable duration {s:?}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("non-positive duration {secs}");
    }
    Ok(Duration::from_secs_f64(secs))
}
