use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{ControlError, Result};

const TOOL: &str = "cec-client";

/// Runs one command line against the CEC bus utility and returns its stdout.
///
/// Implementations must report a nonzero exit or timeout as an error and
/// must not retry.
#[async_trait]
pub trait CecRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<String>;
}

/// `cec-client` in single-command mode (`-s`), fed through stdin.
pub struct CecClient {
    program: String,
    osd_name: Option<String>,
    timeout: Duration,
}

impl CecClient {
    pub fn new(program: impl Into<String>, osd_name: Option<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            osd_name,
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(osd) = &self.osd_name {
            cmd.arg("-o").arg(osd);
        }
        cmd.arg("-s")
            .arg("-d").arg("1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Last meaningful line of utility output, for error messages.
fn last_output_summary(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn adapter_unreachable(text: &str) -> bool {
    let lc = text.to_ascii_lowercase();
    lc.contains("unable to open the device")
        || lc.contains("could not open a connection")
        || lc.contains("autodetect failed")
        || lc.contains("no device type given")
}

#[async_trait]
impl CecRunner for CecClient {
    async fn run(&self, command: &str) -> Result<String> {
        tracing::debug!(command, "cec-client");

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| ControlError::external(TOOL, format!("spawn {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ControlError::external(TOOL, "stdin unavailable"))?;
        stdin
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| ControlError::external(TOOL, format!("write command: {e}")))?;
        drop(stdin);

        // Dropping the future on timeout drops the child, which kills it.
        let out = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(ControlError::external(TOOL, format!("wait: {e}"))),
            Err(_) => {
                return Err(ControlError::external(
                    TOOL,
                    format!("`{command}` timed out after {}s", self.timeout.as_secs()),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&out.stdout).to_string();
        let stderr = String::from_utf8_lossy(&out.stderr).to_string();

        if adapter_unreachable(&stdout) || adapter_unreachable(&stderr) {
            let detail = last_output_summary(&stderr)
                .or_else(|| last_output_summary(&stdout))
                .unwrap_or_else(|| "CEC adapter not available".into());
            return Err(ControlError::DeviceUnreachable(detail));
        }

        if !out.status.success() {
            let detail = last_output_summary(&stderr)
                .or_else(|| last_output_summary(&stdout))
                .unwrap_or_else(|| format!("exited: {}", out.status));
            return Err(ControlError::external(TOOL, format!("`{command}`: {detail}")));
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_last_non_empty_line() {
        assert_eq!(
            last_output_summary("first\nERROR: bad\n\n  \n").as_deref(),
            Some("ERROR: bad")
        );
        assert_eq!(last_output_summary("\n\n"), None);
    }

    #[test]
    fn detects_missing_adapter() {
        assert!(adapter_unreachable("ERROR:   [  102] unable to open the device on port RPI"));
        assert!(adapter_unreachable("autodetect FAILED"));
        assert!(!adapter_unreachable("power status: on"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_external_tool_failure() {
        let client = CecClient::new("false", None, Duration::from_secs(5));
        let err = client.run("scan").await.unwrap_err();
        assert!(matches!(err, ControlError::ExternalTool { tool: "cec-client", .. }));
    }

    #[tokio::test]
    async fn missing_program_is_external_tool_failure() {
        let client = CecClient::new("/nonexistent/cec-client", None, Duration::from_secs(5));
        let err = client.run("scan").await.unwrap_err();
        assert!(matches!(err, ControlError::ExternalTool { .. }));
    }
}
