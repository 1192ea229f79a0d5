//! mpv backend, controlled over its JSON IPC socket.
//!
//! mpv runs in idle mode for the lifetime of the engine and is respawned on
//! the next command if it exits. Requests carry a `request_id`; a reader task
//! routes replies back to the waiting caller and turns `end-file` events into
//! `EngineEvent`s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::engine::{EngineEvent, EngineState, MediaEngine};
use super::probe;

type Pending = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

#[derive(Debug, Clone)]
pub struct MpvSettings {
    pub program: String,
    pub ffprobe: String,
    pub socket_path: PathBuf,
    pub fullscreen: bool,
    pub request_timeout: Duration,
}

struct MpvProcess {
    child: Child,
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
}

pub struct MpvEngine {
    settings: MpvSettings,
    events: broadcast::Sender<EngineEvent>,
    process: Mutex<Option<MpvProcess>>,
    pending: Pending,
    loaded: Mutex<Option<PathBuf>>,
    next_id: AtomicU64,
}

impl MpvEngine {
    pub fn new(settings: MpvSettings) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            settings,
            events,
            process: Mutex::new(None),
            pending: Arc::new(std::sync::Mutex::new(HashMap::new())),
            loaded: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn spawn(&self) -> anyhow::Result<MpvProcess> {
        let sock = &self.settings.socket_path;
        let _ = tokio::fs::remove_file(sock).await;

        let mut cmd = Command::new(&self.settings.program);
        cmd.arg("--idle=yes")
            .arg(format!("--input-ipc-server={}", sock.display()))
            .arg("--no-terminal")
            .arg("--keep-open=no")
            .arg("--loop-file=inf")
            .arg("--no-osc")
            .arg("--osd-level=0")
            .arg("--no-input-default-bindings")
            .arg("--cursor-autohide=always");
        if self.settings.fullscreen {
            cmd.arg("--fullscreen");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.settings.program))?;

        // mpv creates the socket shortly after start.
        let mut stream = None;
        for _ in 0..50 {
            if let Ok(Some(status)) = child.try_wait() {
                anyhow::bail!("mpv exited during startup: {status}");
            }
            match UnixStream::connect(sock).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
        let stream = stream.ok_or_else(|| anyhow::anyhow!("mpv IPC socket {} never appeared", sock.display()))?;
        let (read_half, writer) = stream.into_split();

        let pending = self.pending.clone();
        let events = self.events.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                route_message(&msg, &pending, &events);
            }
            tracing::warn!("mpv IPC connection closed");
        });

        tracing::info!(socket = %sock.display(), "mpv started");
        Ok(MpvProcess {
            child,
            writer,
            reader_task,
        })
    }

    async fn request(&self, command: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| anyhow::anyhow!("mpv pending map poisoned"))?
            .insert(id, tx);

        let line = format!("{}\n", json!({ "command": command.clone(), "request_id": id }));
        if let Err(e) = self.send_line(&line).await {
            self.forget(id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(v)) => v,
            Ok(Err(_)) => anyhow::bail!("mpv dropped request {command}"),
            Err(_) => {
                self.forget(id);
                anyhow::bail!("mpv request {command} timed out");
            }
        };

        match reply.get("error").and_then(Value::as_str) {
            Some("success") => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
            Some(err) => anyhow::bail!("mpv {command}: {err}"),
            None => anyhow::bail!("mpv {command}: malformed reply {reply}"),
        }
    }

    /// Writes one IPC line, (re)starting mpv first if it is not running.
    async fn send_line(&self, line: &str) -> anyhow::Result<()> {
        let mut guard = self.process.lock().await;
        let alive = match guard.as_mut() {
            Some(p) => matches!(p.child.try_wait(), Ok(None)),
            None => false,
        };
        if !alive {
            if let Some(old) = guard.take() {
                old.reader_task.abort();
                tracing::warn!("mpv is not running; restarting");
            }
            *guard = Some(self.spawn().await?);
        }

        let p = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("mpv unavailable"))?;
        p.writer
            .write_all(line.as_bytes())
            .await
            .context("mpv IPC write")
    }

    fn forget(&self, id: u64) {
        if let Ok(mut p) = self.pending.lock() {
            p.remove(&id);
        }
    }

    async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.request(json!(["set_property", name, value])).await.map(|_| ())
    }

    async fn get_property(&self, name: &str) -> anyhow::Result<Value> {
        self.request(json!(["get_property", name])).await
    }

    async fn is_idle(&self) -> anyhow::Result<bool> {
        Ok(self.get_property("idle-active").await?.as_bool().unwrap_or(true))
    }

    /// Quits mpv and reaps the child.
    pub async fn shutdown(&self) {
        let mut guard = self.process.lock().await;
        if let Some(mut p) = guard.take() {
            let _ = p.writer.write_all(b"{\"command\":[\"quit\"]}\n").await;
            if tokio::time::timeout(Duration::from_secs(2), p.child.wait()).await.is_err() {
                let _ = p.child.kill().await;
            }
            p.reader_task.abort();
            tracing::info!("mpv stopped");
        }
    }
}

fn route_message(msg: &Value, pending: &Pending, events: &broadcast::Sender<EngineEvent>) {
    if let Some(id) = msg.get("request_id").and_then(Value::as_u64) {
        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
        if let Some(tx) = waiter {
            let _ = tx.send(msg.clone());
        }
        return;
    }

    if msg.get("event").and_then(Value::as_str) != Some("end-file") {
        return;
    }
    let event = match msg.get("reason").and_then(Value::as_str) {
        Some("eof") => EngineEvent::EndOfMedia,
        Some("error") => EngineEvent::PlaybackError(
            msg.get("file_error")
                .and_then(Value::as_str)
                .unwrap_or("playback error")
                .to_string(),
        ),
        _ => return,
    };
    // No subscribers is fine.
    let _ = events.send(event);
}

#[async_trait]
impl MediaEngine for MpvEngine {
    async fn probe_duration(&self, path: &Path) -> anyhow::Result<Duration> {
        probe::probe_duration(&self.settings.ffprobe, path, self.settings.request_timeout).await
    }

    async fn load(&self, path: &Path) -> anyhow::Result<()> {
        self.set_property("pause", json!(true)).await?;
        self.request(json!(["loadfile", path.to_string_lossy(), "replace"]))
            .await?;
        *self.loaded.lock().await = Some(path.to_path_buf());
        Ok(())
    }

    async fn play(&self) -> anyhow::Result<()> {
        // `stop` unloads the file in mpv, so a play after stop reloads it.
        if self.is_idle().await? {
            let loaded = self.loaded.lock().await.clone();
            let path = loaded.ok_or_else(|| anyhow::anyhow!("mpv has no media loaded"))?;
            self.request(json!(["loadfile", path.to_string_lossy(), "replace"]))
                .await?;
        }
        self.set_property("pause", json!(false)).await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.set_property("pause", json!(true)).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.request(json!(["stop"])).await.map(|_| ())
    }

    async fn state(&self) -> anyhow::Result<EngineState> {
        if self.is_idle().await? {
            return Ok(EngineState::Idle);
        }
        let paused = self.get_property("pause").await?.as_bool().unwrap_or(false);
        Ok(if paused {
            EngineState::Paused
        } else {
            EngineState::Playing
        })
    }

    async fn position_ms(&self) -> anyhow::Result<Option<u64>> {
        if self.is_idle().await? {
            return Ok(None);
        }
        // time-pos is unavailable while a file is still opening.
        match self.get_property("time-pos").await {
            Ok(v) => Ok(v.as_f64().map(|s| (s.max(0.0) * 1000.0) as u64)),
            Err(_) => Ok(None),
        }
    }

    async fn set_loop(&self, enabled: bool) -> anyhow::Result<()> {
        let value = if enabled { "inf" } else { "no" };
        self.set_property("loop-file", json!(value)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
