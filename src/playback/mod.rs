//! Playback lifecycle for the looping venue video.
//!
//! `PlaybackManager` owns the media engine and the `PlaybackSession`. Every
//! state change goes through its methods, under one mutex. Recovery is
//! local: engine failures are retried with a fixed backoff. Every failure
//! counts toward `max_retries`; the count is reset only by a fresh
//! `load_video` or by `stop`, not by a successful play or loop. Once the
//! ceiling is reached the session parks in `Error` until a fresh
//! `load_video` succeeds.

pub mod engine;
#[cfg(unix)]
pub mod mpv;
pub mod probe;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};
use crate::store;

pub use engine::{EngineEvent, EngineState, MediaEngine};

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);
pub const PAUSE_VERIFY_TIMEOUT: Duration = Duration::from_millis(500);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mkv", "mov"];

const ENGINE: &str = "media engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    NoMedia,
    Stopped,
    Playing,
    Paused,
    Error,
}

#[derive(Debug)]
pub struct PlaybackSession {
    pub current_video: Option<PathBuf>,
    pub state: PlayerState,
    pub loop_enabled: bool,
    pub error_count: u32,
    pub last_known_position_ms: u64,
    pub last_error: Option<String>,
    /// Cancelled by stop/load so a sleeping retry does not resurrect playback.
    retry_cancel: CancellationToken,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            current_video: None,
            state: PlayerState::NoMedia,
            loop_enabled: true,
            error_count: 0,
            last_known_position_ms: 0,
            last_error: None,
            retry_cancel: CancellationToken::new(),
        }
    }
}

impl PlaybackSession {
    fn fresh_retry_token(&mut self) -> CancellationToken {
        self.retry_cancel.cancel();
        self.retry_cancel = CancellationToken::new();
        self.retry_cancel.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    /// File name of the current video.
    pub current_video: Option<String>,
    pub path: Option<String>,
    pub state: PlayerState,
    pub is_playing: bool,
    pub is_looping: bool,
    pub error_count: u32,
    pub position_ms: Option<u64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoEntry {
    pub name: String,
    pub size_bytes: u64,
    pub modified_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct LastPlayed {
    last_video: String,
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub video_dir: PathBuf,
    pub last_played_path: PathBuf,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub pause_verify_timeout: Duration,
}

impl PlaybackOptions {
    pub fn new(video_dir: PathBuf, last_played_path: PathBuf) -> Self {
        Self {
            video_dir,
            last_played_path,
            max_retries: MAX_RETRIES,
            retry_backoff: RETRY_BACKOFF,
            pause_verify_timeout: PAUSE_VERIFY_TIMEOUT,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct PlaybackManager {
    engine: Arc<dyn MediaEngine>,
    options: PlaybackOptions,
    session: Mutex<PlaybackSession>,
}

impl PlaybackManager {
    pub fn new(engine: Arc<dyn MediaEngine>, options: PlaybackOptions) -> Self {
        Self {
            engine,
            options,
            session: Mutex::new(PlaybackSession::default()),
        }
    }

    /// Resolves a bare file name inside the video directory.
    pub fn video_path(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ControlError::InvalidInput(format!("invalid video name {name:?}")));
        }
        Ok(self.options.video_dir.join(name))
    }

    pub async fn current_video(&self) -> Option<PathBuf> {
        self.session.lock().await.current_video.clone()
    }

    /// Counts one engine failure; returns true once the ceiling is reached,
    /// leaving the session in `Error`.
    fn record_failure(&self, s: &mut PlaybackSession, msg: &str) -> bool {
        s.error_count = (s.error_count + 1).min(self.options.max_retries);
        s.last_error = Some(msg.to_string());
        if s.error_count >= self.options.max_retries {
            s.state = PlayerState::Error;
            tracing::error!(errors = s.error_count, "playback retries exhausted: {msg}");
            true
        } else {
            false
        }
    }

    async fn validate(&self, path: &Path) -> Result<()> {
        let duration = self
            .engine
            .probe_duration(path)
            .await
            .map_err(|e| ControlError::ValidationFailed(format!("{}: {e:#}", path.display())))?;

        tokio::fs::File::open(path).await.map_err(|e| {
            ControlError::ValidationFailed(format!("{} is not readable: {e}", path.display()))
        })?;

        tracing::debug!(path = %path.display(), duration_ms = duration.as_millis() as u64, "video validated");
        Ok(())
    }

    /// Puts `path` into the engine with native repeat configured.
    async fn engine_load(&self, path: &Path, loop_enabled: bool) -> anyhow::Result<()> {
        self.engine.load(path).await?;
        if let Err(e) = self.engine.set_loop(loop_enabled).await {
            // End-of-media reloads still keep the loop going.
            tracing::warn!("engine refused loop mode: {e:#}");
        }
        Ok(())
    }

    pub async fn load_video(&self, path: &Path) -> Result<()> {
        match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => {}
            _ => return Err(ControlError::NotFound(format!("video file not found: {}", path.display()))),
        }
        self.validate(path).await?;

        {
            let mut s = self.session.lock().await;
            s.fresh_retry_token();

            if let Err(e) = self.engine_load(path, s.loop_enabled).await {
                let msg = format!("{e:#}");
                self.record_failure(&mut s, &msg);
                return Err(ControlError::external(ENGINE, msg));
            }

            s.current_video = Some(path.to_path_buf());
            s.state = PlayerState::Stopped;
            s.error_count = 0;
            s.last_error = None;
            s.last_known_position_ms = 0;
            tracing::info!(path = %path.display(), "video loaded");

            // Written under the session lock so the pointer always names the
            // video the engine holds. A failed write only affects the next
            // restart.
            let pointer = LastPlayed {
                last_video: self.pointer_for(path).await,
            };
            if let Err(e) = store::write_json(&self.options.last_played_path, &pointer).await {
                tracing::error!("failed to save last played video: {e}");
            }
        }
        Ok(())
    }

    /// Library videos are recorded by file name and resolved against the
    /// video directory on resume; anything else by its absolute path.
    async fn pointer_for(&self, path: &Path) -> String {
        if let Ok(rel) = path.strip_prefix(&self.options.video_dir) {
            if rel.components().count() == 1 {
                return rel.to_string_lossy().to_string();
            }
        }
        tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string()
    }

    /// Retries reload+play after `first_error` until it works, the retry
    /// ceiling is reached, or `token` is cancelled.
    async fn recover<'a>(
        &'a self,
        mut s: MutexGuard<'a, PlaybackSession>,
        path: PathBuf,
        token: CancellationToken,
        first_error: anyhow::Error,
    ) -> Result<()> {
        let mut last = first_error;
        loop {
            let msg = format!("{last:#}");
            tracing::warn!(path = %path.display(), errors = s.error_count + 1, "playback error: {msg}");
            if self.record_failure(&mut s, &msg) {
                return Err(ControlError::RetryExhausted {
                    attempts: s.error_count,
                    last_error: msg,
                });
            }
            drop(s);

            tokio::select! {
                _ = token.cancelled() => {
                    return Err(ControlError::Cancelled("playback recovery preempted".into()));
                }
                _ = tokio::time::sleep(self.options.retry_backoff) => {}
            }

            s = self.session.lock().await;
            if token.is_cancelled() {
                return Err(ControlError::Cancelled("playback recovery preempted".into()));
            }

            tracing::info!(path = %path.display(), "attempting playback recovery");
            let attempt = match self.engine_load(&path, s.loop_enabled).await {
                Ok(()) => self.engine.play().await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(()) => {
                    s.state = PlayerState::Playing;
                    s.last_known_position_ms = 0;
                    tracing::info!("playback recovery successful");
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
    }

    pub async fn play(&self) -> Result<()> {
        let mut s = self.session.lock().await;
        let path = match (&s.current_video, s.state) {
            (None, _) => return Err(ControlError::NoMedia),
            (Some(_), PlayerState::Error) => {
                return Err(ControlError::InvalidState(
                    "player is in error state; load a video to recover".into(),
                ))
            }
            (Some(_), PlayerState::Playing) => return Ok(()),
            (Some(p), _) => p.clone(),
        };
        let token = s.fresh_retry_token();

        match self.engine.play().await {
            Ok(()) => {
                s.state = PlayerState::Playing;
                tracing::info!(path = %path.display(), "playback started");
                Ok(())
            }
            Err(e) => self.recover(s, path, token, e).await,
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let mut s = self.session.lock().await;
        match (&s.current_video, s.state) {
            (None, _) => return Err(ControlError::NoMedia),
            (_, PlayerState::Paused) => return Ok(()),
            (_, PlayerState::Playing) => {}
            (_, other) => {
                return Err(ControlError::InvalidState(format!("cannot pause while {other:?}")))
            }
        }

        if let Err(e) = self.engine.pause().await {
            let msg = format!("{e:#}");
            self.record_failure(&mut s, &msg);
            return Err(ControlError::external(ENGINE, msg));
        }

        let deadline = tokio::time::Instant::now() + self.options.pause_verify_timeout;
        loop {
            if let Ok(EngineState::Paused) = self.engine.state().await {
                s.state = PlayerState::Paused;
                tracing::info!("playback paused");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }

        let msg = format!(
            "pause not confirmed by engine within {}ms",
            self.options.pause_verify_timeout.as_millis()
        );
        self.record_failure(&mut s, &msg);
        Err(ControlError::external(ENGINE, msg))
    }

    /// Continues a paused video.
    pub async fn resume(&self) -> Result<()> {
        {
            let s = self.session.lock().await;
            if s.current_video.is_none() {
                return Err(ControlError::NoMedia);
            }
            if s.state != PlayerState::Paused {
                return Err(ControlError::InvalidState("video is not paused".into()));
            }
        }
        self.play().await
    }

    pub async fn stop(&self) -> Result<()> {
        let mut s = self.session.lock().await;
        if s.current_video.is_none() {
            return Err(ControlError::NoMedia);
        }
        s.fresh_retry_token();

        self.engine
            .stop()
            .await
            .map_err(|e| ControlError::external(ENGINE, format!("{e:#}")))?;

        s.error_count = 0;
        s.last_known_position_ms = 0;
        if s.state != PlayerState::Error {
            s.state = PlayerState::Stopped;
        }
        tracing::info!("playback stopped");
        Ok(())
    }

    /// Snapshot for the status endpoint. Never fails: engine errors are
    /// reported as `Error` with a message.
    pub async fn get_status(&self) -> PlaybackStatus {
        let mut s = self.session.lock().await;
        let mut status = PlaybackStatus {
            current_video: s.current_video.as_deref().map(file_name),
            path: s.current_video.as_ref().map(|p| p.display().to_string()),
            state: s.state,
            is_playing: s.state == PlayerState::Playing,
            is_looping: s.loop_enabled,
            error_count: s.error_count,
            position_ms: None,
            message: None,
        };

        match s.state {
            PlayerState::Playing | PlayerState::Paused => match self.engine.position_ms().await {
                Ok(pos) => {
                    if let Some(p) = pos {
                        s.last_known_position_ms = p;
                    }
                    status.position_ms = Some(pos.unwrap_or(s.last_known_position_ms));
                }
                Err(e) => {
                    status.state = PlayerState::Error;
                    status.is_playing = false;
                    status.message = Some(format!("engine status unavailable: {e:#}"));
                }
            },
            PlayerState::Error => status.message = s.last_error.clone(),
            PlayerState::NoMedia | PlayerState::Stopped => {}
        }
        status
    }

    /// Restarts the video when the engine reports it reached the end.
    pub async fn handle_end_of_media(&self) -> Result<()> {
        let mut s = self.session.lock().await;
        if !s.loop_enabled || s.state != PlayerState::Playing {
            return Ok(());
        }
        let Some(path) = s.current_video.clone() else {
            return Ok(());
        };
        let token = s.fresh_retry_token();

        let attempt = match self.engine_load(&path, true).await {
            Ok(()) => self.engine.play().await,
            Err(e) => Err(e),
        };
        match attempt {
            Ok(()) => {
                s.last_known_position_ms = 0;
                tracing::debug!(path = %path.display(), "looped video");
                Ok(())
            }
            Err(e) => self.recover(s, path, token, e).await,
        }
    }

    /// Engine gave up on the media mid-playback.
    pub async fn handle_playback_error(&self, message: &str) -> Result<()> {
        let mut s = self.session.lock().await;
        if s.state != PlayerState::Playing {
            return Ok(());
        }
        let Some(path) = s.current_video.clone() else {
            return Ok(());
        };
        let token = s.fresh_retry_token();
        self.recover(s, path, token, anyhow::anyhow!("{message}")).await
    }

    /// Subscribes to engine events and feeds them to the manager.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.engine.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let res = match rx.recv().await {
                    Ok(EngineEvent::EndOfMedia) => this.handle_end_of_media().await,
                    Ok(EngineEvent::PlaybackError(msg)) => this.handle_playback_error(&msg).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("engine events lagged by {n}");
                        Ok(())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Err(e) = res {
                    tracing::error!("engine event handling failed: {e}");
                }
            }
        })
    }

    /// Loads and plays the persisted last video. `Ok(None)` when there is
    /// nothing to resume.
    pub async fn load_last_played(&self) -> Result<Option<PathBuf>> {
        let Some(pointer) = store::read_json::<LastPlayed>(&self.options.last_played_path).await? else {
            tracing::info!("no last played video recorded");
            return Ok(None);
        };

        let recorded = PathBuf::from(&pointer.last_video);
        let path = if recorded.is_absolute() {
            recorded
        } else {
            self.options.video_dir.join(recorded)
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!(path = %path.display(), "last played video no longer exists");
            return Ok(None);
        }

        self.load_video(&path).await?;
        self.play().await?;
        tracing::info!(path = %path.display(), "resumed last played video");
        Ok(Some(path))
    }

    /// Loads `name` from the video directory and starts it.
    pub async fn play_named(&self, name: &str) -> Result<()> {
        let path = self.video_path(name)?;
        self.load_video(&path).await?;
        self.play().await
    }

    /// Playable files in the video directory, sorted by name.
    pub async fn list_videos(&self) -> Result<Vec<VideoEntry>> {
        let dir = &self.options.video_dir;
        let mut rd = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ControlError::Persistence(format!(
                    "failed to read_dir({}): {e}",
                    dir.display()
                )))
            }
        };

        let mut out = Vec::new();
        while let Some(ent) = rd
            .next_entry()
            .await
            .map_err(|e| ControlError::Persistence(format!("failed to read_dir entry: {e}")))?
        {
            let path = ent.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let ext = ext.to_ascii_lowercase();
            if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
            let Ok(meta) = ent.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64);
            out.push(VideoEntry {
                name: file_name(&path),
                size_bytes: meta.len(),
                modified_ms,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}
