use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// What the external player reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The loaded media played to its end.
    EndOfMedia,
    /// The engine gave up on the current media (decode error, vanished file).
    PlaybackError(String),
}

/// The media playback engine driving the display.
///
/// Errors carry the engine's own text; the playback manager turns them into
/// typed errors and decides about retries.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Duration of the media at `path`; fails if it cannot be determined.
    async fn probe_duration(&self, path: &Path) -> anyhow::Result<Duration>;

    /// Loads `path` without starting playback.
    async fn load(&self, path: &Path) -> anyhow::Result<()>;

    async fn play(&self) -> anyhow::Result<()>;

    async fn pause(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn state(&self) -> anyhow::Result<EngineState>;

    /// Playback position, `None` while idle.
    async fn position_ms(&self) -> anyhow::Result<Option<u64>>;

    async fn set_loop(&self, enabled: bool) -> anyhow::Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
