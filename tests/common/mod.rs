#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use venuecast_engine::bus::{BusController, BusSettings, CecRunner, SCAN_CACHE_TTL};
use venuecast_engine::error::{ControlError, Result};
use venuecast_engine::playback::{
    EngineEvent, EngineState, MediaEngine, PlaybackManager, PlaybackOptions,
};

/// In-memory engine. Files whose name contains "corrupt" fail the probe.
pub struct FakeEngine {
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<EngineState>,
    loaded: Mutex<Option<PathBuf>>,
    /// Number of upcoming `play` calls that fail.
    pub play_failures: AtomicU32,
    pub load_failures: AtomicU32,
    /// When set, `pause` succeeds but the engine keeps playing.
    pub ignore_pause: AtomicBool,
    pub loads: AtomicU32,
    pub plays: AtomicU32,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            state: Mutex::new(EngineState::Idle),
            loaded: Mutex::new(None),
            play_failures: AtomicU32::new(0),
            load_failures: AtomicU32::new(0),
            ignore_pause: AtomicBool::new(false),
            loads: AtomicU32::new(0),
            plays: AtomicU32::new(0),
        })
    }

    pub fn emit(&self, event: EngineEvent) {
        self.events.send(event).unwrap();
    }

    pub fn loaded(&self) -> Option<PathBuf> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn engine_state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn probe_duration(&self, path: &Path) -> anyhow::Result<Duration> {
        if path.to_string_lossy().contains("corrupt") {
            anyhow::bail!("moov atom not found");
        }
        Ok(Duration::from_secs(30))
    }

    async fn load(&self, path: &Path) -> anyhow::Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.load_failures) {
            anyhow::bail!("loadfile failed");
        }
        *self.loaded.lock().unwrap() = Some(path.to_path_buf());
        *self.state.lock().unwrap() = EngineState::Paused;
        Ok(())
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.play_failures) {
            anyhow::bail!("decoder error");
        }
        *self.state.lock().unwrap() = EngineState::Playing;
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        if !self.ignore_pause.load(Ordering::SeqCst) {
            *self.state.lock().unwrap() = EngineState::Paused;
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        *self.state.lock().unwrap() = EngineState::Idle;
        Ok(())
    }

    async fn state(&self) -> anyhow::Result<EngineState> {
        Ok(self.engine_state())
    }

    async fn position_ms(&self) -> anyhow::Result<Option<u64>> {
        Ok(match self.engine_state() {
            EngineState::Idle => None,
            _ => Some(1_500),
        })
    }

    async fn set_loop(&self, _enabled: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Records every command. Commands starting with a prefix in `failing` fail.
pub struct FakeCec {
    pub commands: Mutex<Vec<String>>,
    pub failing: Mutex<Vec<String>>,
    pub scan_output: Mutex<String>,
    pub power_output: Mutex<String>,
}

pub const SCAN_OUTPUT: &str = "\
opening a connection to the CEC adapter...
CEC bus information
===================
device #0: TV
address:       0.0.0.0
active source: no
vendor:        Samsung
osd string:    TV
CEC version:   1.4

device #4: Playback 1
address:       2.0.0.0
active source: yes
vendor:        Pulse Eight
osd string:    RaspberryPi
CEC version:   1.4

device #8: Playback 2
address:       3.0.0.0
active source: no
vendor:        Sony
osd string:    BluRay
CEC version:   1.4
";

impl FakeCec {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            scan_output: Mutex::new(SCAN_OUTPUT.to_string()),
            power_output: Mutex::new("power status: on\n".to_string()),
        })
    }

    pub fn fail(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }
}

#[async_trait]
impl CecRunner for FakeCec {
    async fn run(&self, command: &str) -> Result<String> {
        self.commands.lock().unwrap().push(command.to_string());
        if self.failing.lock().unwrap().iter().any(|p| command.starts_with(p.as_str())) {
            return Err(ControlError::external("cec-client", "exit status: 1"));
        }
        Ok(match command {
            "scan" => self.scan_output.lock().unwrap().clone(),
            "pow 0" => self.power_output.lock().unwrap().clone(),
            _ => String::new(),
        })
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub engine: Arc<FakeEngine>,
    pub playback: Arc<PlaybackManager>,
}

impl Fixture {
    pub fn video_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    pub fn last_played_path(&self) -> PathBuf {
        self.dir.path().join("last_played.json")
    }

    /// Writes a placeholder video file and returns its path.
    pub fn add_video(&self, name: &str) -> PathBuf {
        let path = self.video_dir().join(name);
        std::fs::write(&path, b"fake video bytes").unwrap();
        path
    }

    pub fn options(&self) -> PlaybackOptions {
        fast_options(self.video_dir(), self.last_played_path())
    }
}

pub fn fast_options(video_dir: PathBuf, last_played_path: PathBuf) -> PlaybackOptions {
    let mut o = PlaybackOptions::new(video_dir, last_played_path);
    o.retry_backoff = Duration::from_millis(10);
    o.pause_verify_timeout = Duration::from_millis(100);
    o
}

pub fn playback_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("videos")).unwrap();
    let engine = FakeEngine::new();
    let options = fast_options(dir.path().join("videos"), dir.path().join("last_played.json"));
    let playback = Arc::new(PlaybackManager::new(engine.clone(), options));
    Fixture {
        dir,
        engine,
        playback,
    }
}

pub fn bus_settings(dir: &Path) -> BusSettings {
    BusSettings {
        osd_name: "RaspberryPi".into(),
        self_device_name: "raspberry pi".into(),
        current_input_path: dir.join("current_input.json"),
        port_map_path: dir.join("hdmi_devices.json"),
        cache_ttl: SCAN_CACHE_TTL,
    }
}

pub fn bus_controller(dir: &Path) -> (Arc<FakeCec>, Arc<BusController>) {
    let cec = FakeCec::new();
    let bus = Arc::new(BusController::new(cec.clone(), bus_settings(dir)));
    (cec, bus)
}
