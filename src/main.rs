use std::sync::Arc;

use tracing::{info, warn};

use venuecast_engine::api::{self, AppState};
use venuecast_engine::bus::{BusController, BusSettings, CecClient, SCAN_CACHE_TTL};
use venuecast_engine::config::Config;
use venuecast_engine::playback::{PlaybackManager, PlaybackOptions};
use venuecast_engine::preview::PreviewCompressor;
use venuecast_engine::schedule::{PowerActions, ScheduleController, ScheduleSettings};
use venuecast_engine::system::SystemMonitor;

// Preview compression of a long clip on a Pi takes minutes.
const PREVIEW_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15 * 60);

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use venuecast_engine::playback::mpv::{MpvEngine, MpvSettings};

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let version = env!("CARGO_PKG_VERSION");
    info!(data_dir = %cfg.data_dir.display(), video_dir = %cfg.video_dir.display(), "VenueCast engine {version}");

    tokio::fs::create_dir_all(&cfg.data_dir).await?;
    tokio::fs::create_dir_all(&cfg.video_dir).await?;

    let engine = Arc::new(MpvEngine::new(MpvSettings {
        program: cfg.mpv.clone(),
        ffprobe: cfg.ffprobe.clone(),
        socket_path: cfg.mpv_socket_path(),
        fullscreen: cfg.fullscreen,
        request_timeout: cfg.command_timeout,
    }));
    let playback = Arc::new(PlaybackManager::new(
        engine.clone(),
        PlaybackOptions::new(cfg.video_dir.clone(), cfg.last_played_path()),
    ));
    let events = playback.spawn_event_listener();

    let cec = Arc::new(CecClient::new(
        cfg.cec_client.clone(),
        Some(cfg.osd_name.clone()),
        cfg.command_timeout,
    ));
    let bus = Arc::new(BusController::new(
        cec,
        BusSettings {
            osd_name: cfg.osd_name.clone(),
            self_device_name: cfg.self_device_name.clone(),
            current_input_path: cfg.current_input_path(),
            port_map_path: cfg.port_map_path(),
            cache_ttl: SCAN_CACHE_TTL,
        },
    ));

    let actions = Arc::new(PowerActions::new(bus.clone(), playback.clone()));
    let (schedule, scheduler) =
        ScheduleController::start(ScheduleSettings::new(cfg.schedule_path()), actions, bus.clone()).await?;

    // Pick up where the box left off before the restart.
    match playback.load_last_played().await {
        Ok(Some(path)) => info!(path = %path.display(), "auto-resumed last video"),
        Ok(None) => {}
        Err(e) => warn!("auto-resume failed: {e}"),
    }

    let state = AppState {
        playback,
        schedule,
        bus,
        preview: Arc::new(PreviewCompressor::new(cfg.ffmpeg.clone(), cfg.preview_dir(), PREVIEW_TIMEOUT)),
        system: Arc::new(SystemMonitor::new(version)),
    };
    let app = api::build_router(state);

    info!("VenueCast engine listening on http://{}", cfg.bind);
    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    events.abort();
    engine.shutdown().await;
    Ok(())
}

#[cfg(not(unix))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("venuecast-engine drives mpv over a Unix socket and only runs on Unix hosts")
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    let term = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("no SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
