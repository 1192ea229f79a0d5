//! HTTP surface. Handlers are thin: parse, call one component operation,
//! serialise the result. `ControlError` renders its own status and body.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::bus::{BusController, HdmiPortMap, PowerStatus, ScanResponse};
use crate::error::{ControlError, Result};
use crate::playback::{PlaybackManager, PlaybackStatus, VideoEntry};
use crate::preview::PreviewCompressor;
use crate::schedule::{DailyTrigger, ScheduleController, TestCycleReport, WeeklySchedule};
use crate::system::{SystemInfo, SystemMonitor};

#[derive(Clone)]
pub struct AppState {
    pub playback: Arc<PlaybackManager>,
    pub schedule: Arc<ScheduleController>,
    pub bus: Arc<BusController>,
    pub preview: Arc<PreviewCompressor>,
    pub system: Arc<SystemMonitor>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        // Playback
        .route("/api/v1/status", get(status))
        .route("/api/v1/playback/play", post(play))
        .route("/api/v1/playback/pause", post(pause))
        .route("/api/v1/playback/resume", post(resume))
        .route("/api/v1/playback/stop", post(stop))
        .route("/api/v1/videos", get(videos))
        .route("/api/v1/videos/:name/preview", get(preview))
        // Schedule and TV power
        .route(
            "/api/v1/schedule",
            get(get_schedule).post(set_schedule).delete(clear_schedule),
        )
        .route("/api/v1/schedule/triggers", get(triggers))
        .route("/api/v1/tv/test", post(tv_test))
        .route("/api/v1/tv/status", get(tv_status))
        // HDMI-CEC bus
        .route("/api/v1/devices", get(devices))
        .route("/api/v1/devices/rescan", post(rescan))
        .route("/api/v1/input", get(current_input))
        .route("/api/v1/input/:n", post(switch_input))
        .route(
            "/api/v1/hdmi-map",
            get(get_port_map).post(set_port_map).delete(reset_port_map),
        )
        .route("/api/v1/system/info", get(system_info))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Unwraps a JSON body; malformed or mistyped bodies become `InvalidInput`
/// so they render as 400 with the usual error body.
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ControlError::InvalidInput(rejection.body_text()))
}

// --- Playback ------------------------------------------------------------

async fn status(State(st): State<AppState>) -> Json<PlaybackStatus> {
    Json(st.playback.get_status().await)
}

#[derive(Deserialize)]
struct PlayRequest {
    video_name: String,
}

async fn play(
    State(st): State<AppState>,
    payload: std::result::Result<Json<PlayRequest>, JsonRejection>,
) -> Result<Json<PlaybackStatus>> {
    let req = json_body(payload)?;
    st.playback.play_named(&req.video_name).await?;
    Ok(Json(st.playback.get_status().await))
}

async fn pause(State(st): State<AppState>) -> Result<Json<PlaybackStatus>> {
    st.playback.pause().await?;
    Ok(Json(st.playback.get_status().await))
}

async fn resume(State(st): State<AppState>) -> Result<Json<PlaybackStatus>> {
    st.playback.resume().await?;
    Ok(Json(st.playback.get_status().await))
}

async fn stop(State(st): State<AppState>) -> Result<Json<PlaybackStatus>> {
    st.playback.stop().await?;
    Ok(Json(st.playback.get_status().await))
}

async fn videos(State(st): State<AppState>) -> Result<Json<Vec<VideoEntry>>> {
    Ok(Json(st.playback.list_videos().await?))
}

async fn preview(State(st): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse> {
    let input = st.playback.video_path(&name)?;
    let output = st.preview.ensure_preview(&input).await?;
    let read_err = |e: std::io::Error| ControlError::Persistence(format!("failed to read {}: {e}", output.display()));
    let file = tokio::fs::File::open(&output).await.map_err(read_err)?;
    let len = file.metadata().await.map_err(read_err)?.len();

    let body = Body::from_stream(tokio_util::io::ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    ))
}

// --- Schedule ------------------------------------------------------------

async fn get_schedule(State(st): State<AppState>) -> Json<WeeklySchedule> {
    Json(st.schedule.get_schedule().await)
}

async fn set_schedule(
    State(st): State<AppState>,
    payload: std::result::Result<Json<WeeklySchedule>, JsonRejection>,
) -> Result<Json<Value>> {
    let triggers = st.schedule.set_schedule(json_body(payload)?).await?;
    Ok(Json(json!({ "ok": true, "triggers": triggers })))
}

async fn clear_schedule(State(st): State<AppState>) -> Result<Json<Value>> {
    st.schedule.clear_schedule().await?;
    Ok(Json(json!({ "ok": true })))
}

async fn triggers(State(st): State<AppState>) -> Result<Json<Vec<DailyTrigger>>> {
    Ok(Json(st.schedule.triggers().await?))
}

async fn tv_test(State(st): State<AppState>) -> Json<TestCycleReport> {
    Json(st.schedule.test_cycle().await)
}

async fn tv_status(State(st): State<AppState>) -> Result<Json<Value>> {
    let status: PowerStatus = st.schedule.tv_status().await?;
    Ok(Json(json!({ "power": status })))
}

// --- Bus -----------------------------------------------------------------

async fn devices(State(st): State<AppState>) -> Result<Json<ScanResponse>> {
    Ok(Json(st.bus.scan_devices().await?))
}

async fn rescan(State(st): State<AppState>) -> Result<Json<ScanResponse>> {
    Ok(Json(st.bus.rescan().await?))
}

async fn current_input(State(st): State<AppState>) -> Json<Value> {
    Json(json!({ "current_input": st.bus.get_current_input().await }))
}

async fn switch_input(State(st): State<AppState>, Path(n): Path<String>) -> Result<Json<Value>> {
    let input: u8 = n
        .trim()
        .parse()
        .map_err(|_| ControlError::InvalidInput(format!("input {n:?} is not a number")))?;
    st.bus.select_input(input).await?;
    Ok(Json(json!({ "ok": true, "current_input": input })))
}

async fn get_port_map(State(st): State<AppState>) -> Result<Json<HdmiPortMap>> {
    Ok(Json(st.bus.get_port_map().await?))
}

async fn set_port_map(
    State(st): State<AppState>,
    payload: std::result::Result<Json<HdmiPortMap>, JsonRejection>,
) -> Result<Json<Value>> {
    let outcome = st.bus.set_port_map(json_body(payload)?).await?;
    Ok(Json(json!({ "ok": true, "self_port": outcome.self_port, "switched": outcome.switched })))
}

async fn reset_port_map(State(st): State<AppState>) -> Result<Json<Value>> {
    let deleted = st.bus.reset_port_map().await?;
    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

async fn system_info(State(st): State<AppState>) -> Json<SystemInfo> {
    Json(st.system.snapshot().await)
}
