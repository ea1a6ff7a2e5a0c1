//! REST API endpoints for callscope
//!
//! All endpoints are under /api/v1/ and return JSON, except the exports
//! which return downloadable files.

use crate::AppState;
use callscope_core::console::ConsoleStatus;
use callscope_core::export::{export_file_name, ExportKind};
use callscope_core::store::timeline::TimelineEntry;
use callscope_core::{
    decode_message, Action, AudioError, Event, PlaybackState, PlaybackSummary, ReportMeta,
    SessionRecord, Severity, ViewControls,
};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type ApiError = (StatusCode, String);

fn internal(e: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Application status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub build_date: String,
    pub node_name: String,
    #[serde(flatten)]
    pub console: ConsoleStatus,
    pub playback: PlaybackState,
    pub audio_output: String,
    pub uplink_connected: bool,
    pub capture_control: bool,
}

/// View query
#[derive(Deserialize)]
pub struct ViewQuery {
    pub limit: Option<usize>,
}

/// Partial view-controls update.
///
/// An empty `session_lock` unlocks; an empty or "ALL" `severity_floor`
/// shows every severity.
#[derive(Deserialize, Default)]
pub struct ControlsUpdate {
    pub session_lock: Option<String>,
    pub hide_noise: Option<bool>,
    pub severity_floor: Option<String>,
    pub search_text: Option<String>,
}

/// Pause request; omitting `paused` toggles
#[derive(Deserialize, Default)]
pub struct PauseRequest {
    pub paused: Option<bool>,
}

/// Selection request; `null` clears
#[derive(Deserialize)]
pub struct SelectRequest {
    pub sequence: Option<u64>,
}

/// Selection response
#[derive(Serialize)]
pub struct SelectResponse {
    pub selection: Option<u64>,
    pub event: Option<Arc<Event>>,
}

/// Playback stop response
#[derive(Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

/// Ingest response
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
}

/// Capture control response
#[derive(Serialize)]
pub struct CaptureResponse {
    pub active: bool,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let console = state.store.status().await.map_err(internal)?;
    Ok(Json(StatusResponse {
        version: callscope_core::VERSION.to_string(),
        build_date: callscope_core::BUILD_DATE.to_string(),
        node_name: state.node_name.clone(),
        console,
        playback: state.playback_state(),
        audio_output: state.audio.sink_name().to_string(),
        uplink_connected: state.is_uplink_connected(),
        capture_control: state.capture.is_some(),
    }))
}

/// GET /api/v1/view
pub async fn get_view(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<crate::ViewSnapshot>, ApiError> {
    let limit = query.limit.unwrap_or(state.config.view_limit);
    let view = state.store.view(limit).await.map_err(internal)?;
    Ok(Json(view))
}

/// PATCH /api/v1/view/controls
pub async fn update_controls(
    State(state): State<AppState>,
    Json(update): Json<ControlsUpdate>,
) -> Result<Json<ViewControls>, ApiError> {
    let mut actions = Vec::new();
    if let Some(lock) = update.session_lock {
        actions.push(if lock.is_empty() {
            Action::Unlock
        } else {
            Action::LockSession(lock)
        });
    }
    if let Some(hide) = update.hide_noise {
        actions.push(Action::SetHideNoise(hide));
    }
    if let Some(floor) = update.severity_floor {
        let floor = match floor.trim() {
            "" | "ALL" | "all" => None,
            level => Some(
                level
                    .parse::<Severity>()
                    .map_err(|e| (StatusCode::BAD_REQUEST, e))?,
            ),
        };
        actions.push(Action::SetSeverityFloor(floor));
    }
    if let Some(text) = update.search_text {
        actions.push(Action::SetSearch(text));
    }

    for action in actions {
        state.store.dispatch(action).await.map_err(internal)?;
    }
    let status = state.store.status().await.map_err(internal)?;
    Ok(Json(status.controls))
}

/// POST /api/v1/pause
pub async fn set_pause(
    State(state): State<AppState>,
    body: Option<Json<PauseRequest>>,
) -> Result<Json<ConsoleStatus>, ApiError> {
    let action = match body.and_then(|Json(req)| req.paused) {
        Some(paused) => Action::SetPaused(paused),
        None => Action::TogglePause,
    };
    state.store.dispatch(action).await.map_err(internal)?;
    let status = state.store.status().await.map_err(internal)?;
    tracing::info!(paused = status.paused, "Ingestion pause changed");
    Ok(Json(status))
}

/// POST /api/v1/wipe
pub async fn wipe(State(state): State<AppState>) -> Result<Json<ConsoleStatus>, ApiError> {
    state.store.dispatch(Action::Wipe).await.map_err(internal)?;
    tracing::info!("Store wiped");
    let status = state.store.status().await.map_err(internal)?;
    Ok(Json(status))
}

/// POST /api/v1/select
pub async fn select(
    State(state): State<AppState>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SelectResponse>, ApiError> {
    state
        .store
        .dispatch(Action::Select(req.sequence))
        .await
        .map_err(internal)?;
    let event = state.store.selected().await.map_err(internal)?;
    Ok(Json(SelectResponse {
        selection: req.sequence,
        event,
    }))
}

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let sessions = state.store.sessions().await.map_err(internal)?;
    Ok(Json(sessions))
}

/// GET /api/v1/sessions/{key}/timeline
pub async fn session_timeline(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<TimelineEntry>>, ApiError> {
    let timeline = state.store.timeline(key.clone()).await.map_err(internal)?;
    if timeline.is_empty() {
        return Err((StatusCode::NOT_FOUND, format!("No events for session {}", key)));
    }
    Ok(Json(timeline))
}

fn audio_status(e: &AudioError) -> StatusCode {
    match e {
        AudioError::AlreadyPlaying | AudioError::Cancelled => StatusCode::CONFLICT,
        AudioError::NoAudioData => StatusCode::NOT_FOUND,
        AudioError::UnsupportedCodec(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AudioError::Output(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/v1/sessions/{key}/play
///
/// Resolves when playback ends.
pub async fn play_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PlaybackSummary>, ApiError> {
    // Cheap rejection before copying the store
    if state.audio.is_playing() {
        return Err((StatusCode::CONFLICT, AudioError::AlreadyPlaying.to_string()));
    }
    let snapshot = state.store.snapshot().await.map_err(internal)?;
    match state.audio.play_session(&key, &snapshot).await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            tracing::debug!(session = %key, error = %e, "Playback request failed");
            Err((audio_status(&e), e.to_string()))
        }
    }
}

/// POST /api/v1/playback/stop
pub async fn stop_playback(State(state): State<AppState>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: state.audio.cancel(),
    })
}

fn attachment(content_type: &'static str, file_name: String, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_scope(state: &AppState) -> Result<(Vec<Arc<Event>>, ReportMeta), ApiError> {
    let set = state.store.export_set().await.map_err(internal)?;
    if set.events.is_empty() {
        return Err((StatusCode::NOT_FOUND, "No data to export".to_string()));
    }
    Ok((set.events, ReportMeta::new(state.node_name.clone(), set.session)))
}

/// GET /api/v1/export/raw
pub async fn export_raw(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (events, meta) = export_scope(&state).await?;
    let body = callscope_core::export_raw(&events)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(attachment(
        "application/json",
        export_file_name(&meta, ExportKind::Raw),
        body,
    ))
}

/// GET /api/v1/export/report
pub async fn export_report(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (events, meta) = export_scope(&state).await?;
    let body = callscope_core::export_report(&events, &meta);
    Ok(attachment(
        "text/markdown; charset=utf-8",
        export_file_name(&meta, ExportKind::Report),
        body,
    ))
}

/// POST /api/v1/ingest
///
/// Accepts one wire record or an array of them. Malformed records are
/// counted and dropped.
pub async fn ingest(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<IngestResponse>, ApiError> {
    let records: Vec<String> = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(serde_json::Value::Array(items)) => items.iter().map(|v| v.to_string()).collect(),
        Ok(_) => vec![body],
        Err(e) => return Err((StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e))),
    };

    let mut response = IngestResponse {
        accepted: 0,
        rejected: 0,
    };
    for record in records {
        match decode_message(&record) {
            Ok(event) => {
                state.store.ingest(event).await.map_err(internal)?;
                response.accepted += 1;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed record");
                response.rejected += 1;
            }
        }
    }
    Ok(Json(response))
}

fn capture_client(state: &AppState) -> Result<&crate::capture::CaptureClient, ApiError> {
    state.capture.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Capture control not configured".to_string(),
    ))
}

fn upstream(e: crate::capture::CaptureError) -> ApiError {
    (StatusCode::BAD_GATEWAY, e.to_string())
}

/// GET /api/v1/capture
pub async fn capture_status(State(state): State<AppState>) -> Result<Json<CaptureResponse>, ApiError> {
    let status = capture_client(&state)?.status().await.map_err(upstream)?;
    Ok(Json(CaptureResponse {
        active: status.active,
    }))
}

/// POST /api/v1/capture/enable
pub async fn enable_capture(State(state): State<AppState>) -> Result<Json<CaptureResponse>, ApiError> {
    let active = capture_client(&state)?.enable().await.map_err(upstream)?;
    Ok(Json(CaptureResponse { active }))
}

/// POST /api/v1/capture/disable
pub async fn disable_capture(State(state): State<AppState>) -> Result<Json<CaptureResponse>, ApiError> {
    let active = capture_client(&state)?.disable().await.map_err(upstream)?;
    Ok(Json(CaptureResponse { active }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tower::ServiceExt;

    fn record(kind: &str, call_id: &str) -> serde_json::Value {
        serde_json::json!({
            "ts": "2024-05-01T10:00:00.000Z",
            "severity": "INFO",
            "resource": {"service.name": "sbc"},
            "event": kind,
            "message": format!("{kind} for {call_id}"),
            "attributes": {"sip.call_id": call_id}
        })
    }

    fn packet(call_id: &str, seq: u64, bytes: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "ts": "2024-05-01T10:00:00.000Z",
            "severity": "DEBUG",
            "resource": {"service.name": "sniffer"},
            "trace_id": call_id,
            "event": "RTP_PACKET",
            "message": "rtp",
            "attributes": {
                "rtp.sequence": seq,
                "rtp.payload_type": 0,
                "rtp.audio_b64": STANDARD.encode(bytes)
            }
        })
    }

    async fn send(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, String) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = build_router(test_state());
        let (status, body) = send(&app, "GET", "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value["version"], callscope_core::VERSION);
        assert_eq!(value["capacity"], 100);
        assert_eq!(value["playback"], "Idle");
        assert_eq!(value["audio_output"], "silent");
        assert_eq!(value["capture_control"], false);
    }

    #[tokio::test]
    async fn test_ingest_and_view() {
        let app = build_router(test_state());
        let batch = serde_json::json!([
            record("SIP_INVITE", "A"),
            {"garbage": true},
            record("SIP_INVITE", "B")
        ]);
        let (status, body) = send(&app, "POST", "/api/v1/ingest", Some(batch)).await;
        assert_eq!(status, StatusCode::OK);
        let reply: IngestResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(reply, IngestResponse { accepted: 2, rejected: 1 });

        let (_, body) = send(&app, "GET", "/api/v1/view?limit=1", None).await;
        let view = json(&body);
        assert_eq!(view["status"]["total"], 2);
        assert_eq!(view["events"].as_array().unwrap().len(), 1);
        assert_eq!(view["events"][0]["trace_id"], "B");
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_json() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/ingest")
            .body(Body::from("{nope"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_controls_patch() {
        let app = build_router(test_state());
        let ingest = serde_json::json!([record("SIP_INVITE", "A"), record("SIP_BYE", "B")]);
        send(&app, "POST", "/api/v1/ingest", Some(ingest)).await;

        let patch = serde_json::json!({"session_lock": "A", "severity_floor": "WARN", "search_text": "INVITE"});
        let (status, body) = send(&app, "PATCH", "/api/v1/view/controls", Some(patch)).await;
        assert_eq!(status, StatusCode::OK);
        let controls = json(&body);
        assert_eq!(controls["session_lock"], "A");
        assert_eq!(controls["severity_floor"], "WARN");
        assert_eq!(controls["search_text"], "invite");

        let (_, body) = send(&app, "GET", "/api/v1/view", None).await;
        assert!(json(&body)["events"].as_array().unwrap().is_empty());

        let clear = serde_json::json!({"session_lock": "", "severity_floor": "ALL", "search_text": ""});
        send(&app, "PATCH", "/api/v1/view/controls", Some(clear)).await;
        let (_, body) = send(&app, "GET", "/api/v1/view", None).await;
        assert_eq!(json(&body)["events"].as_array().unwrap().len(), 2);

        let bad = serde_json::json!({"severity_floor": "LOUD"});
        let (status, _) = send(&app, "PATCH", "/api/v1/view/controls", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pause_toggle_and_explicit() {
        let app = build_router(test_state());
        let (_, body) = send(&app, "POST", "/api/v1/pause", None).await;
        assert_eq!(json(&body)["paused"], true);
        let (_, body) = send(&app, "POST", "/api/v1/pause", Some(serde_json::json!({"paused": true}))).await;
        assert_eq!(json(&body)["paused"], true);

        let (_, body) = send(&app, "POST", "/api/v1/ingest", Some(record("SIP_INVITE", "A"))).await;
        assert_eq!(json(&body)["accepted"], 1);
        let (_, body) = send(&app, "GET", "/api/v1/status", None).await;
        assert_eq!(json(&body)["total"], 0);
    }

    #[tokio::test]
    async fn test_select_and_wipe() {
        let app = build_router(test_state());
        send(&app, "POST", "/api/v1/ingest", Some(record("SIP_INVITE", "A"))).await;

        let (_, body) = send(&app, "POST", "/api/v1/select", Some(serde_json::json!({"sequence": 0}))).await;
        let selected = json(&body);
        assert_eq!(selected["selection"], 0);
        assert_eq!(selected["event"]["event"], "SIP_INVITE");

        let (_, body) = send(&app, "POST", "/api/v1/wipe", None).await;
        let status = json(&body);
        assert_eq!(status["total"], 0);
        assert!(status["selection"].is_null());
    }

    #[tokio::test]
    async fn test_sessions_and_timeline() {
        let app = build_router(test_state());
        let batch = serde_json::json!([record("SIP_INVITE", "A"), record("SIP_200_OK", "A"), record("SIP_INVITE", "B")]);
        send(&app, "POST", "/api/v1/ingest", Some(batch)).await;

        let (_, body) = send(&app, "GET", "/api/v1/sessions", None).await;
        let sessions = json(&body);
        assert_eq!(sessions.as_array().unwrap().len(), 2);

        let (status, body) = send(&app, "GET", "/api/v1/sessions/A/timeline", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body).as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/api/v1/sessions/Z/timeline", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_play_session() {
        let app = build_router(test_state());
        let batch = serde_json::json!([packet("A", 2, &[0xFF; 40]), packet("A", 1, &[0xFF; 40])]);
        send(&app, "POST", "/api/v1/ingest", Some(batch)).await;

        let (status, body) = send(&app, "POST", "/api/v1/sessions/A/play", None).await;
        assert_eq!(status, StatusCode::OK);
        let summary = json(&body);
        assert_eq!(summary["packets"], 2);
        assert_eq!(summary["samples"], 80);

        let (status, _) = send(&app, "POST", "/api/v1/sessions/B/play", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_concurrent_play_and_stop() {
        let state = test_state();
        let app = build_router(state.clone());
        // One second of audio
        let batch = serde_json::json!([packet("A", 1, &[0xFF; 8000])]);
        send(&app, "POST", "/api/v1/ingest", Some(batch)).await;

        let first = {
            let app = app.clone();
            tokio::spawn(async move { send(&app, "POST", "/api/v1/sessions/A/play", None).await })
        };
        while state.audio.state() != PlaybackState::Playing {
            tokio::task::yield_now().await;
        }

        let (status, _) = send(&app, "POST", "/api/v1/sessions/A/play", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, "POST", "/api/v1/playback/stop", None).await;
        assert_eq!(json(&body)["stopped"], true);

        let (status, body) = first.await.unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("cancelled"));
        assert_eq!(state.audio.state(), PlaybackState::Idle);

        let (_, body) = send(&app, "POST", "/api/v1/playback/stop", None).await;
        assert_eq!(json(&body)["stopped"], false);
    }

    #[tokio::test]
    async fn test_exports() {
        let app = build_router(test_state());
        let (status, _) = send(&app, "GET", "/api/v1/export/raw", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let batch = serde_json::json!([record("SIP_INVITE", "A"), packet("A", 1, &[0xFF; 4])]);
        send(&app, "POST", "/api/v1/ingest", Some(batch)).await;
        send(&app, "PATCH", "/api/v1/view/controls", Some(serde_json::json!({"session_lock": "A"}))).await;

        let request = Request::builder()
            .uri("/api/v1/export/raw")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("callscope_A_"));
        assert!(disposition.ends_with("_evidence.json\""));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);

        let (status, body) = send(&app, "GET", "/api/v1/export/report", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Session: A"));
        assert!(body.contains("SIP_INVITE"));
        assert!(!body.contains("RTP_PACKET"));
    }

    #[tokio::test]
    async fn test_capture_without_control_url() {
        let app = build_router(test_state());
        let (status, _) = send(&app, "GET", "/api/v1/capture", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = send(&app, "POST", "/api/v1/capture/enable", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_audio_status_mapping() {
        assert_eq!(audio_status(&AudioError::AlreadyPlaying), StatusCode::CONFLICT);
        assert_eq!(audio_status(&AudioError::NoAudioData), StatusCode::NOT_FOUND);
        assert_eq!(
            audio_status(&AudioError::UnsupportedCodec(9)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_controls_update_partial() {
        let update: ControlsUpdate = serde_json::from_str(r#"{"hide_noise": false}"#).unwrap();
        assert_eq!(update.hide_noise, Some(false));
        assert!(update.session_lock.is_none());
    }
}
