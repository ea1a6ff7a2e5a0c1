//! Callscope Web Server - Axum REST + WebSocket surface
//!
//! Owns the single-writer store actor, the refresh loop that pushes view
//! updates to presentation clients, and the clients that talk to the
//! upstream telemetry service.

pub mod api;
pub mod capture;
pub mod uplink;
pub mod ws;

use callscope_core::console::ConsoleStatus;
use callscope_core::store::timeline::TimelineEntry;
use callscope_core::{
    Action, AudioEngine, Console, CoreConfig, Event, PlaybackState, SessionRecord, ViewControls,
};
use capture::CaptureClient;
use axum::http::{header, HeaderValue};
use axum::Router;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Commands sent to the store thread
pub enum StoreCommand {
    Dispatch {
        action: Action,
        reply: Option<oneshot::Sender<bool>>,
    },
    SetControls {
        controls: ViewControls,
        reply: oneshot::Sender<ViewControls>,
    },
    GetView {
        limit: usize,
        reply: oneshot::Sender<ViewSnapshot>,
    },
    GetSnapshot {
        reply: oneshot::Sender<Vec<Arc<Event>>>,
    },
    GetSessions {
        reply: oneshot::Sender<Vec<SessionRecord>>,
    },
    GetTimeline {
        key: String,
        reply: oneshot::Sender<Vec<TimelineEntry>>,
    },
    GetExportSet {
        reply: oneshot::Sender<ExportSet>,
    },
    GetStatus {
        reply: oneshot::Sender<ConsoleStatus>,
    },
    GetSelected {
        reply: oneshot::Sender<Option<Arc<Event>>>,
    },
}

/// Filtered view tail plus the status it was taken with
#[derive(Clone, Debug, Serialize)]
pub struct ViewSnapshot {
    pub status: ConsoleStatus,
    pub events: Vec<Arc<Event>>,
}

/// Events an export covers and the session they were scoped to
#[derive(Clone, Debug)]
pub struct ExportSet {
    pub session: Option<String>,
    pub events: Vec<Arc<Event>>,
}

/// Handle to communicate with the store thread
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    dirty: Arc<AtomicBool>,
}

impl StoreHandle {
    /// Spawn the console on a dedicated thread and return a handle
    pub fn spawn(config: CoreConfig, controls: ViewControls) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(1024);
        let dirty = Arc::new(AtomicBool::new(false));
        let thread_dirty = Arc::clone(&dirty);

        std::thread::spawn(move || {
            let mut console = Console::with_controls(&config, controls);
            tracing::debug!(capacity = config.max_events, "Store thread started");

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Dispatch { action, reply } => {
                        let render = console.dispatch(action);
                        if render {
                            thread_dirty.store(true, Ordering::Release);
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(render);
                        }
                    }
                    StoreCommand::SetControls { controls, reply } => {
                        console.set_controls(controls);
                        thread_dirty.store(true, Ordering::Release);
                        let _ = reply.send(console.controls().clone());
                    }
                    StoreCommand::GetView { limit, reply } => {
                        let _ = reply.send(ViewSnapshot {
                            status: console.status(),
                            events: console.view_tail(limit),
                        });
                    }
                    StoreCommand::GetSnapshot { reply } => {
                        let _ = reply.send(console.store().snapshot());
                    }
                    StoreCommand::GetSessions { reply } => {
                        let _ = reply.send(console.sessions());
                    }
                    StoreCommand::GetTimeline { key, reply } => {
                        let _ = reply.send(console.timeline(&key));
                    }
                    StoreCommand::GetExportSet { reply } => {
                        let _ = reply.send(ExportSet {
                            session: console.controls().session_lock.clone(),
                            events: console.export_set(),
                        });
                    }
                    StoreCommand::GetStatus { reply } => {
                        let _ = reply.send(console.status());
                    }
                    StoreCommand::GetSelected { reply } => {
                        let _ = reply.send(console.selected_event().cloned());
                    }
                }
            }
            tracing::debug!("Store thread stopped");
        });

        Self { tx, dirty }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| anyhow::anyhow!("Store thread died"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Store thread died"))
    }

    /// Apply an action and wait for it. Returns whether the view changed.
    pub async fn dispatch(&self, action: Action) -> anyhow::Result<bool> {
        self.request(|reply| StoreCommand::Dispatch {
            action,
            reply: Some(reply),
        })
        .await
    }

    /// Queue an inbound event without waiting
    pub async fn ingest(&self, event: Event) -> anyhow::Result<()> {
        self.tx
            .send(StoreCommand::Dispatch {
                action: Action::Ingest(event),
                reply: None,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Store thread died"))
    }

    /// Replace the view controls, returning them as stored
    pub async fn set_controls(&self, controls: ViewControls) -> anyhow::Result<ViewControls> {
        self.request(|reply| StoreCommand::SetControls { controls, reply })
            .await
    }

    /// Newest `limit` entries of the filtered view
    pub async fn view(&self, limit: usize) -> anyhow::Result<ViewSnapshot> {
        self.request(|reply| StoreCommand::GetView { limit, reply })
            .await
    }

    /// Every stored event, shared with the store
    pub async fn snapshot(&self) -> anyhow::Result<Vec<Arc<Event>>> {
        self.request(|reply| StoreCommand::GetSnapshot { reply }).await
    }

    pub async fn sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        self.request(|reply| StoreCommand::GetSessions { reply }).await
    }

    pub async fn timeline(&self, key: String) -> anyhow::Result<Vec<TimelineEntry>> {
        self.request(|reply| StoreCommand::GetTimeline { key, reply })
            .await
    }

    pub async fn export_set(&self) -> anyhow::Result<ExportSet> {
        self.request(|reply| StoreCommand::GetExportSet { reply }).await
    }

    pub async fn status(&self) -> anyhow::Result<ConsoleStatus> {
        self.request(|reply| StoreCommand::GetStatus { reply }).await
    }

    pub async fn selected(&self) -> anyhow::Result<Option<Arc<Event>>> {
        self.request(|reply| StoreCommand::GetSelected { reply }).await
    }

    /// Clear and return the "view changed since last refresh" flag
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address
    pub bind_addr: String,
    /// Presentation refresh period
    pub refresh_interval: Duration,
    /// Most events carried by one view update
    pub view_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8930,
            bind_addr: "0.0.0.0".to_string(),
            refresh_interval: Duration::from_millis(100),
            view_limit: 500,
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the store thread
    pub store: StoreHandle,
    /// Session audio playback
    pub audio: Arc<AudioEngine>,
    /// WebSocket broadcast channel
    pub ws_tx: broadcast::Sender<String>,
    /// Server configuration
    pub config: ServerConfig,
    /// Upstream capture control, when a control URL is configured
    pub capture: Option<CaptureClient>,
    /// Uplink connectivity as reported by the uplink task
    pub uplink_connected: watch::Receiver<bool>,
    /// Name printed in exports
    pub node_name: String,
}

impl AppState {
    /// Create a new AppState around a running store and audio engine
    pub fn new(
        store: StoreHandle,
        audio: Arc<AudioEngine>,
        config: ServerConfig,
        capture: Option<CaptureClient>,
        uplink_connected: watch::Receiver<bool>,
    ) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self {
            store,
            audio,
            ws_tx,
            config,
            capture,
            uplink_connected,
            node_name: local_node_name(),
        }
    }

    /// Current uplink connectivity
    pub fn is_uplink_connected(&self) -> bool {
        *self.uplink_connected.borrow()
    }

    /// Playback state of the audio engine
    pub fn playback_state(&self) -> PlaybackState {
        self.audio.state()
    }
}

fn local_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "local".to_string())
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, patch, post};

    Router::new()
        .route("/api/v1/status", get(api::get_status))
        .route("/api/v1/view", get(api::get_view))
        .route("/api/v1/view/controls", patch(api::update_controls))
        .route("/api/v1/pause", post(api::set_pause))
        .route("/api/v1/wipe", post(api::wipe))
        .route("/api/v1/select", post(api::select))
        .route("/api/v1/sessions", get(api::list_sessions))
        .route("/api/v1/sessions/{key}/timeline", get(api::session_timeline))
        .route("/api/v1/sessions/{key}/play", post(api::play_session))
        .route("/api/v1/playback/stop", post(api::stop_playback))
        .route("/api/v1/export/raw", get(api::export_raw))
        .route("/api/v1/export/report", get(api::export_report))
        .route("/api/v1/ingest", post(api::ingest))
        .route("/api/v1/capture", get(api::capture_status))
        .route("/api/v1/capture/enable", post(api::enable_capture))
        .route("/api/v1/capture/disable", post(api::disable_capture))
        .route("/api/v1/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Start the web server and run until `shutdown` resolves
pub async fn start_server(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Callscope web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Push coalesced view updates and drive the one-second tick.
///
/// At most one update goes out per refresh period, and only when the view
/// changed since the last one.
pub async fn refresh_loop(state: AppState) {
    let mut refresh = tokio::time::interval(state.config.refresh_interval);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                if !state.store.take_dirty() {
                    continue;
                }
                if let Err(e) = ws::broadcast_view(&state).await {
                    tracing::error!("Refresh failed: {}", e);
                    break;
                }
            }
            _ = tick.tick() => {
                if state.store.dispatch(Action::Tick).await.is_err() {
                    tracing::error!("Store thread died, stopping refresh loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callscope_core::{Severity, SilentSink};

    pub(crate) fn test_state() -> AppState {
        let config = CoreConfig::with_max_events(100);
        let store = StoreHandle::spawn(config.clone(), ViewControls::default());
        let audio = Arc::new(AudioEngine::new(Arc::new(SilentSink::new()), &config));
        let (_tx, rx) = watch::channel(false);
        AppState::new(store, audio, ServerConfig::default(), None, rx)
    }

    fn ev(kind: &str, key: &str) -> Event {
        Event::new(Severity::Info, "sbc", kind, "m").with_trace_id(key)
    }

    #[tokio::test]
    async fn test_store_handle_round_trip() {
        let store = StoreHandle::spawn(CoreConfig::with_max_events(2), ViewControls::default());
        for kind in ["A", "B", "C"] {
            store.ingest(ev(kind, "call-1")).await.unwrap();
        }
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].seq(), 1);

        let status = store.status().await.unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.sessions, 1);
    }

    #[tokio::test]
    async fn test_dirty_flag() {
        let store = StoreHandle::spawn(CoreConfig::default(), ViewControls::default());
        assert!(!store.take_dirty());
        store.dispatch(Action::Ingest(ev("A", "k"))).await.unwrap();
        assert!(store.take_dirty());
        assert!(!store.take_dirty());

        store.dispatch(Action::SetPaused(true)).await.unwrap();
        store.take_dirty();
        assert!(!store.dispatch(Action::Ingest(ev("B", "k"))).await.unwrap());
        assert!(!store.take_dirty());
    }

    #[tokio::test]
    async fn test_set_controls_folds_search() {
        let store = StoreHandle::spawn(CoreConfig::default(), ViewControls::default());
        let stored = store
            .set_controls(ViewControls {
                search_text: "INVITE".to_string(),
                ..ViewControls::default()
            })
            .await
            .unwrap();
        assert_eq!(stored.search_text, "invite");
    }

    #[tokio::test]
    async fn test_export_set_reports_lock() {
        let store = StoreHandle::spawn(CoreConfig::default(), ViewControls::default());
        store.dispatch(Action::Ingest(ev("A", "k1"))).await.unwrap();
        store.dispatch(Action::Ingest(ev("B", "k2"))).await.unwrap();
        store.dispatch(Action::LockSession("k1".to_string())).await.unwrap();
        let set = store.export_set().await.unwrap();
        assert_eq!(set.session.as_deref(), Some("k1"));
        assert_eq!(set.events.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_coalesces_burst() {
        let config = CoreConfig::with_max_events(1000);
        let store = StoreHandle::spawn(config.clone(), ViewControls::default());
        let audio = Arc::new(AudioEngine::new(Arc::new(SilentSink::new()), &config));
        let (_tx, uplink_rx) = watch::channel(false);
        let server = ServerConfig {
            refresh_interval: Duration::from_millis(200),
            ..ServerConfig::default()
        };
        let state = AppState::new(store, audio, server, None, uplink_rx);
        let mut rx = state.ws_tx.subscribe();

        let refresh = tokio::spawn(refresh_loop(state.clone()));
        // Both timers fire at once on a clean store
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

        for i in 0..200 {
            state
                .store
                .dispatch(Action::Ingest(ev("SIP_INFO", &format!("call-{}", i % 7))))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        let update: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(update["type"], "view");
        assert_eq!(update["status"]["total"], 200);
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

        // Next period with nothing new stays quiet
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
        refresh.abort();
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8930);
        assert_eq!(config.refresh_interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_app_state_defaults() {
        let state = test_state();
        assert!(!state.is_uplink_connected());
        assert_eq!(state.playback_state(), PlaybackState::Idle);
        assert!(!state.node_name.is_empty());
    }
}
