//! E2E tests for persistent configuration
//!
//! A config file written to disk should shape the console it produces:
//! store capacity, initial noise suppression, and playback thresholds.

use callscope::{Action, AppConfig, AudioEngine, AudioError, Console, Event, Severity, SilentSink};
use std::sync::Arc;

fn saved(config: &AppConfig) -> (tempfile::TempDir, AppConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("callscope").join("config.json");
    config.save(&path).unwrap();
    let loaded = AppConfig::load_or_default(&path);
    (dir, loaded)
}

#[test]
fn test_capacity_from_file() {
    let (_dir, config) = saved(&AppConfig {
        max_events: 3,
        ..AppConfig::default()
    });

    let mut console = Console::with_controls(&config.core_config(), config.initial_controls());
    for _ in 0..10 {
        console.dispatch(Action::Ingest(Event::new(Severity::Info, "sbc", "SIP_MSG", "m")));
    }
    assert_eq!(console.store().len(), 3);
    assert_eq!(console.store().capacity(), 3);
    assert_eq!(console.store().evicted(), 7);
}

#[test]
fn test_noise_default_from_file() {
    for hide_noise in [true, false] {
        let (_dir, config) = saved(&AppConfig {
            hide_noise,
            ..AppConfig::default()
        });
        let mut console = Console::with_controls(&config.core_config(), config.initial_controls());
        console.dispatch(Action::Ingest(Event::new(Severity::Debug, "sniffer", "RTP_PACKET", "rtp")));
        console.dispatch(Action::Ingest(Event::new(Severity::Info, "sbc", "SIP_INVITE", "invite")));

        let expected = if hide_noise { 1 } else { 2 };
        assert_eq!(console.filtered().len(), expected);
    }
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"uplink_url":"ws://10.0.0.5:11070/ws","port":9100}"#).unwrap();

    let config = AppConfig::load_or_default(&path);
    assert_eq!(config.uplink_url.as_deref(), Some("ws://10.0.0.5:11070/ws"));
    assert_eq!(config.server_config().port, 9100);
    assert_eq!(config.core_config().max_events, callscope::DEFAULT_MAX_EVENTS);
    assert!(config.initial_controls().hide_noise);
}

#[tokio::test]
async fn test_playback_threshold_from_file() {
    let (_dir, config) = saved(&AppConfig {
        min_audio_packets: 2,
        ..AppConfig::default()
    });
    let engine = AudioEngine::new(Arc::new(SilentSink::new()), &config.core_config());

    let mut snapshot = vec![Arc::new(
        Event::new(Severity::Debug, "sniffer", "RTP_PACKET", "rtp")
            .with_trace_id("A")
            .with_audio(1, 0, "//8="),
    )];
    assert_eq!(
        engine.play_session("A", &snapshot).await,
        Err(AudioError::NoAudioData)
    );

    snapshot.push(Arc::new(
        Event::new(Severity::Debug, "sniffer", "RTP_PACKET", "rtp")
            .with_trace_id("A")
            .with_audio(2, 0, "//8="),
    ));
    let summary = engine.play_session("A", &snapshot).await.unwrap();
    assert_eq!(summary.packets, 2);
    assert_eq!(summary.samples, 4);
}
