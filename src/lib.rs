//! Callscope - live VoIP telemetry console
//!
//! This library re-exports the event store, correlation, filtering, export
//! and audio reconstruction functionality from `callscope-core`, and owns
//! the persistent application configuration.
//!
//! The HTTP/WebSocket surface lives in `callscope-server`.

pub mod config;

pub use callscope_core::{audio, codec, console, event, export, store};

pub use callscope_core::{
    decode_message, recompute, Action, AudioEngine, AudioError, Console, CoreConfig, Event,
    EventStore, PcmBuffer, PlaybackState, SessionRecord, Severity, SilentSink, ViewControls,
};
pub use callscope_core::{DEFAULT_MAX_EVENTS, PLAYBACK_SAMPLE_RATE, VERSION};
pub use config::{AppConfig, ConfigError};
