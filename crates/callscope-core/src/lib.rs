//! Callscope Core - Event store, session correlation, and audio reconstruction
//!
//! This library holds the live working set of a VoIP telemetry stream:
//! a capacity-bounded event store, the session correlation index, the
//! filter pipeline that derives the visible view, and the engine that
//! rebuilds call audio from G.711 payloads carried by media-packet events.

pub mod audio;
pub mod codec;
pub mod config;
pub mod console;
pub mod event;
pub mod export;
pub mod store;

pub use audio::engine::{AudioEngine, AudioError, PcmBuffer, PlaybackState, PlaybackSummary};
pub use audio::sink::{AudioSink, SilentSink};
pub use config::CoreConfig;
pub use console::{Action, Console};
pub use event::{decode_message, Event, Severity};
pub use export::{export_raw, export_report, ReportMeta};
pub use store::correlation::{CorrelationIndex, SessionRecord};
pub use store::events::EventStore;
pub use store::filter::{recompute, ViewControls};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default capacity of the event store
pub const DEFAULT_MAX_EVENTS: usize = 10_000;

/// Sample rate of reconstructed call audio (narrowband G.711)
pub const PLAYBACK_SAMPLE_RATE: u32 = 8000;
