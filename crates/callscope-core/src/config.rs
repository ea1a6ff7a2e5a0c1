//! Core configuration passed explicitly to the store and audio engine

use serde::{Deserialize, Serialize};

fn default_max_events() -> usize {
    crate::DEFAULT_MAX_EVENTS
}

fn default_min_audio_packets() -> usize {
    1
}

fn default_sample_rate() -> u32 {
    crate::PLAYBACK_SAMPLE_RATE
}

/// Limits and constants for the core components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Maximum number of events held by the store
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Fewest audio-bearing packets a session needs before it can be played
    #[serde(default = "default_min_audio_packets")]
    pub min_audio_packets: usize,
    /// Output sample rate of reconstructed audio
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            min_audio_packets: default_min_audio_packets(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl CoreConfig {
    /// Config with a custom store capacity and defaults elsewhere
    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            max_events,
            ..Self::default()
        }
    }
}
