//! Session audio reconstruction engine
//!
//! Rebuilds one call's audio from the media-packet events of a store
//! snapshot:
//! - select the session's events that carry an RTP sequence number and a
//!   decodable payload
//! - order them by RTP sequence, not ingestion order, to undo network
//!   reordering
//! - decode every payload through the G.711 table named by its payload type
//! - concatenate the chunks into one PCM buffer and hand it to the sink
//!
//! Playback is exclusive: `Idle -> Decoding -> Playing -> Idle`, and a
//! request made while another is in flight fails fast.

use super::sink::AudioSink;
use crate::codec::{Companding, PAYLOAD_TYPE_PCMU};
use crate::config::CoreConfig;
use crate::event::{Event, PAYLOAD_TYPE_ATTR};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Errors returned by playback requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Audio is already playing")]
    AlreadyPlaying,

    #[error("No audio data for this session")]
    NoAudioData,

    #[error("Unsupported payload type: {0}")]
    UnsupportedCodec(u32),

    #[error("Audio output failed: {0}")]
    Output(String),

    #[error("Playback cancelled")]
    Cancelled,
}

/// Playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    /// Nothing in flight
    Idle,
    /// Selecting and decoding packets
    Decoding,
    /// Buffer handed to the audio output
    Playing,
}

/// Single-channel PCM at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Wrap decoded samples
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Normalized samples in [-1, 1]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Take ownership of the samples
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration at the buffer's sample rate
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }
}

/// One RTP payload pulled out of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub rtp_sequence: u64,
    pub payload_type: u32,
    pub payload: Vec<u8>,
}

/// What a successful playback covered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackSummary {
    pub session: String,
    pub packets: usize,
    pub samples: usize,
    pub duration_ms: u64,
}

/// Audio packets of `key`, ordered by RTP sequence.
///
/// Events whose payload is missing, empty, or not valid base64 are skipped,
/// as are events whose payload type is not a number. A missing payload type
/// is read as µ-law. Sequence wraparound is not
/// handled: numbers sort as plain integers, ties keep ingestion order.
pub fn select_packets<'a, I>(key: &str, events: I) -> Vec<AudioPacket>
where
    I: IntoIterator<Item = &'a Arc<Event>>,
{
    let mut packets: Vec<AudioPacket> = events
        .into_iter()
        .filter(|e| e.session_key() == Some(key))
        .filter_map(|e| {
            let rtp_sequence = e.attributes.rtp_sequence?;
            let b64 = e.attributes.audio_b64.as_deref()?;
            let payload = match STANDARD.decode(b64) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::debug!(sequence = e.seq(), error = %err, "Skipping undecodable audio payload");
                    return None;
                }
            };
            if payload.is_empty() {
                return None;
            }
            let payload_type = match e.attributes.payload_type {
                Some(pt) => pt,
                // Present but not a payload type number: no law to decode with
                None if e.attributes.other.contains_key(PAYLOAD_TYPE_ATTR) => {
                    tracing::debug!(sequence = e.seq(), "Skipping packet with malformed payload type");
                    return None;
                }
                None => PAYLOAD_TYPE_PCMU,
            };
            Some(AudioPacket {
                rtp_sequence,
                payload_type,
                payload,
            })
        })
        .collect();

    packets.sort_by_key(|p| p.rtp_sequence);
    packets
}

/// Decode ordered packets into one buffer.
///
/// Any unrecognized payload type fails the whole buffer.
pub fn decode_packets(packets: &[AudioPacket], sample_rate: u32) -> Result<PcmBuffer, AudioError> {
    let total: usize = packets.iter().map(|p| p.payload.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for packet in packets {
        let law = Companding::from_payload_type(packet.payload_type)
            .ok_or(AudioError::UnsupportedCodec(packet.payload_type))?;
        law.decode_into(&packet.payload, &mut samples);
    }
    Ok(PcmBuffer::new(samples, sample_rate))
}

/// Select, order and decode one session's audio
pub fn reconstruct_session<'a, I>(
    key: &str,
    events: I,
    min_packets: usize,
    sample_rate: u32,
) -> Result<PcmBuffer, AudioError>
where
    I: IntoIterator<Item = &'a Arc<Event>>,
{
    let packets = select_packets(key, events);
    if packets.is_empty() || packets.len() < min_packets {
        return Err(AudioError::NoAudioData);
    }
    decode_packets(&packets, sample_rate)
}

/// Resets the engine to `Idle` when a playback attempt ends, however it ends
struct ActivePlayback<'a> {
    state: &'a Mutex<PlaybackState>,
}

impl ActivePlayback<'_> {
    fn set(&self, next: PlaybackState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl Drop for ActivePlayback<'_> {
    fn drop(&mut self) {
        self.set(PlaybackState::Idle);
    }
}

/// Exclusive session playback
pub struct AudioEngine {
    sink: Arc<dyn AudioSink>,
    state: Mutex<PlaybackState>,
    cancel_requested: AtomicBool,
    cancel: Notify,
    min_packets: usize,
    sample_rate: u32,
}

impl AudioEngine {
    /// Create an engine playing through `sink`
    pub fn new(sink: Arc<dyn AudioSink>, config: &CoreConfig) -> Self {
        Self {
            sink,
            state: Mutex::new(PlaybackState::Idle),
            cancel_requested: AtomicBool::new(false),
            cancel: Notify::new(),
            min_packets: config.min_audio_packets.max(1),
            sample_rate: config.sample_rate,
        }
    }

    /// Current playback state
    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a playback is in flight
    pub fn is_playing(&self) -> bool {
        self.state() != PlaybackState::Idle
    }

    /// Name of the audio output
    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    fn begin(&self) -> Result<ActivePlayback<'_>, AudioError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != PlaybackState::Idle {
            return Err(AudioError::AlreadyPlaying);
        }
        *state = PlaybackState::Decoding;
        self.cancel_requested.store(false, Ordering::Release);
        Ok(ActivePlayback { state: &self.state })
    }

    /// Reconstruct and play one session from a store snapshot.
    ///
    /// Resolves when playback ends naturally. Fails fast with
    /// `AlreadyPlaying` while another playback is in flight, leaving that
    /// playback untouched.
    pub async fn play_session(
        &self,
        key: &str,
        events: &[Arc<Event>],
    ) -> Result<PlaybackSummary, AudioError> {
        let active = self.begin()?;

        let packets = select_packets(key, events);
        if packets.is_empty() || packets.len() < self.min_packets {
            tracing::warn!(
                session = key,
                packets = packets.len(),
                required = self.min_packets,
                "No playable audio for session"
            );
            return Err(AudioError::NoAudioData);
        }
        let pcm = decode_packets(&packets, self.sample_rate)?;
        let summary = PlaybackSummary {
            session: key.to_string(),
            packets: packets.len(),
            samples: pcm.len(),
            duration_ms: pcm.duration().as_millis() as u64,
        };
        drop(packets);

        let notified = self.cancel.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.cancel_requested.load(Ordering::Acquire) {
            return Err(AudioError::Cancelled);
        }

        let mut handle = self.sink.start(pcm)?;
        active.set(PlaybackState::Playing);
        tracing::info!(
            session = key,
            packets = summary.packets,
            duration_ms = summary.duration_ms,
            sink = self.sink.name(),
            "Playing session audio"
        );

        tokio::select! {
            result = handle.finished() => {
                result?;
                tracing::debug!(session = key, "Playback finished");
                Ok(summary)
            }
            _ = &mut notified => {
                handle.stop();
                tracing::info!(session = key, "Playback cancelled");
                Err(AudioError::Cancelled)
            }
        }
    }

    /// Stop the in-flight playback, if any. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::Release);
        self.cancel.notify_waiters();
        true
    }
}
