//! Audio outputs for reconstructed call audio
//!
//! A sink takes a finished [`PcmBuffer`] and starts playing it, returning a
//! [`PlaybackHandle`] that resolves when playback ends and can stop it early.
//!
//! - [`SilentSink`] keeps real-time pacing without touching a device, for
//!   headless deployments and tests
//! - `CpalSink` (feature `playback`) plays through the system output device

use super::engine::{AudioError, PcmBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How often running outputs check the stop flag
const STOP_POLL: Duration = Duration::from_millis(20);

/// Destination for decoded call audio
pub trait AudioSink: Send + Sync {
    /// Human-readable output name for logs and status
    fn name(&self) -> &str;

    /// Begin playing `pcm`. Must not block for the duration of playback.
    fn start(&self, pcm: PcmBuffer) -> Result<PlaybackHandle, AudioError>;
}

/// Engine side of a running playback
#[derive(Debug)]
pub struct PlaybackHandle {
    done: oneshot::Receiver<Result<(), AudioError>>,
    stop: Arc<AtomicBool>,
}

/// Output side of a running playback
#[derive(Debug)]
pub struct PlaybackCompletion {
    done: oneshot::Sender<Result<(), AudioError>>,
    stop: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Paired completion/handle for a new playback
    pub fn channel() -> (PlaybackCompletion, PlaybackHandle) {
        let (tx, rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        (
            PlaybackCompletion {
                done: tx,
                stop: Arc::clone(&stop),
            },
            PlaybackHandle { done: rx, stop },
        )
    }

    /// Ask the output to stop early
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait until the output reports completion
    pub async fn finished(&mut self) -> Result<(), AudioError> {
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(AudioError::Output("audio output went away".to_string())),
        }
    }
}

/// A handle nobody waits on any more stops its output
impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PlaybackCompletion {
    /// Whether the engine asked for an early stop
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Report the outcome to the engine
    pub fn complete(self, result: Result<(), AudioError>) {
        let _ = self.done.send(result);
    }
}

/// Output that plays nothing but takes as long as the audio would
#[derive(Debug, Default)]
pub struct SilentSink {
    plays: AtomicU64,
    samples: AtomicU64,
}

impl SilentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers started so far
    pub fn plays(&self) -> u64 {
        self.plays.load(Ordering::Relaxed)
    }

    /// Samples started so far
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl AudioSink for SilentSink {
    fn name(&self) -> &str {
        "silent"
    }

    fn start(&self, pcm: PcmBuffer) -> Result<PlaybackHandle, AudioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::Output(e.to_string()))?;
        let (completion, handle) = PlaybackHandle::channel();

        self.plays.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(pcm.len() as u64, Ordering::Relaxed);

        let deadline = tokio::time::Instant::now() + pcm.duration();
        runtime.spawn(async move {
            loop {
                if completion.is_stopped() {
                    completion.complete(Err(AudioError::Cancelled));
                    return;
                }
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    break;
                }
                tokio::time::sleep(STOP_POLL.min(deadline - now)).await;
            }
            completion.complete(Ok(()));
        });

        Ok(handle)
    }
}

#[cfg(feature = "playback")]
pub use device::CpalSink;

#[cfg(feature = "playback")]
mod device {
    use super::{AudioSink, PlaybackCompletion, PlaybackHandle, STOP_POLL};
    use crate::audio::engine::{AudioError, PcmBuffer};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleRate, StreamConfig};
    use ringbuf::traits::{Consumer, Producer, Split};
    use ringbuf::HeapRb;
    use std::time::Instant;

    /// Plays through a cpal output device
    #[derive(Debug, Clone, Default)]
    pub struct CpalSink {
        device_name: Option<String>,
    }

    impl CpalSink {
        /// Play through the default output device
        pub fn new() -> Self {
            Self::default()
        }

        /// Play through the output device with this name
        pub fn with_device(name: impl Into<String>) -> Self {
            Self {
                device_name: Some(name.into()),
            }
        }

        fn open_device(&self) -> Result<Device, AudioError> {
            let host = cpal::default_host();
            match &self.device_name {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| AudioError::Output(e.to_string()))?
                    .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                    .ok_or_else(|| AudioError::Output(format!("Output device not found: {name}"))),
                None => host
                    .default_output_device()
                    .ok_or_else(|| AudioError::Output("No output device".to_string())),
            }
        }
    }

    impl AudioSink for CpalSink {
        fn name(&self) -> &str {
            self.device_name.as_deref().unwrap_or("default output")
        }

        fn start(&self, pcm: PcmBuffer) -> Result<PlaybackHandle, AudioError> {
            let device = self.open_device()?;
            let (completion, handle) = PlaybackHandle::channel();

            // cpal streams are not Send; the stream lives and dies on this thread
            std::thread::Builder::new()
                .name("pcm-playback".to_string())
                .spawn(move || {
                    let result = play_blocking(&device, pcm, &completion);
                    if let Err(e) = &result {
                        tracing::error!("Playback failed: {}", e);
                    }
                    completion.complete(result);
                })
                .map_err(|e| AudioError::Output(e.to_string()))?;

            Ok(handle)
        }
    }

    fn play_blocking(
        device: &Device,
        pcm: PcmBuffer,
        completion: &PlaybackCompletion,
    ) -> Result<(), AudioError> {
        let default_output = device
            .default_output_config()
            .map_err(|e| AudioError::Output(e.to_string()))?;
        let channels = default_output.channels().max(1);
        let device_rate = default_output.sample_rate().0;

        // Narrowband rate first, then the device default with resampling
        let mut rates = vec![pcm.sample_rate()];
        if device_rate != pcm.sample_rate() {
            rates.push(device_rate);
        }

        let mut last_error = String::from("no sample rate accepted");
        for rate in rates {
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let samples = resample(pcm.samples(), pcm.sample_rate(), rate);
            match run_stream(device, &config, samples, completion) {
                Ok(()) => return Ok(()),
                Err(AudioError::Output(e)) => {
                    tracing::warn!("Sample rate {} Hz failed: {}", rate, e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(AudioError::Output(last_error))
    }

    fn run_stream(
        device: &Device,
        config: &StreamConfig,
        samples: Vec<f32>,
        completion: &PlaybackCompletion,
    ) -> Result<(), AudioError> {
        let total = samples.len();
        let ring = HeapRb::<f32>::new(total.max(1));
        let (mut producer, mut consumer) = ring.split();
        producer.push_slice(&samples);

        let (drained_tx, drained_rx) = crossbeam_channel::bounded::<()>(1);
        let num_channels = config.channels as usize;
        let mut drained = false;

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(num_channels) {
                        let sample = match consumer.try_pop() {
                            Some(sample) => sample,
                            None => {
                                if !drained {
                                    drained = true;
                                    let _ = drained_tx.try_send(());
                                }
                                0.0
                            }
                        };
                        frame.fill(sample);
                    }
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Output(e.to_string()))?;
        stream.play().map_err(|e| AudioError::Output(e.to_string()))?;

        tracing::debug!(
            samples = total,
            rate = config.sample_rate.0,
            channels = config.channels,
            "Output stream started"
        );

        let started = Instant::now();
        loop {
            if completion.is_stopped() {
                return Err(AudioError::Cancelled);
            }
            match drained_rx.recv_timeout(STOP_POLL) {
                Ok(()) => break,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::Output("output stream closed".to_string()));
                }
            }
        }
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Output drained");
        Ok(())
    }

    /// Linear-interpolation rate conversion
    fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
        if from == to || samples.is_empty() || from == 0 {
            return samples.to_vec();
        }
        let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
        let step = from as f64 / to as f64;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * step;
                let idx = pos as usize;
                let frac = (pos - idx as f64) as f32;
                let a = samples[idx.min(samples.len() - 1)];
                let b = samples[(idx + 1).min(samples.len() - 1)];
                a + (b - a) * frac
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_resample_length() {
            let input = vec![0.5f32; 8000];
            assert_eq!(resample(&input, 8000, 48000).len(), 48000);
            assert_eq!(resample(&input, 8000, 8000).len(), 8000);
        }

        #[test]
        fn test_resample_interpolates() {
            let out = resample(&[0.0, 1.0], 8000, 16000);
            assert_eq!(out.len(), 4);
            assert!((out[1] - 0.5).abs() < 1e-6);
        }
    }
}
