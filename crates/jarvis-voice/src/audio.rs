//! Microphone capture via CPAL.
//!
//! Low-latency audio input shared by the native recognizer and the voice
//! activity monitor. Chunks are fixed-size f32 sample buffers pushed into an
//! unbounded channel from the audio callback thread.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate in Hz (default: 16000).
    pub sample_rate: u32,
    /// Number of channels (default: 1 for mono).
    pub channels: u16,
    /// Chunk size in samples (default: 480 = 30ms at 16kHz, required by VAD).
    pub chunk_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 480,
        }
    }
}

/// One chunk of captured audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Samples (f32, normalized to -1.0..1.0).
    pub samples: Vec<f32>,
    /// When the chunk was captured.
    pub timestamp: std::time::Instant,
}

impl AudioChunk {
    /// Mean absolute amplitude scaled to a 0-255 range, the unit the
    /// activity monitor thresholds against.
    pub fn energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s.abs()).sum();
        (sum / self.samples.len() as f32) * 255.0
    }
}

/// Microphone capture. Build once, then `start_capture` to get a live stream.
pub struct MicCapture {
    config: CaptureConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl MicCapture {
    /// Open the default input device with the given config.
    pub fn new(config: CaptureConfig) -> VoiceResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;

        info!(
            "MicCapture: using input device '{}' ({}Hz, {} ch)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate,
            config.channels
        );

        // Probe the default config so device errors surface here, not at stream build.
        let _ = device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.chunk_size as u32),
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start capturing. Chunks of exactly `chunk_size` samples are sent on
    /// `chunk_tx`; keep the returned `Stream` alive to keep capturing.
    pub fn start_capture(self, chunk_tx: mpsc::UnboundedSender<AudioChunk>) -> VoiceResult<Stream> {
        let chunk_size = self.config.chunk_size;
        let mut sample_buffer = Vec::with_capacity(chunk_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    sample_buffer.push(sample);
                    if sample_buffer.len() >= chunk_size {
                        let chunk = AudioChunk {
                            samples: sample_buffer.clone(),
                            timestamp: std::time::Instant::now(),
                        };
                        if chunk_tx.send(chunk).is_err() {
                            // Receiver dropped; stop pushing.
                            sample_buffer.clear();
                            return;
                        }
                        sample_buffer.clear();
                    }
                }
            },
            move |err| {
                warn!("MicCapture: stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!("MicCapture: capture started");
        Ok(stream)
    }

    /// List available input devices (diagnostics).
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.chunk_size, 480);
    }

    #[test]
    fn chunk_energy_scaling() {
        let silent = AudioChunk {
            samples: vec![0.0; 480],
            timestamp: std::time::Instant::now(),
        };
        assert_eq!(silent.energy(), 0.0);

        let loud = AudioChunk {
            samples: vec![0.5; 480],
            timestamp: std::time::Instant::now(),
        };
        assert!((loud.energy() - 127.5).abs() < 1e-3);

        let empty = AudioChunk {
            samples: Vec::new(),
            timestamp: std::time::Instant::now(),
        };
        assert_eq!(empty.energy(), 0.0);
    }
}
