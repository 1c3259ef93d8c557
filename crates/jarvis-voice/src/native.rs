//! Native continuous recognizer: mic capture, VAD gap segmentation, and STT.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Mic In     │ → │  WebRTC VAD  │ → │ STT backend  │ → RecognitionEvent
//! │   (cpal)     │   │ (gap logic)  │   │  (HTTP)      │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Audio is processed in 30ms chunks; a speech run followed by the configured
//! silence gap is committed as one segment, transcribed, and emitted as a
//! single final transcript. Interim results are not produced.

use crate::audio::{AudioChunk, CaptureConfig, MicCapture};
use crate::error::{VoiceError, VoiceResult};
use crate::recognition::{
    RecognitionBackend, RecognitionErrorCode, RecognitionEvent, TranscriptSegment,
};
use crate::stt::SttBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Configuration for the native recognizer.
#[derive(Debug, Clone)]
pub struct NativeConfig {
    /// Sample rate (8000/16000/32000/48000 for WebRTC VAD; default 16000).
    pub sample_rate: u32,
    /// Chunk size in samples (default 480 = 30ms at 16kHz).
    pub chunk_size: usize,
    /// Silence after speech before a segment is committed (default 800ms).
    pub gap_ms: u64,
    /// Minimum speech duration for a segment to count (default 200ms).
    pub min_speech_ms: u64,
    /// Maximum segment length before forced commit (default 30s).
    pub max_segment_ms: u64,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_size: 480,
            gap_ms: 800,
            min_speech_ms: 200,
            max_segment_ms: 30_000,
        }
    }
}

/// Segmenter state: silence, speech run, or post-speech gap countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    Silence,
    Speech,
    Gap,
}

/// Accumulates chunks into speech segments based on VAD decisions.
struct Segmenter {
    config: NativeConfig,
    state: SegmentState,
    buffer: Vec<f32>,
    speech_start: Option<Instant>,
    last_speech: Option<Instant>,
}

impl Segmenter {
    fn new(config: NativeConfig) -> Self {
        Self {
            config,
            state: SegmentState::Silence,
            buffer: Vec::new(),
            speech_start: None,
            last_speech: None,
        }
    }

    /// Feed one VAD decision; returns a completed segment when the gap closes.
    fn push(&mut self, is_speech: bool, samples: &[f32]) -> Option<Vec<f32>> {
        let now = Instant::now();
        match (self.state, is_speech) {
            (SegmentState::Silence, true) => {
                debug!("Segmenter: speech started");
                self.state = SegmentState::Speech;
                self.speech_start = Some(now);
                self.last_speech = Some(now);
                self.buffer.clear();
                self.buffer.extend_from_slice(samples);
                None
            }
            (SegmentState::Speech, true) | (SegmentState::Gap, true) => {
                self.state = SegmentState::Speech;
                self.last_speech = Some(now);
                self.buffer.extend_from_slice(samples);
                if let Some(start) = self.speech_start {
                    if now.duration_since(start)
                        >= Duration::from_millis(self.config.max_segment_ms)
                    {
                        warn!("Segmenter: max segment length reached, committing");
                        return self.commit();
                    }
                }
                None
            }
            (SegmentState::Speech, false) => {
                self.state = SegmentState::Gap;
                None
            }
            (SegmentState::Gap, false) => {
                if let Some(last) = self.last_speech {
                    if now.duration_since(last) >= Duration::from_millis(self.config.gap_ms) {
                        return self.commit();
                    }
                }
                None
            }
            (SegmentState::Silence, false) => None,
        }
    }

    fn commit(&mut self) -> Option<Vec<f32>> {
        let duration = self
            .speech_start
            .zip(self.last_speech)
            .map(|(start, last)| last.duration_since(start))
            .unwrap_or_default();
        let segment = if duration >= Duration::from_millis(self.config.min_speech_ms) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            debug!("Segmenter: segment too short ({:?}), dropping", duration);
            self.buffer.clear();
            None
        };
        self.state = SegmentState::Silence;
        self.speech_start = None;
        self.last_speech = None;
        segment
    }
}

fn build_vad(config: &NativeConfig) -> VoiceResult<Vad> {
    let sample_rate = match config.sample_rate {
        8000 => SampleRate::Rate8kHz,
        16000 => SampleRate::Rate16kHz,
        32000 => SampleRate::Rate32kHz,
        48000 => SampleRate::Rate48kHz,
        other => {
            return Err(VoiceError::Config(format!(
                "WebRTC VAD only supports 8000/16000/32000/48000 Hz, got {}",
                other
            )))
        }
    };
    let mut vad = Vad::new();
    vad.set_mode(VadMode::Aggressive);
    vad.set_sample_rate(sample_rate);
    Ok(vad)
}

/// Production recognizer built on mic capture + VAD + an STT backend.
pub struct NativeRecognition {
    config: NativeConfig,
    stt: Arc<dyn SttBackend>,
    running: Arc<AtomicBool>,
}

impl NativeRecognition {
    pub fn new(config: NativeConfig, stt: Arc<dyn SttBackend>) -> Self {
        Self {
            config,
            stt,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RecognitionBackend for NativeRecognition {
    fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> VoiceResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let config = self.config.clone();
        let stt = Arc::clone(&self.stt);
        let running = Arc::clone(&self.running);

        // The cpal stream is !Send on some platforms; build and own it on a
        // dedicated thread.
        thread::spawn(move || {
            let capture_config = CaptureConfig {
                sample_rate: config.sample_rate,
                channels: 1,
                chunk_size: config.chunk_size,
            };
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
            let _stream = match MicCapture::new(capture_config)
                .and_then(|capture| capture.start_capture(chunk_tx))
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("NativeRecognition: mic open failed: {}", e);
                    let _ = events.send(RecognitionEvent::Error {
                        code: RecognitionErrorCode::AudioCapture,
                    });
                    let _ = events.send(RecognitionEvent::Ended);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let mut vad = match build_vad(&config) {
                Ok(v) => v,
                Err(e) => {
                    warn!("NativeRecognition: VAD init failed: {}", e);
                    let _ = events.send(RecognitionEvent::Error {
                        code: RecognitionErrorCode::Other,
                    });
                    let _ = events.send(RecognitionEvent::Ended);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            info!(
                "NativeRecognition: listening ({}ms gap, {}Hz)",
                config.gap_ms, config.sample_rate
            );
            let mut segmenter = Segmenter::new(config.clone());

            while running.load(Ordering::SeqCst) {
                let chunk = match chunk_rx.blocking_recv() {
                    Some(c) => c,
                    None => break,
                };
                if chunk.samples.len() != config.chunk_size {
                    continue;
                }
                let audio_i16: Vec<i16> = chunk
                    .samples
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect();
                let is_speech = vad.is_voice_segment(&audio_i16).unwrap_or(false);

                if let Some(segment) = segmenter.push(is_speech, &chunk.samples) {
                    match stt.transcribe(&segment, config.sample_rate) {
                        Ok(text) if !text.trim().is_empty() => {
                            let _ = events.send(RecognitionEvent::Results {
                                segments: vec![TranscriptSegment::finalized(text)],
                            });
                        }
                        Ok(_) => {
                            let _ = events.send(RecognitionEvent::Error {
                                code: RecognitionErrorCode::NoSpeech,
                            });
                        }
                        Err(e) => {
                            warn!("NativeRecognition: STT failed: {}", e);
                            let _ = events.send(RecognitionEvent::Error {
                                code: RecognitionErrorCode::Network,
                            });
                        }
                    }
                }
            }

            let _ = events.send(RecognitionEvent::Ended);
            running.store(false, Ordering::SeqCst);
            info!("NativeRecognition: stopped");
        });

        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
