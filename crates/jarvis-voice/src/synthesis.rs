//! Speech synthesis backends and audio playback.
//!
//! A `TtsBackend` turns text into audio bytes; an `AudioSink` plays them and
//! exposes the stop/is_playing pair the output queue and barge-in logic rely
//! on.

use crate::error::{VoiceError, VoiceResult};
use crate::voices::VoiceInfo;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

/// Backend that turns text into audio bytes (WAV/MP3). Return an empty vec
/// to skip playback for the item.
pub trait TtsBackend: Send + Sync {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&VoiceInfo>,
        rate: f32,
        pitch: f32,
    ) -> VoiceResult<Vec<u8>>;
}

/// Null TTS: always returns empty audio. Items pass through the queue with
/// their callbacks firing but nothing plays.
#[derive(Debug, Default)]
pub struct NullTts;

impl TtsBackend for NullTts {
    fn synthesize(
        &self,
        _text: &str,
        _voice: Option<&VoiceInfo>,
        _rate: f32,
        _pitch: f32,
    ) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Remote TTS via an OpenAI-compatible speech API.
/// Uses `TTS_API_URL` (default https://api.openai.com/v1), `TTS_API_KEY`,
/// and `TTS_MODEL` (default tts-1). The rate knob maps to the API's speed
/// parameter; pitch is not supported by these APIs and is ignored.
#[derive(Debug, Clone)]
pub struct HttpTts {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// TTS model: tts-1 (fast) or tts-1-hd (higher quality).
    pub model: String,
    /// Fixed API voice id (e.g. "onyx"). Used when no `VoiceInfo` is given.
    pub default_voice: String,
    client: reqwest::blocking::Client,
}

impl HttpTts {
    /// Build from environment: TTS_API_URL, TTS_API_KEY, TTS_MODEL, TTS_VOICE.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .map_err(|_| VoiceError::Config("TTS requires TTS_API_KEY".to_string()))?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let default_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "onyx".to_string());
        Self::new(base_url, api_key, model, default_voice)
    }

    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        default_voice: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_voice: default_voice.into(),
            client,
        })
    }
}

impl TtsBackend for HttpTts {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&VoiceInfo>,
        rate: f32,
        _pitch: f32,
    ) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let voice_id = voice
            .map(|v| v.name.as_str())
            .unwrap_or(self.default_voice.as_str());
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice_id,
            "speed": rate,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }
        let bytes = res
            .bytes()
            .map_err(|e| VoiceError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Playback target for synthesized audio. `stop` is the barge-in kill-switch.
///
/// Not `Send`: rodio output streams are thread-bound, so sinks are built on
/// the thread that plays through them (the output queue worker).
pub trait AudioSink {
    fn play(&self, bytes: &[u8]) -> VoiceResult<()>;
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

/// Rodio-backed sink on the default output device.
pub struct RodioSink {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Arc<Sink>,
}

impl RodioSink {
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink =
            Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!("RodioSink: ready for playback");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink: Arc::new(sink),
        })
    }
}

impl AudioSink for RodioSink {
    fn play(&self, bytes: &[u8]) -> VoiceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let cursor = Cursor::new(bytes.to_vec());
        let source = rodio::Decoder::new(cursor)
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    fn stop(&self) {
        self.sink.stop();
        info!("RodioSink: stopped");
    }

    fn is_playing(&self) -> bool {
        !self.sink.empty()
    }
}
