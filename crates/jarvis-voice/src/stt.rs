//! Speech-to-text over captured PCM, used by the native recognizer.

use crate::error::{VoiceError, VoiceResult};
use std::io::Write;

/// Converts one segment of PCM (16kHz mono f32) to text.
pub trait SttBackend: Send + Sync {
    /// Transcribe a speech segment. Return an empty string if nothing was said.
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub(crate) fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let num_samples = samples.len();
    let data_len = num_samples * 2; // 16-bit = 2 bytes per sample
    let header_len = 44u32;
    let file_len = header_len + data_len as u32;

    let mut buf = Vec::with_capacity(44 + data_len);
    // RIFF header
    let _ = buf.write_all(b"RIFF");
    let _ = buf.write_all(&(file_len - 8).to_le_bytes());
    let _ = buf.write_all(b"WAVE");
    // fmt subchunk
    let _ = buf.write_all(b"fmt ");
    let _ = buf.write_all(&16u32.to_le_bytes());
    let _ = buf.write_all(&1u16.to_le_bytes()); // PCM
    let _ = buf.write_all(&1u16.to_le_bytes()); // mono
    let _ = buf.write_all(&sample_rate.to_le_bytes());
    let _ = buf.write_all(&(sample_rate * 2).to_le_bytes()); // byte rate
    let _ = buf.write_all(&2u16.to_le_bytes()); // block align
    let _ = buf.write_all(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    let _ = buf.write_all(b"data");
    let _ = buf.write_all(&(data_len as u32).to_le_bytes());
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let i = (clamped * 32767.0).round() as i16;
        let _ = buf.write_all(&i.to_le_bytes());
    }
    buf
}

/// Remote STT via an OpenAI-compatible transcription API.
/// Uses `STT_API_URL` (default https://api.openai.com/v1), `STT_API_KEY`,
/// and `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct HttpStt {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    pub model: String,
    client: reqwest::blocking::Client,
}

impl HttpStt {
    /// Build from environment: STT_API_URL, STT_API_KEY, STT_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .map_err(|_| VoiceError::Config("STT requires STT_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

impl SttBackend for HttpStt {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(samples, sample_rate);
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Recognition(format!(
                "STT API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res
            .json()
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_layout() {
        let wav = pcm_f32_to_wav(&[0.0, 0.5, -0.5, 1.0], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(wav.len(), 44 + 4 * 2);
        // sample rate at offset 24
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16000);
    }

    #[test]
    fn wav_clamps_out_of_range() {
        let wav = pcm_f32_to_wav(&[2.0], 16000);
        let sample = i16::from_le_bytes([wav[44], wav[45]]);
        assert_eq!(sample, i16::MAX);
    }
}
