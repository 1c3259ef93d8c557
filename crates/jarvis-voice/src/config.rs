//! Voice assistant settings: phrases, locale, prosody, and timing knobs.
//!
//! Defaults match the shipped assistant persona. Everything can be overridden
//! via environment variables (`JARVIS_*`) or by constructing the struct
//! directly in tests.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared across the input session, output queue, activity monitor,
/// and coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Phrase that activates the assistant (substring match, case-insensitive).
    #[serde(default = "default_wake_phrase")]
    pub wake_phrase: String,
    /// Phrase that deactivates the assistant.
    #[serde(default = "default_sleep_phrase")]
    pub sleep_phrase: String,
    /// Recognition locale (BCP 47, e.g. "en-IN").
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Speech rate multiplier for synthesized output.
    #[serde(default = "default_voice_rate")]
    pub voice_rate: f32,
    /// Speech pitch multiplier for synthesized output.
    #[serde(default = "default_voice_pitch")]
    pub voice_pitch: f32,
    /// Silence after the last final transcript before the utterance is submitted.
    #[serde(default = "default_silence_window_ms")]
    pub silence_window_ms: u64,
    /// Minimum gap between two barge-in signals.
    #[serde(default = "default_barge_in_debounce_ms")]
    pub barge_in_debounce_ms: u64,
    /// Mic energy (0-255 scale) above which the monitor reports voice activity.
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f32,
    /// Interval between mic energy samples while output is playing.
    #[serde(default = "default_energy_poll_ms")]
    pub energy_poll_ms: u64,
    /// Base delay before restarting a dropped recognition session. Doubles per
    /// consecutive failure, capped at `restart_delay_cap_ms`.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Upper bound on the restart backoff delay.
    #[serde(default = "default_restart_delay_cap_ms")]
    pub restart_delay_cap_ms: u64,
    /// Consecutive restart failures before the session gives up.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_wake_phrase() -> String {
    "jarvis activate".to_string()
}

fn default_sleep_phrase() -> String {
    "jarvis go to sleep".to_string()
}

fn default_locale() -> String {
    "en-IN".to_string()
}

fn default_voice_rate() -> f32 {
    0.95
}

fn default_voice_pitch() -> f32 {
    0.9
}

fn default_silence_window_ms() -> u64 {
    1200
}

fn default_barge_in_debounce_ms() -> u64 {
    300
}

fn default_energy_threshold() -> f32 {
    30.0
}

fn default_energy_poll_ms() -> u64 {
    50
}

fn default_restart_delay_ms() -> u64 {
    100
}

fn default_restart_delay_cap_ms() -> u64 {
    5000
}

fn default_max_restarts() -> u32 {
    8
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            wake_phrase: default_wake_phrase(),
            sleep_phrase: default_sleep_phrase(),
            locale: default_locale(),
            voice_rate: default_voice_rate(),
            voice_pitch: default_voice_pitch(),
            silence_window_ms: default_silence_window_ms(),
            barge_in_debounce_ms: default_barge_in_debounce_ms(),
            energy_threshold: default_energy_threshold(),
            energy_poll_ms: default_energy_poll_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            restart_delay_cap_ms: default_restart_delay_cap_ms(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl VoiceSettings {
    /// Load settings from `JARVIS_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            wake_phrase: env_string("JARVIS_WAKE_PHRASE", d.wake_phrase),
            sleep_phrase: env_string("JARVIS_SLEEP_PHRASE", d.sleep_phrase),
            locale: env_string("JARVIS_LOCALE", d.locale),
            voice_rate: env_parse("JARVIS_VOICE_RATE", d.voice_rate),
            voice_pitch: env_parse("JARVIS_VOICE_PITCH", d.voice_pitch),
            silence_window_ms: env_parse("JARVIS_SILENCE_WINDOW_MS", d.silence_window_ms),
            barge_in_debounce_ms: env_parse("JARVIS_BARGE_IN_DEBOUNCE_MS", d.barge_in_debounce_ms),
            energy_threshold: env_parse("JARVIS_ENERGY_THRESHOLD", d.energy_threshold),
            energy_poll_ms: env_parse("JARVIS_ENERGY_POLL_MS", d.energy_poll_ms),
            restart_delay_ms: env_parse("JARVIS_RESTART_DELAY_MS", d.restart_delay_ms),
            restart_delay_cap_ms: env_parse("JARVIS_RESTART_DELAY_CAP_MS", d.restart_delay_cap_ms),
            max_restarts: env_parse("JARVIS_MAX_RESTARTS", d.max_restarts),
        }
    }

    /// Read settings from a TOML file. Missing fields fall back to defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> VoiceResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| VoiceError::Config(e.to_string()))
    }

    /// Persist the current settings as TOML.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> VoiceResult<()> {
        let text =
            toml::to_string_pretty(self).map_err(|e| VoiceError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Primary language subtag of the configured locale ("en" for "en-IN").
    pub fn primary_language(&self) -> &str {
        self.locale.split('-').next().unwrap_or(&self.locale)
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let s = VoiceSettings::default();
        assert_eq!(s.wake_phrase, "jarvis activate");
        assert_eq!(s.sleep_phrase, "jarvis go to sleep");
        assert_eq!(s.locale, "en-IN");
        assert!((s.voice_rate - 0.95).abs() < 1e-6);
        assert!((s.voice_pitch - 0.9).abs() < 1e-6);
        assert_eq!(s.silence_window_ms, 1200);
        assert_eq!(s.barge_in_debounce_ms, 300);
        assert_eq!(s.energy_poll_ms, 50);
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let mut s = VoiceSettings::default();
        s.wake_phrase = "computer wake up".to_string();
        s.max_restarts = 3;

        let path = std::env::temp_dir().join("jarvis-settings-test.toml");
        s.save_to_file(&path).unwrap();
        let loaded = VoiceSettings::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.wake_phrase, "computer wake up");
        assert_eq!(loaded.max_restarts, 3);
        assert_eq!(loaded.locale, s.locale);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let s: VoiceSettings = toml::from_str("wake_phrase = \"hey jarvis\"").unwrap();
        assert_eq!(s.wake_phrase, "hey jarvis");
        assert_eq!(s.sleep_phrase, "jarvis go to sleep");
        assert_eq!(s.silence_window_ms, 1200);
    }

    #[test]
    fn primary_language_from_locale() {
        let mut s = VoiceSettings::default();
        assert_eq!(s.primary_language(), "en");
        s.locale = "hi".to_string();
        assert_eq!(s.primary_language(), "hi");
    }
}
