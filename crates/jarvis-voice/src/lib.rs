//! # JARVIS Voice — voice interaction for the assistant
//!
//! Continuous speech recognition with wake/sleep gating, queued speech
//! output, barge-in detection while speaking, and the coordinator that ties
//! them to a streaming chat backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Voice Interaction Coordinator                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐      │
//! │  │ InputSession │ → │  wake/sleep  │ → │  ChatBackend │      │
//! │  │ (recognizer) │   │  + silence   │   │  (SSE turn)  │      │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘      │
//! │         ▲                                      ▼              │
//! │  ┌──────────────┐      barge-in       ┌──────────────┐       │
//! │  │   Monitor    │ ───────────────────►│ OutputQueue  │       │
//! │  │ (mic energy) │     kill signal     │ (TTS + sink) │       │
//! │  └──────────────┘                     └──────────────┘       │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod monitor;
pub mod native;
pub mod output;
pub mod recognition;
pub mod stt;
pub mod synthesis;
pub mod voices;

pub use audio::{AudioChunk, CaptureConfig, MicCapture};
pub use config::VoiceSettings;
pub use coordinator::{
    AssistantState, Command, CoordinatorHandle, CoordinatorParts, VoiceInteractionCoordinator,
    ERROR_REPLY, FAREWELL, GREETING,
};
pub use error::{VoiceError, VoiceResult};
pub use input::{OutputProbe, SessionConfig, SessionEvent, SpeechInputSession};
pub use monitor::{
    EnergySource, EnergyStream, MicEnergySource, MonitorConfig, OnVoiceActivity,
    VoiceActivityMonitor,
};
pub use native::{NativeConfig, NativeRecognition};
pub use output::{SpeakOptions, SpeechCallback, SpeechErrorCallback, SpeechOutputQueue};
pub use recognition::{
    RecognitionBackend, RecognitionErrorCode, RecognitionEvent, ScriptedRecognition,
    TranscriptSegment,
};
pub use stt::{HttpStt, SttBackend};
pub use synthesis::{AudioSink, HttpTts, NullTts, RodioSink, TtsBackend};
pub use voices::{VoiceInfo, VoicePicker};
