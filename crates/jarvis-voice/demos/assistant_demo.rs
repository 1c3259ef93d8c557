//! Assistant demo — full voice loop against a live chat endpoint.
//!
//! Wires the native recognizer, HTTP synthesis, the mic energy monitor, and
//! the streaming chat client into one running coordinator.
//!
//! - **STT**: `HttpStt` (requires `STT_API_KEY`).
//! - **TTS**: `HttpTts` if `TTS_API_KEY` is set, else silent `NullTts`.
//! - **Chat**: `JARVIS_CHAT_URL` must point at the chat endpoint.
//!
//! Say "jarvis activate" to wake it; Ctrl+C to stop.

use jarvis_chat::ChatClient;
use jarvis_voice::{
    AudioSink, CoordinatorParts, HttpStt, HttpTts, MicEnergySource, NativeConfig,
    NativeRecognition, NullTts, RodioSink, SpeechOutputQueue, TtsBackend,
    VoiceInteractionCoordinator, VoiceSettings,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("JARVIS assistant demo — say the wake phrase to begin.");
    info!("Requires STT_API_KEY and JARVIS_CHAT_URL; TTS_API_KEY for audible replies.");

    let settings = VoiceSettings::from_env();
    info!(
        "wake: '{}', sleep: '{}', locale: {}",
        settings.wake_phrase, settings.sleep_phrase, settings.locale
    );

    let stt = Arc::new(HttpStt::from_env()?);
    let recognizer = Arc::new(NativeRecognition::new(NativeConfig::default(), stt));

    let tts: Arc<dyn TtsBackend> = match HttpTts::from_env() {
        Ok(t) => {
            info!("Using HttpTts for synthesis.");
            Arc::new(t)
        }
        Err(_) => {
            info!("TTS_API_KEY not set; replies will be silent.");
            Arc::new(NullTts)
        }
    };
    let output = Arc::new(SpeechOutputQueue::new(tts, || {
        Ok(Box::new(RodioSink::new()?) as Box<dyn AudioSink>)
    })?);

    let chat = Arc::new(ChatClient::from_env()?);

    let (coordinator, handle) = VoiceInteractionCoordinator::new(CoordinatorParts {
        settings,
        recognizer,
        chat,
        output,
        energy_source: Arc::new(MicEnergySource::default()),
    });

    let run = tokio::spawn(coordinator.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down.");
    handle.shutdown();
    run.await??;
    Ok(())
}
