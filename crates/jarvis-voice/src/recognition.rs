//! Speech recognition seam: the event stream the input session consumes.
//!
//! A `RecognitionBackend` pushes batches of transcript segments plus error
//! and end-of-stream notices into a channel. The production backend lives in
//! `native`; tests drive the session with `ScriptedRecognition`.

use crate::error::VoiceResult;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One recognizer hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    /// Recognized text for this segment.
    pub transcript: String,
    /// True once the recognizer has committed to this text.
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: true,
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            transcript: text.into(),
            is_final: false,
        }
    }
}

/// Why a recognition error occurred. Drives the session's restart policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorCode {
    /// Nothing was said; not a failure.
    NoSpeech,
    /// The session was intentionally stopped.
    Aborted,
    /// Transient network failure; restartable.
    Network,
    /// Microphone capture failed; restartable.
    AudioCapture,
    /// Permission denied; restartable (the user may grant access later).
    NotAllowed,
    /// Anything else.
    Other,
}

impl RecognitionErrorCode {
    /// Whether the session should attempt a restart for this error.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            RecognitionErrorCode::Network
                | RecognitionErrorCode::AudioCapture
                | RecognitionErrorCode::NotAllowed
        )
    }
}

/// Events a recognition backend delivers to the session.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// A batch of segments from one recognizer callback.
    Results { segments: Vec<TranscriptSegment> },
    /// The recognizer hit an error; the stream may end afterwards.
    Error { code: RecognitionErrorCode },
    /// The recognizer stream ended.
    Ended,
}

/// Continuous speech recognizer. `start` begins delivery on the given channel;
/// `stop` halts it. Both must be idempotent.
pub trait RecognitionBackend: Send + Sync {
    fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> VoiceResult<()>;
    fn stop(&self);
}

/// Scripted recognizer for tests: replays a fixed event sequence on each
/// `start` (one script per call), then keeps the stream open so further
/// events can be injected with `send`. `stop` closes the stream.
#[derive(Default)]
pub struct ScriptedRecognition {
    scripts: Mutex<Vec<Vec<RecognitionEvent>>>,
    active: Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
}

impl ScriptedRecognition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the events the next `start` call will deliver.
    pub fn push_script(&self, events: Vec<RecognitionEvent>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(events);
        }
    }

    /// Inject an event into the currently started stream.
    pub fn send(&self, event: RecognitionEvent) {
        if let Ok(active) = self.active.lock() {
            if let Some(ref tx) = *active {
                let _ = tx.send(event);
            }
        }
    }

    /// Remaining scripts not yet consumed by `start`.
    pub fn remaining_scripts(&self) -> usize {
        self.scripts.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl RecognitionBackend for ScriptedRecognition {
    fn start(&self, events: mpsc::UnboundedSender<RecognitionEvent>) -> VoiceResult<()> {
        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| if s.is_empty() { None } else { Some(s.remove(0)) })
            .unwrap_or_default();
        for event in script {
            let _ = events.send(event);
        }
        if let Ok(mut active) = self.active.lock() {
            *active = Some(events);
        }
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_codes() {
        assert!(RecognitionErrorCode::Network.is_recoverable());
        assert!(RecognitionErrorCode::AudioCapture.is_recoverable());
        assert!(RecognitionErrorCode::NotAllowed.is_recoverable());
        assert!(!RecognitionErrorCode::NoSpeech.is_recoverable());
        assert!(!RecognitionErrorCode::Aborted.is_recoverable());
        assert!(!RecognitionErrorCode::Other.is_recoverable());
    }

    #[test]
    fn scripted_replays_in_order() {
        let backend = ScriptedRecognition::new();
        backend.push_script(vec![
            RecognitionEvent::Results {
                segments: vec![TranscriptSegment::finalized("hello")],
            },
            RecognitionEvent::Ended,
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        backend.start(tx).unwrap();

        match rx.try_recv().unwrap() {
            RecognitionEvent::Results { segments } => {
                assert_eq!(segments[0].transcript, "hello");
                assert!(segments[0].is_final);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), RecognitionEvent::Ended));
        assert_eq!(backend.remaining_scripts(), 0);
    }
}
