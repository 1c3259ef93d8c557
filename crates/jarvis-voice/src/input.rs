//! **SpeechInputSession** — continuous recognition with wake/sleep gating.
//!
//! Wraps a `RecognitionBackend` and turns raw transcript batches into session
//! events: wake and sleep phrase detection, accumulated utterances submitted
//! after a silence window, barge-in notices while output is playing, and
//! recovery when the recognizer drops. Restarts use capped exponential
//! backoff; after too many consecutive failures the session reports itself
//! unavailable instead of retrying forever.

use crate::config::VoiceSettings;
use crate::error::{VoiceError, VoiceResult};
use crate::recognition::{RecognitionBackend, RecognitionEvent, TranscriptSegment};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Probe for whether assistant output is currently audible.
pub type OutputProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Events the session emits to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Wake phrase heard; the session is now activated.
    Wake,
    /// Sleep phrase heard; the session is now deactivated.
    Sleep,
    /// Activated transcript update (accumulated finals or a live interim).
    Transcript { text: String, is_final: bool },
    /// The silence window elapsed; the pending utterance is ready.
    SubmitUtterance { text: String },
    /// The user spoke while output was playing.
    BargeIn,
    /// The recognizer dropped; restart attempt `attempt` is scheduled.
    Recovering { attempt: u32 },
    /// Too many consecutive restart failures; recognition has given up.
    Unavailable,
}

/// Session tuning derived from `VoiceSettings`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub wake_phrase: String,
    pub sleep_phrase: String,
    pub silence_window: Duration,
    pub restart_delay: Duration,
    pub restart_delay_cap: Duration,
    pub max_restarts: u32,
}

impl From<&VoiceSettings> for SessionConfig {
    fn from(s: &VoiceSettings) -> Self {
        Self {
            wake_phrase: s.wake_phrase.to_lowercase(),
            sleep_phrase: s.sleep_phrase.to_lowercase(),
            silence_window: Duration::from_millis(s.silence_window_ms),
            restart_delay: Duration::from_millis(s.restart_delay_ms),
            restart_delay_cap: Duration::from_millis(s.restart_delay_cap_ms),
            max_restarts: s.max_restarts,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        (&VoiceSettings::default()).into()
    }
}

/// What a result batch did to the silence timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Keep,
    Arm,
    Clear,
}

/// Phrase gating and utterance accumulation, separated from the async task
/// so the rules are testable without timers.
struct SessionLogic {
    config: SessionConfig,
    activated: Arc<AtomicBool>,
    pending: String,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionLogic {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Process one recognizer result batch.
    fn on_results(&mut self, segments: &[TranscriptSegment], output_playing: bool) -> TimerAction {
        let mut final_parts: Vec<&str> = Vec::new();
        let mut interim_parts: Vec<&str> = Vec::new();
        for segment in segments {
            let text = segment.transcript.trim();
            if text.is_empty() {
                continue;
            }
            if segment.is_final {
                final_parts.push(text);
            } else {
                interim_parts.push(text);
            }
        }
        let final_transcript = final_parts.join(" ").to_lowercase();
        let interim_transcript = interim_parts.join(" ").to_lowercase();
        let combined = format!("{} {}", final_transcript, interim_transcript)
            .trim()
            .to_string();

        if combined.is_empty() {
            return TimerAction::Keep;
        }

        if output_playing {
            debug!("Session: speech during playback, signalling barge-in");
            self.emit(SessionEvent::BargeIn);
        }

        let activated = self.activated.load(Ordering::SeqCst);

        if !activated {
            if combined.contains(&self.config.wake_phrase) {
                info!("Session: wake phrase heard");
                self.activated.store(true, Ordering::SeqCst);
                self.pending.clear();
                self.emit(SessionEvent::Wake);
                return TimerAction::Clear;
            }
            return TimerAction::Keep;
        }

        if combined.contains(&self.config.sleep_phrase) {
            info!("Session: sleep phrase heard");
            self.activated.store(false, Ordering::SeqCst);
            self.pending.clear();
            self.emit(SessionEvent::Sleep);
            return TimerAction::Clear;
        }

        if !final_transcript.is_empty() {
            if self.pending.is_empty() {
                self.pending = final_transcript;
            } else {
                self.pending.push(' ');
                self.pending.push_str(&final_transcript);
            }
            self.emit(SessionEvent::Transcript {
                text: self.pending.clone(),
                is_final: true,
            });
            return TimerAction::Arm;
        }

        self.emit(SessionEvent::Transcript {
            text: interim_transcript,
            is_final: false,
        });
        // The user is audibly mid-sentence: hold off submission until the
        // next final segment re-arms the timer.
        TimerAction::Clear
    }

    /// The silence window elapsed.
    fn on_silence_elapsed(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let utterance = std::mem::take(&mut self.pending);
        info!("Session: submitting utterance after silence");
        self.emit(SessionEvent::SubmitUtterance { text: utterance });
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

/// Continuous speech input session.
pub struct SpeechInputSession {
    backend: Arc<dyn RecognitionBackend>,
    config: SessionConfig,
    activated: Arc<AtomicBool>,
    output_probe: OutputProbe,
    events: mpsc::UnboundedSender<SessionEvent>,
    running: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechInputSession {
    /// Create a session and the event stream the coordinator consumes.
    pub fn new(
        backend: Arc<dyn RecognitionBackend>,
        config: SessionConfig,
        output_probe: OutputProbe,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(false);
        (
            Self {
                backend,
                config,
                activated: Arc::new(AtomicBool::new(false)),
                output_probe,
                events,
                running,
                task: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Begin listening. Idempotent while the session task is live.
    pub fn start(&self) -> VoiceResult<()> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| VoiceError::Recognition("session lock poisoned".to_string()))?;
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            if *self.running.borrow() {
                return Ok(());
            }
            // Stopped but the old task has not wound down yet; replace it so
            // a stop() promptly followed by start() still listens.
            if let Some(old) = task.take() {
                old.abort();
            }
        }

        self.running.send_replace(true);
        let backend = Arc::clone(&self.backend);
        let logic = SessionLogic {
            config: self.config.clone(),
            activated: Arc::clone(&self.activated),
            pending: String::new(),
            events: self.events.clone(),
        };
        let output_probe = Arc::clone(&self.output_probe);
        let running_rx = self.running.subscribe();
        *task = Some(tokio::spawn(run_session(
            backend,
            logic,
            output_probe,
            running_rx,
        )));
        info!("Session: started");
        Ok(())
    }

    /// Stop listening, deactivate, and drop any pending utterance. Idempotent.
    pub fn stop(&self) {
        self.running.send_replace(false);
        self.backend.stop();
        self.activated.store(false, Ordering::SeqCst);
        if let Ok(mut task) = self.task.lock() {
            if task.as_ref().map(|t| t.is_finished()).unwrap_or(false) {
                *task = None;
            }
        }
        info!("Session: stopped");
    }

    /// Activate without the wake phrase (mic button path).
    pub fn activate(&self) {
        self.activated.store(true, Ordering::SeqCst);
    }

    /// Deactivate without the sleep phrase.
    pub fn deactivate(&self) {
        self.activated.store(false, Ordering::SeqCst);
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }
}

async fn run_session(
    backend: Arc<dyn RecognitionBackend>,
    mut logic: SessionLogic,
    output_probe: OutputProbe,
    mut running: watch::Receiver<bool>,
) {
    let config = logic.config.clone();
    let mut consecutive_failures: u32 = 0;

    'restart: loop {
        if !*running.borrow() {
            break;
        }
        let (rec_tx, mut rec_rx) = mpsc::unbounded_channel();
        if let Err(e) = backend.start(rec_tx) {
            warn!("Session: recognizer start failed: {}", e);
            consecutive_failures += 1;
            if !schedule_restart(&config, consecutive_failures, &logic, &mut running).await {
                break;
            }
            continue;
        }

        let mut silence_deadline: Option<Instant> = None;

        loop {
            let silence = async {
                match silence_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                event = rec_rx.recv() => match event {
                    Some(RecognitionEvent::Results { segments }) => {
                        consecutive_failures = 0;
                        match logic.on_results(&segments, output_probe()) {
                            TimerAction::Arm => {
                                silence_deadline = Some(Instant::now() + config.silence_window);
                            }
                            TimerAction::Clear => silence_deadline = None,
                            TimerAction::Keep => {}
                        }
                    }
                    Some(RecognitionEvent::Error { code }) => {
                        if code.is_recoverable() {
                            warn!("Session: recognizer error {:?}, restarting", code);
                            backend.stop();
                            consecutive_failures += 1;
                            if !schedule_restart(&config, consecutive_failures, &logic, &mut running).await {
                                break 'restart;
                            }
                            continue 'restart;
                        }
                        debug!("Session: ignoring recognizer error {:?}", code);
                    }
                    Some(RecognitionEvent::Ended) | None => {
                        if !*running.borrow() {
                            break 'restart;
                        }
                        debug!("Session: recognizer ended, restarting");
                        backend.stop();
                        consecutive_failures += 1;
                        if !schedule_restart(&config, consecutive_failures, &logic, &mut running).await {
                            break 'restart;
                        }
                        continue 'restart;
                    }
                },
                _ = silence => {
                    silence_deadline = None;
                    logic.on_silence_elapsed();
                }
                _ = running.changed() => {
                    if !*running.borrow() {
                        break 'restart;
                    }
                }
            }
        }
    }

    backend.stop();
    logic.clear_pending();
    logic.activated.store(false, Ordering::SeqCst);
    debug!("Session: task exited");
}

/// Wait out the backoff delay before the next restart attempt. Returns false
/// when the session should give up (stop requested or attempts exhausted).
async fn schedule_restart(
    config: &SessionConfig,
    attempt: u32,
    logic: &SessionLogic,
    running: &mut watch::Receiver<bool>,
) -> bool {
    if attempt > config.max_restarts {
        warn!(
            "Session: recognition unavailable after {} restart attempts",
            config.max_restarts
        );
        logic.emit(SessionEvent::Unavailable);
        return false;
    }
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = config
        .restart_delay
        .saturating_mul(1u32 << exponent)
        .min(config.restart_delay_cap);
    logic.emit(SessionEvent::Recovering { attempt });
    info!("Session: restarting recognizer in {:?} (attempt {})", delay, attempt);

    tokio::select! {
        _ = tokio::time::sleep(delay) => *running.borrow(),
        _ = running.changed() => *running.borrow(),
    }
}
