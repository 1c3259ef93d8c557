//! **VoiceInteractionCoordinator** — the assistant's conversational state machine.
//!
//! ```text
//! ┌──────────────┐  SessionEvent   ┌─────────────────────┐
//! │ InputSession │ ──────────────► │                     │
//! └──────────────┘                 │     Coordinator     │  watch
//! ┌──────────────┐  BargeIn        │  Idle / Listening / │ ───────► AssistantState
//! │   Monitor    │ ──────────────► │ Speaking/Processing │
//! └──────────────┘                 │                     │
//! ┌──────────────┐  callbacks      └──────────┬──────────┘
//! │ OutputQueue  │ ◄───────────────────────── │ enqueue / cancel_all
//! └──────────────┘                 ┌──────────▼──────────┐
//!                                  │     ChatBackend     │ (abortable turns)
//!                                  └─────────────────────┘
//! ```
//!
//! All state mutation happens inside the coordinator's event loop; the audio
//! threads and chat tasks only post signals into it. One chat turn is
//! outstanding at a time: each gets a generation number, and a superseded or
//! aborted turn's late events are dropped without comment.

use crate::config::VoiceSettings;
use crate::error::VoiceResult;
use crate::input::{SessionConfig, SessionEvent, SpeechInputSession};
use crate::monitor::{EnergySource, MonitorConfig, VoiceActivityMonitor};
use crate::output::{SpeakOptions, SpeechOutputQueue};
use crate::recognition::RecognitionBackend;
use crate::voices::{VoiceInfo, VoicePicker};
use futures::future::{AbortHandle, Abortable};
use jarvis_chat::{ChatBackend, ChatEvent, ChatMessage, Source, TurnRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Spoken when the wake phrase activates the assistant.
pub const GREETING: &str = "At your service, Sir.";
/// Spoken when the sleep phrase deactivates the assistant.
pub const FAREWELL: &str = "Going to sleep. Call me if you need anything, Sir.";
/// Spoken (and shown) when a chat turn genuinely fails.
pub const ERROR_REPLY: &str = "I apologize, Sir. Something went wrong. Please try again.";

/// Coordinator state, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantState {
    Idle,
    Listening,
    Speaking,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Completed,
    Failed,
    Aborted,
}

/// Commands the handle can issue.
#[derive(Clone)]
pub enum Command {
    /// Activate without the wake phrase (mic button).
    Activate,
    /// Deactivate without the sleep phrase, silently.
    Deactivate,
    SetMuted(bool),
    SetDeepSearch(bool),
    SetLiveMode(bool),
    /// Replace the known synthesis voice inventory; reruns voice selection.
    SetVoiceInventory(Vec<VoiceInfo>),
    /// Override the selected voice by name, or clear the override.
    SetVoice(Option<VoiceInfo>),
    /// Submit typed text as a turn.
    SubmitText(String),
    /// Stop listening and speaking entirely.
    Pause,
    /// Resume listening after a pause.
    Resume,
    Shutdown,
}

enum Signal {
    OutputStarted,
    OutputEnded,
    OutputFailed,
    BargeIn,
    Chat { generation: u64, event: ChatEvent },
    TurnDone { generation: u64, outcome: TurnOutcome },
    Command(Command),
}

/// Everything the coordinator is built from. Backends are trait objects so
/// tests can substitute scripted ones.
pub struct CoordinatorParts {
    pub settings: VoiceSettings,
    pub recognizer: Arc<dyn RecognitionBackend>,
    pub chat: Arc<dyn ChatBackend>,
    pub output: Arc<SpeechOutputQueue>,
    pub energy_source: Arc<dyn EnergySource>,
}

/// Cloneable control surface for the running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    signals: mpsc::UnboundedSender<Signal>,
    state: watch::Receiver<AssistantState>,
    transcript: Arc<Mutex<Vec<ChatMessage>>>,
    last_sources: Arc<Mutex<Vec<Source>>>,
}

impl CoordinatorHandle {
    pub fn command(&self, command: Command) {
        let _ = self.signals.send(Signal::Command(command));
    }

    pub fn activate(&self) {
        self.command(Command::Activate);
    }

    pub fn deactivate(&self) {
        self.command(Command::Deactivate);
    }

    pub fn set_muted(&self, muted: bool) {
        self.command(Command::SetMuted(muted));
    }

    pub fn set_voice_inventory(&self, voices: Vec<VoiceInfo>) {
        self.command(Command::SetVoiceInventory(voices));
    }

    pub fn set_voice(&self, voice: Option<VoiceInfo>) {
        self.command(Command::SetVoice(voice));
    }

    pub fn submit_text(&self, text: impl Into<String>) {
        self.command(Command::SubmitText(text.into()));
    }

    pub fn pause(&self) {
        self.command(Command::Pause);
    }

    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    /// Watch the assistant state.
    pub fn state(&self) -> watch::Receiver<AssistantState> {
        self.state.clone()
    }

    /// Shared conversation history.
    pub fn transcript(&self) -> Arc<Mutex<Vec<ChatMessage>>> {
        Arc::clone(&self.transcript)
    }

    /// Sources attached to the most recent assistant reply.
    pub fn last_sources(&self) -> Vec<Source> {
        self.last_sources.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// The coordinator. Build with [`VoiceInteractionCoordinator::new`], then
/// drive with [`run`](Self::run).
pub struct VoiceInteractionCoordinator {
    settings: VoiceSettings,
    session: SpeechInputSession,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    monitor: VoiceActivityMonitor,
    output: Arc<SpeechOutputQueue>,
    chat: Arc<dyn ChatBackend>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    state_tx: watch::Sender<AssistantState>,
    transcript: Arc<Mutex<Vec<ChatMessage>>>,
    last_sources: Arc<Mutex<Vec<Source>>>,
    voice_picker: VoicePicker,
    voice_inventory: Vec<VoiceInfo>,
    preferred_voice: Option<VoiceInfo>,
    muted: bool,
    deep_search: bool,
    live_mode: bool,
    generation: u64,
    active_turn: Option<AbortHandle>,
    reply_buffer: String,
    reply_sources: Vec<Source>,
}

impl VoiceInteractionCoordinator {
    pub fn new(parts: CoordinatorParts) -> (Self, CoordinatorHandle) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(AssistantState::Idle);
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let last_sources = Arc::new(Mutex::new(Vec::new()));

        let output = parts.output;
        let probe_output = Arc::clone(&output);
        let (session, session_rx) = SpeechInputSession::new(
            parts.recognizer,
            SessionConfig::from(&parts.settings),
            Arc::new(move || probe_output.is_playing()),
        );

        let monitor_signals = signal_tx.clone();
        let monitor = VoiceActivityMonitor::new(
            MonitorConfig {
                energy_threshold: parts.settings.energy_threshold,
                poll_interval: Duration::from_millis(parts.settings.energy_poll_ms),
                debounce: Duration::from_millis(parts.settings.barge_in_debounce_ms),
            },
            parts.energy_source,
            Arc::new(move || {
                let _ = monitor_signals.send(Signal::BargeIn);
            }),
        );

        let handle = CoordinatorHandle {
            signals: signal_tx.clone(),
            state: state_rx,
            transcript: Arc::clone(&transcript),
            last_sources: Arc::clone(&last_sources),
        };

        let voice_picker = VoicePicker::new(parts.settings.locale.clone());

        (
            Self {
                settings: parts.settings,
                session,
                session_rx,
                monitor,
                output,
                chat: parts.chat,
                signal_tx,
                signal_rx,
                state_tx,
                transcript,
                last_sources,
                voice_picker,
                voice_inventory: Vec::new(),
                preferred_voice: None,
                muted: false,
                deep_search: false,
                live_mode: false,
                generation: 0,
                active_turn: None,
                reply_buffer: String::new(),
                reply_sources: Vec::new(),
            },
            handle,
        )
    }

    /// Run until shutdown. Starts the input session immediately; the
    /// assistant stays idle until woken.
    pub async fn run(mut self) -> VoiceResult<()> {
        self.session.start()?;
        info!("Coordinator: running");

        loop {
            tokio::select! {
                event = self.session_rx.recv() => match event {
                    Some(event) => self.on_session_event(event),
                    None => break,
                },
                signal = self.signal_rx.recv() => match signal {
                    Some(signal) => {
                        if !self.on_signal(signal) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.abort_active_turn();
        self.monitor.stop_monitoring();
        self.output.cancel_all();
        self.session.stop();
        self.set_state(AssistantState::Idle);
        info!("Coordinator: shut down");
        Ok(())
    }

    fn set_state(&self, state: AssistantState) {
        if *self.state_tx.borrow() != state {
            debug!("Coordinator: state -> {:?}", state);
            self.state_tx.send_replace(state);
        }
    }

    /// Listening when activated, otherwise idle.
    fn resting_state(&self) -> AssistantState {
        if self.session.is_activated() {
            AssistantState::Listening
        } else {
            AssistantState::Idle
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Wake => {
                info!("Coordinator: activated");
                self.set_state(AssistantState::Listening);
                self.speak(GREETING);
            }
            SessionEvent::Sleep => {
                info!("Coordinator: deactivated");
                self.abort_active_turn();
                self.output.cancel_all();
                self.monitor.stop_monitoring();
                self.set_state(AssistantState::Idle);
                self.speak(FAREWELL);
            }
            SessionEvent::Transcript { text, is_final } => {
                debug!(final_ = is_final, "Coordinator: transcript '{}'", text);
            }
            SessionEvent::SubmitUtterance { text } => {
                self.submit_turn(text);
            }
            SessionEvent::BargeIn => {
                self.on_barge_in();
            }
            SessionEvent::Recovering { attempt } => {
                info!("Coordinator: recognition recovering (attempt {})", attempt);
            }
            SessionEvent::Unavailable => {
                warn!("Coordinator: recognition unavailable, going idle");
                self.abort_active_turn();
                self.output.cancel_all();
                self.monitor.stop_monitoring();
                self.session.deactivate();
                self.set_state(AssistantState::Idle);
            }
        }
    }

    /// Returns false when the loop should exit.
    fn on_signal(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::OutputStarted => {
                self.set_state(AssistantState::Speaking);
                self.monitor.start_monitoring();
            }
            Signal::OutputEnded | Signal::OutputFailed => {
                if !self.output.is_playing() && self.output.pending() == 0 {
                    self.monitor.stop_monitoring();
                    if self.active_turn.is_some() {
                        self.set_state(AssistantState::Processing);
                    } else {
                        self.set_state(self.resting_state());
                    }
                }
            }
            Signal::BargeIn => {
                self.on_barge_in();
            }
            Signal::Chat { generation, event } => {
                if generation == self.generation && self.active_turn.is_some() {
                    self.on_chat_event(event);
                } else {
                    debug!("Coordinator: dropping stale chat event");
                }
            }
            Signal::TurnDone { generation, outcome } => {
                if generation == self.generation {
                    self.on_turn_done(outcome);
                } else {
                    debug!("Coordinator: dropping stale turn completion");
                }
            }
            Signal::Command(command) => return self.on_command(command),
        }
        true
    }

    fn on_barge_in(&mut self) {
        if *self.state_tx.borrow() != AssistantState::Speaking && !self.output.is_playing() {
            return;
        }
        info!("Coordinator: barge-in, silencing output");
        self.output.cancel_all();
        self.monitor.stop_monitoring();
        if self.active_turn.is_some() {
            self.set_state(AssistantState::Processing);
        } else {
            self.set_state(self.resting_state());
        }
    }

    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Activate => {
                if !self.session.is_activated() {
                    self.session.activate();
                    self.set_state(AssistantState::Listening);
                    self.speak(GREETING);
                }
            }
            Command::Deactivate => {
                self.session.deactivate();
                self.abort_active_turn();
                self.output.cancel_all();
                self.monitor.stop_monitoring();
                self.set_state(AssistantState::Idle);
            }
            Command::SetMuted(muted) => {
                self.muted = muted;
                if muted {
                    self.output.cancel_all();
                    self.monitor.stop_monitoring();
                    if self.active_turn.is_some() {
                        self.set_state(AssistantState::Processing);
                    } else {
                        self.set_state(self.resting_state());
                    }
                }
            }
            Command::SetDeepSearch(on) => self.deep_search = on,
            Command::SetLiveMode(on) => self.live_mode = on,
            Command::SetVoiceInventory(voices) => {
                self.voice_inventory = voices;
                self.preferred_voice = self.voice_picker.pick(&self.voice_inventory);
            }
            Command::SetVoice(Some(voice)) => {
                self.preferred_voice = self
                    .voice_picker
                    .set_preferred_voice(&self.voice_inventory, &voice.name)
                    .or(Some(voice));
            }
            Command::SetVoice(None) => self.preferred_voice = None,
            Command::SubmitText(text) => self.submit_turn(text),
            Command::Pause => {
                self.session.stop();
                self.abort_active_turn();
                self.output.cancel_all();
                self.monitor.stop_monitoring();
                self.set_state(AssistantState::Idle);
            }
            Command::Resume => {
                if let Err(e) = self.session.start() {
                    warn!("Coordinator: resume failed: {}", e);
                }
                self.set_state(self.resting_state());
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn on_chat_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::TextDelta { text_delta } => {
                self.reply_buffer.push_str(&text_delta);
            }
            ChatEvent::Sources { sources } => {
                self.reply_sources = sources;
            }
            ChatEvent::Finish => {
                // Completion is handled on TurnDone, which always follows.
                debug!("Coordinator: chat stream finished");
            }
        }
    }

    fn on_turn_done(&mut self, outcome: TurnOutcome) {
        self.active_turn = None;
        match outcome {
            TurnOutcome::Completed => self.finalize_reply(),
            TurnOutcome::Failed => {
                self.reply_buffer.clear();
                self.reply_sources.clear();
                if let Ok(mut transcript) = self.transcript.lock() {
                    transcript.push(ChatMessage::assistant(ERROR_REPLY));
                }
                if self.muted {
                    self.set_state(self.resting_state());
                } else {
                    self.speak(ERROR_REPLY);
                    self.set_state(self.resting_state());
                }
            }
            TurnOutcome::Aborted => {
                debug!("Coordinator: turn aborted, discarding partial reply");
                self.reply_buffer.clear();
                self.reply_sources.clear();
            }
        }
    }

    fn finalize_reply(&mut self) {
        let reply = std::mem::take(&mut self.reply_buffer).trim().to_string();
        let sources = std::mem::take(&mut self.reply_sources);
        if let Ok(mut last) = self.last_sources.lock() {
            *last = sources;
        }
        if reply.is_empty() {
            self.set_state(self.resting_state());
            return;
        }
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(ChatMessage::assistant(reply.clone()));
        }
        if self.muted {
            self.set_state(self.resting_state());
        } else {
            // OutputStarted moves us to Speaking; a synthesis failure posts
            // OutputFailed which settles the state instead.
            self.speak(reply);
        }
    }

    fn submit_turn(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.abort_active_turn();
        self.output.cancel_all();
        self.monitor.stop_monitoring();
        self.reply_buffer.clear();
        self.reply_sources.clear();

        self.generation += 1;
        let generation = self.generation;
        info!("Coordinator: submitting turn {} ('{}')", generation, text);

        let messages = {
            let mut transcript = match self.transcript.lock() {
                Ok(t) => t,
                Err(_) => return,
            };
            transcript.push(ChatMessage::user(text));
            transcript.clone()
        };
        self.set_state(AssistantState::Processing);

        let mut request = TurnRequest::new(messages);
        request.deep_search = self.deep_search;
        request.is_live_mode = self.live_mode;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ChatEvent>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<TurnOutcome>();

        let turn = self.chat.submit(request, events_tx);
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        self.active_turn = Some(abort_handle);
        tokio::spawn(async move {
            let outcome = match Abortable::new(turn, abort_registration).await {
                Ok(Ok(())) => TurnOutcome::Completed,
                Ok(Err(e)) => {
                    warn!("Coordinator: turn {} failed: {}", generation, e);
                    TurnOutcome::Failed
                }
                Err(futures::future::Aborted) => TurnOutcome::Aborted,
            };
            let _ = done_tx.send(outcome);
        });

        // Forward every streamed event, then the completion, on one channel
        // so a reply can never be finalized before its own deltas.
        let forward = self.signal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if forward.send(Signal::Chat { generation, event }).is_err() {
                    return;
                }
            }
            let outcome = done_rx.await.unwrap_or(TurnOutcome::Aborted);
            let _ = forward.send(Signal::TurnDone { generation, outcome });
        });
    }

    fn abort_active_turn(&mut self) {
        if let Some(handle) = self.active_turn.take() {
            debug!("Coordinator: aborting in-flight turn");
            handle.abort();
        }
    }

    fn speak(&self, text: impl Into<String>) {
        if self.muted {
            return;
        }
        let started = self.signal_tx.clone();
        let ended = self.signal_tx.clone();
        let failed = self.signal_tx.clone();
        let options = SpeakOptions {
            rate: Some(self.settings.voice_rate),
            pitch: Some(self.settings.voice_pitch),
            voice: self.preferred_voice.clone(),
            on_start: Some(Arc::new(move || {
                let _ = started.send(Signal::OutputStarted);
            })),
            on_end: Some(Arc::new(move || {
                let _ = ended.send(Signal::OutputEnded);
            })),
            on_error: Some(Arc::new(move |_| {
                let _ = failed.send(Signal::OutputFailed);
            })),
        };
        if let Err(e) = self.output.enqueue(text.into(), options) {
            warn!("Coordinator: enqueue failed: {}", e);
        }
    }
}
