//! End-to-end coordinator scenarios driven entirely by scripted backends.

use futures::future::BoxFuture;
use jarvis_chat::{ChatBackend, ChatError, ChatEvent, Role, Source, TurnRequest};
use jarvis_voice::{
    AssistantState, AudioSink, CoordinatorParts, EnergySource, EnergyStream, RecognitionBackend,
    RecognitionEvent, ScriptedRecognition, SessionConfig, SpeechInputSession, SpeechOutputQueue,
    TranscriptSegment, TtsBackend, VoiceError, VoiceInfo, VoiceInteractionCoordinator,
    VoiceResult, VoiceSettings, ERROR_REPLY, FAREWELL, GREETING,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// TTS that records every synthesized text and voice, producing no audio.
#[derive(Default)]
struct RecordingTts {
    spoken: Arc<Mutex<Vec<String>>>,
    voices: Arc<Mutex<Vec<Option<String>>>>,
}

impl TtsBackend for RecordingTts {
    fn synthesize(
        &self,
        text: &str,
        voice: Option<&VoiceInfo>,
        _rate: f32,
        _pitch: f32,
    ) -> VoiceResult<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        self.voices
            .lock()
            .unwrap()
            .push(voice.map(|v| v.name.clone()));
        Ok(Vec::new())
    }
}

/// Sink whose playback duration is controlled by the test.
struct FakeSink {
    playing: Arc<AtomicBool>,
    hold: bool,
}

impl AudioSink for FakeSink {
    fn play(&self, _bytes: &[u8]) -> VoiceResult<()> {
        if self.hold {
            self.playing.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

struct NoMicSource;

impl EnergySource for NoMicSource {
    fn open(&self) -> VoiceResult<Box<dyn EnergyStream>> {
        Err(VoiceError::AudioDevice("no mic in tests".to_string()))
    }
}

struct FakeTurn {
    events: Vec<ChatEvent>,
    delay: Duration,
    fail: bool,
}

/// Chat backend replaying one scripted turn per submission.
#[derive(Default)]
struct FakeChat {
    turns: Mutex<Vec<FakeTurn>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl FakeChat {
    fn push_turn(&self, events: Vec<ChatEvent>, delay: Duration) {
        self.turns.lock().unwrap().push(FakeTurn {
            events,
            delay,
            fail: false,
        });
    }

    fn push_failure(&self) {
        self.turns.lock().unwrap().push(FakeTurn {
            events: Vec::new(),
            delay: Duration::ZERO,
            fail: true,
        });
    }
}

impl ChatBackend for FakeChat {
    fn submit(
        &self,
        request: TurnRequest,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> BoxFuture<'static, Result<(), ChatError>> {
        self.requests.lock().unwrap().push(request);
        let turn = {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                FakeTurn {
                    events: vec![ChatEvent::Finish],
                    delay: Duration::ZERO,
                    fail: false,
                }
            } else {
                turns.remove(0)
            }
        };
        Box::pin(async move {
            tokio::time::sleep(turn.delay).await;
            if turn.fail {
                return Err(ChatError::Api {
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            for event in turn.events {
                let _ = events.send(event);
            }
            Ok(())
        })
    }
}

struct Rig {
    recognizer: Arc<ScriptedRecognition>,
    chat: Arc<FakeChat>,
    spoken: Arc<Mutex<Vec<String>>>,
    voices: Arc<Mutex<Vec<Option<String>>>>,
    playing: Arc<AtomicBool>,
    handle: jarvis_voice::CoordinatorHandle,
}

/// Wire a coordinator from fakes and spawn its run loop. The script is
/// queued before the run loop starts the recognizer, so the coordinator's
/// own `start()` consumes it.
fn build_rig(hold_playback: bool, script: Vec<RecognitionEvent>) -> Rig {
    init_tracing();
    let settings = VoiceSettings {
        silence_window_ms: 80,
        ..Default::default()
    };

    let recognizer = Arc::new(ScriptedRecognition::new());
    recognizer.push_script(script);
    let chat = Arc::new(FakeChat::default());
    let spoken = Arc::new(Mutex::new(Vec::new()));
    let playing = Arc::new(AtomicBool::new(false));

    let voices = Arc::new(Mutex::new(Vec::new()));
    let tts = RecordingTts {
        spoken: Arc::clone(&spoken),
        voices: Arc::clone(&voices),
    };
    let sink_playing = Arc::clone(&playing);
    let output = Arc::new(
        SpeechOutputQueue::new(Arc::new(tts), move || {
            Ok(Box::new(FakeSink {
                playing: sink_playing,
                hold: hold_playback,
            }) as Box<dyn AudioSink>)
        })
        .unwrap(),
    );

    let (coordinator, handle) = VoiceInteractionCoordinator::new(CoordinatorParts {
        settings,
        recognizer: recognizer.clone() as Arc<dyn RecognitionBackend>,
        chat: chat.clone() as Arc<dyn ChatBackend>,
        output,
        energy_source: Arc::new(NoMicSource),
    });
    tokio::spawn(coordinator.run());

    Rig {
        recognizer,
        chat,
        spoken,
        voices,
        playing,
        handle,
    }
}

fn final_results(text: &str) -> RecognitionEvent {
    RecognitionEvent::Results {
        segments: vec![TranscriptSegment::finalized(text)],
    }
}

async fn wait_for(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wake_ask_answer_happy_path() {
    let rig = build_rig(false, vec![final_results("jarvis activate")]);
    rig.chat.push_turn(
        vec![
            ChatEvent::TextDelta {
                text_delta: "The weather ".to_string(),
            },
            ChatEvent::TextDelta {
                text_delta: "is sunny.".to_string(),
            },
            ChatEvent::Sources {
                sources: vec![Source {
                    title: "Weather".to_string(),
                    url: "https://example.com/weather".to_string(),
                    snippet: String::new(),
                    source: "Test".to_string(),
                    favicon: None,
                }],
            },
            ChatEvent::Finish,
        ],
        Duration::from_millis(10),
    );

    let spoken = Arc::clone(&rig.spoken);
    assert!(
        wait_for(2000, || spoken.lock().unwrap().iter().any(|s| s == GREETING)).await,
        "greeting was never spoken"
    );

    rig.recognizer.send(final_results("what's the weather"));

    let spoken = Arc::clone(&rig.spoken);
    assert!(
        wait_for(3000, || spoken
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == "The weather is sunny."))
        .await,
        "reply was never spoken"
    );

    let transcript = rig.handle.transcript();
    let messages = transcript.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "what's the weather");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "The weather is sunny.");
    assert_eq!(rig.handle.last_sources().len(), 1);

    let state = rig.handle.state();
    assert!(wait_for(2000, || *state.borrow() == AssistantState::Listening).await);

    // The request carried the full history.
    let requests = rig.chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 1);
    assert!(!requests[0].deep_search);

    rig.handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn barge_in_interrupts_playback() {
    let rig = build_rig(true, vec![final_results("jarvis activate")]);

    let state = rig.handle.state();
    assert!(
        wait_for(2000, || *state.borrow() == AssistantState::Speaking).await,
        "greeting playback never started"
    );
    assert!(rig.playing.load(Ordering::SeqCst));

    // The user talks over the assistant.
    rig.recognizer.send(RecognitionEvent::Results {
        segments: vec![TranscriptSegment::interim("wait stop")],
    });

    let state = rig.handle.state();
    assert!(
        wait_for(2000, || *state.borrow() == AssistantState::Listening).await,
        "barge-in did not return to listening"
    );
    let playing = Arc::clone(&rig.playing);
    assert!(wait_for(2000, || !playing.load(Ordering::SeqCst)).await);

    rig.handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sleep_mid_response_discards_late_reply() {
    let rig = build_rig(false, vec![final_results("jarvis activate")]);
    rig.chat.push_turn(
        vec![
            ChatEvent::TextDelta {
                text_delta: "A very late answer.".to_string(),
            },
            ChatEvent::Finish,
        ],
        Duration::from_millis(500),
    );

    let spoken = Arc::clone(&rig.spoken);
    assert!(wait_for(2000, || spoken.lock().unwrap().iter().any(|s| s == GREETING)).await);

    rig.recognizer.send(final_results("tell me a story"));
    let state = rig.handle.state();
    assert!(
        wait_for(2000, || *state.borrow() == AssistantState::Processing).await,
        "turn never started"
    );

    rig.recognizer.send(final_results("jarvis go to sleep"));

    let spoken = Arc::clone(&rig.spoken);
    assert!(wait_for(2000, || spoken.lock().unwrap().iter().any(|s| s == FAREWELL)).await);

    // Give the aborted turn time to have fired, then check nothing leaked.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let messages = rig.handle.transcript().lock().unwrap().clone();
    assert_eq!(messages.len(), 1, "late reply must not reach the transcript");
    assert_eq!(messages[0].role, Role::User);
    assert!(!rig
        .spoken
        .lock()
        .unwrap()
        .iter()
        .any(|s| s.contains("late answer")));

    let state = rig.handle.state();
    assert!(wait_for(2000, || *state.borrow() == AssistantState::Idle).await);

    rig.handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_turn_speaks_apology() {
    let rig = build_rig(false, vec![final_results("jarvis activate")]);
    rig.chat.push_failure();

    let spoken = Arc::clone(&rig.spoken);
    assert!(wait_for(2000, || spoken.lock().unwrap().iter().any(|s| s == GREETING)).await);

    rig.recognizer.send(final_results("break please"));

    let spoken = Arc::clone(&rig.spoken);
    assert!(
        wait_for(3000, || spoken.lock().unwrap().iter().any(|s| s == ERROR_REPLY)).await,
        "apology was never spoken"
    );
    let messages = rig.handle.transcript().lock().unwrap().clone();
    assert_eq!(messages.last().unwrap().content, ERROR_REPLY);

    rig.handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn muted_turn_stays_silent_but_records() {
    let rig = build_rig(false, Vec::new());
    rig.chat.push_turn(
        vec![
            ChatEvent::TextDelta {
                text_delta: "Quiet answer.".to_string(),
            },
            ChatEvent::Finish,
        ],
        Duration::ZERO,
    );

    rig.handle.set_muted(true);
    rig.handle.submit_text("typed question");

    let transcript = rig.handle.transcript();
    assert!(
        wait_for(3000, || transcript.lock().unwrap().len() == 2).await,
        "reply never reached the transcript"
    );
    let messages = transcript.lock().unwrap().clone();
    assert_eq!(messages[1].content, "Quiet answer.");
    assert!(rig.spoken.lock().unwrap().is_empty(), "muted assistant spoke");

    rig.handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn voice_inventory_drives_selection() {
    let rig = build_rig(false, Vec::new());
    rig.chat.push_turn(
        vec![
            ChatEvent::TextDelta {
                text_delta: "Done.".to_string(),
            },
            ChatEvent::Finish,
        ],
        Duration::ZERO,
    );

    rig.handle.set_voice_inventory(vec![
        VoiceInfo::new("Samantha", "en-US"),
        VoiceInfo::new("Microsoft Ravi - English (India)", "en-IN"),
    ]);
    rig.handle.submit_text("pick a voice");

    let spoken = Arc::clone(&rig.spoken);
    assert!(
        wait_for(3000, || spoken.lock().unwrap().iter().any(|s| s == "Done.")).await,
        "reply was never spoken"
    );
    let voices = rig.voices.lock().unwrap().clone();
    assert_eq!(
        voices.last().cloned().flatten().as_deref(),
        Some("Microsoft Ravi - English (India)")
    );

    rig.handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn session_listens_again_after_stop_then_start() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognition::new());
    recognizer.push_script(vec![final_results("jarvis activate")]);

    let (session, mut events) = SpeechInputSession::new(
        recognizer.clone() as Arc<dyn RecognitionBackend>,
        SessionConfig::default(),
        Arc::new(|| false),
    );
    session.start().unwrap();
    session.stop();
    session.start().unwrap();

    let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("session stayed dead after stop() then start()")
        .expect("channel closed");
    assert_eq!(event, jarvis_voice::SessionEvent::Wake);
    assert!(session.is_activated());
}

#[tokio::test(start_paused = true)]
async fn recognition_restart_backs_off_then_gives_up() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognition::new());
    // Initial start plus three restarts, all ending immediately.
    for _ in 0..4 {
        recognizer.push_script(vec![RecognitionEvent::Ended]);
    }

    let config = SessionConfig {
        max_restarts: 3,
        ..Default::default()
    };
    let (session, mut events) = SpeechInputSession::new(
        recognizer.clone() as Arc<dyn RecognitionBackend>,
        config,
        Arc::new(|| false),
    );
    session.start().unwrap();

    for attempt in 1..=3u32 {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(event, jarvis_voice::SessionEvent::Recovering { attempt });
    }
    let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(event, jarvis_voice::SessionEvent::Unavailable);
    assert_eq!(recognizer.remaining_scripts(), 0);
}

#[tokio::test(start_paused = true)]
async fn successful_results_reset_restart_counter() {
    init_tracing();
    let recognizer = Arc::new(ScriptedRecognition::new());
    recognizer.push_script(vec![RecognitionEvent::Ended]);
    recognizer.push_script(vec![final_results("jarvis activate"), RecognitionEvent::Ended]);
    recognizer.push_script(vec![RecognitionEvent::Ended]);

    let config = SessionConfig {
        max_restarts: 2,
        ..Default::default()
    };
    let (session, mut events) = SpeechInputSession::new(
        recognizer.clone() as Arc<dyn RecognitionBackend>,
        config,
        Arc::new(|| false),
    );
    session.start().unwrap();

    let mut recovering = 0;
    let mut woke = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(60), events.recv()).await
    {
        match event {
            jarvis_voice::SessionEvent::Recovering { .. } => recovering += 1,
            jarvis_voice::SessionEvent::Wake => woke = true,
            jarvis_voice::SessionEvent::Unavailable => break,
            _ => {}
        }
        if recovering >= 4 {
            break;
        }
    }
    assert!(woke, "wake phrase was lost across restarts");
    // Counter reset after the successful batch: attempts 1, then 1 and 2
    // again before exhaustion.
    assert_eq!(recovering, 3);
}

/// Exercises the real audio stack; needs output and input devices.
#[test]
#[ignore]
fn real_audio_stack_initializes() {
    use jarvis_voice::{MicEnergySource, NullTts, RodioSink};

    let queue = SpeechOutputQueue::new(Arc::new(NullTts), || {
        Ok(Box::new(RodioSink::new()?) as Box<dyn AudioSink>)
    });
    assert!(queue.is_ok());

    let source = MicEnergySource::default();
    let _ = source.open();
}
