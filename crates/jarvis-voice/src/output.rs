//! **SpeechOutputQueue** — FIFO speech playback with cancellation.
//!
//! Requests are synthesized and played one at a time on a dedicated worker
//! thread (audio sinks are thread-bound). Each request that reaches playback
//! fires exactly one `on_start` and then exactly one of `on_end` / `on_error`.
//! `cancel_all` clears pending requests and silences the in-flight one; a
//! cancelled request never fires `on_end`.

use crate::error::{VoiceError, VoiceResult};
use crate::synthesis::{AudioSink, TtsBackend};
use crate::voices::VoiceInfo;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback fired on playback start/end.
pub type SpeechCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback fired when synthesis or playback fails.
pub type SpeechErrorCallback = Arc<dyn Fn(&VoiceError) + Send + Sync>;

/// Per-request prosody and callbacks.
#[derive(Clone, Default)]
pub struct SpeakOptions {
    /// Speech rate multiplier; `None` uses the engine default.
    pub rate: Option<f32>,
    /// Speech pitch multiplier; `None` uses the engine default.
    pub pitch: Option<f32>,
    /// Explicit voice; `None` lets the backend pick.
    pub voice: Option<VoiceInfo>,
    pub on_start: Option<SpeechCallback>,
    pub on_end: Option<SpeechCallback>,
    pub on_error: Option<SpeechErrorCallback>,
}

struct OutputRequest {
    text: String,
    options: SpeakOptions,
    /// Cancellation epoch at enqueue time. A bumped epoch invalidates the
    /// request wherever it is in its lifecycle.
    epoch: u64,
}

struct QueueShared {
    queue: Mutex<VecDeque<OutputRequest>>,
    wakeup: Condvar,
    epoch: AtomicU64,
    shutdown: AtomicBool,
    playing: AtomicBool,
}

/// How often the worker checks for playback completion or cancellation.
const PLAYBACK_POLL: Duration = Duration::from_millis(25);

/// FIFO speech queue. Clone-cheap via `Arc` internals is not provided; share
/// the queue itself behind an `Arc` when multiple owners need it.
pub struct SpeechOutputQueue {
    shared: Arc<QueueShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SpeechOutputQueue {
    /// Start the worker thread. `sink_factory` runs on the worker so the sink
    /// never crosses threads; a factory failure fails construction.
    pub fn new<F>(tts: Arc<dyn TtsBackend>, sink_factory: F) -> VoiceResult<Self>
    where
        F: FnOnce() -> VoiceResult<Box<dyn AudioSink>> + Send + 'static,
    {
        let shared = Arc::new(QueueShared {
            queue: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            playing: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<()>>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || {
            let sink = match sink_factory() {
                Ok(sink) => {
                    let _ = ready_tx.send(Ok(()));
                    sink
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            run_worker(worker_shared, tts, sink);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(VoiceError::Playback(
                    "output worker died during startup".to_string(),
                ));
            }
        }

        info!("SpeechOutputQueue: worker started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Append a request. Returns an error only if the queue is shut down.
    pub fn enqueue(&self, text: impl Into<String>, options: SpeakOptions) -> VoiceResult<()> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(VoiceError::ChannelSend("output queue closed".to_string()));
        }
        let request = OutputRequest {
            text: text.into(),
            options,
            epoch: self.shared.epoch.load(Ordering::SeqCst),
        };
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.push_back(request);
        }
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Drop all pending requests and silence the in-flight one. Idempotent.
    pub fn cancel_all(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queue) = self.shared.queue.lock() {
            let dropped = queue.len();
            queue.clear();
            if dropped > 0 {
                debug!("SpeechOutputQueue: dropped {} pending requests", dropped);
            }
        }
        self.shared.wakeup.notify_one();
    }

    /// Whether a request is currently being played.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Number of requests waiting behind the in-flight one.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Drop for SpeechOutputQueue {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: Arc<QueueShared>, tts: Arc<dyn TtsBackend>, sink: Box<dyn AudioSink>) {
    loop {
        let request = {
            let mut queue = match shared.queue.lock() {
                Ok(q) => q,
                Err(_) => return,
            };
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(request) = queue.pop_front() {
                    break request;
                }
                queue = match shared.wakeup.wait(queue) {
                    Ok(q) => q,
                    Err(_) => return,
                };
            }
        };

        // Cancelled while queued: neither callback fires.
        if request.epoch != shared.epoch.load(Ordering::SeqCst) {
            continue;
        }

        let rate = request.options.rate.unwrap_or(1.0);
        let pitch = request.options.pitch.unwrap_or(1.0);
        let bytes = match tts.synthesize(
            &request.text,
            request.options.voice.as_ref(),
            rate,
            pitch,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("SpeechOutputQueue: synthesis failed: {}", e);
                if let Some(ref cb) = request.options.on_error {
                    cb(&e);
                }
                continue;
            }
        };

        // Cancelled while synthesizing: the request never reached playback,
        // so neither callback fires.
        if request.epoch != shared.epoch.load(Ordering::SeqCst) {
            debug!("SpeechOutputQueue: request cancelled during synthesis");
            continue;
        }

        if let Some(ref cb) = request.options.on_start {
            cb();
        }
        shared.playing.store(true, Ordering::SeqCst);

        if let Err(e) = sink.play(&bytes) {
            shared.playing.store(false, Ordering::SeqCst);
            warn!("SpeechOutputQueue: playback failed: {}", e);
            if let Some(ref cb) = request.options.on_error {
                cb(&e);
            }
            continue;
        }

        let mut cancelled = false;
        while sink.is_playing() {
            if request.epoch != shared.epoch.load(Ordering::SeqCst)
                || shared.shutdown.load(Ordering::SeqCst)
            {
                sink.stop();
                cancelled = true;
                break;
            }
            thread::sleep(PLAYBACK_POLL);
        }
        shared.playing.store(false, Ordering::SeqCst);

        if !cancelled {
            if let Some(ref cb) = request.options.on_end {
                cb();
            }
        } else {
            debug!("SpeechOutputQueue: request cancelled mid-playback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::NullTts;
    use std::sync::atomic::AtomicU64 as TestCounter;
    use std::time::Instant;

    /// Sink that "plays" each buffer for a fixed duration.
    struct TimedSink {
        play_for: Duration,
        play_until: Mutex<Option<Instant>>,
        stops: Arc<TestCounter>,
    }

    impl TimedSink {
        fn factory(
            play_for: Duration,
            stops: Arc<TestCounter>,
        ) -> impl FnOnce() -> VoiceResult<Box<dyn AudioSink>> + Send + 'static {
            move || {
                Ok(Box::new(TimedSink {
                    play_for,
                    play_until: Mutex::new(None),
                    stops,
                }) as Box<dyn AudioSink>)
            }
        }
    }

    impl AudioSink for TimedSink {
        fn play(&self, _bytes: &[u8]) -> VoiceResult<()> {
            *self.play_until.lock().unwrap() = Some(Instant::now() + self.play_for);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            *self.play_until.lock().unwrap() = None;
        }

        fn is_playing(&self) -> bool {
            self.play_until
                .lock()
                .unwrap()
                .map(|t| Instant::now() < t)
                .unwrap_or(false)
        }
    }

    /// TTS that signals entry and then blocks long enough to be cancelled.
    struct SlowTts {
        entered: Arc<AtomicBool>,
    }

    impl TtsBackend for SlowTts {
        fn synthesize(
            &self,
            _text: &str,
            _voice: Option<&VoiceInfo>,
            _rate: f32,
            _pitch: f32,
        ) -> VoiceResult<Vec<u8>> {
            self.entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            Ok(Vec::new())
        }
    }

    struct FailingTts;

    impl TtsBackend for FailingTts {
        fn synthesize(
            &self,
            _text: &str,
            _voice: Option<&VoiceInfo>,
            _rate: f32,
            _pitch: f32,
        ) -> VoiceResult<Vec<u8>> {
            Err(VoiceError::Synthesis("boom".to_string()))
        }
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, label: &str) -> SpeechCallback {
        let log = Arc::clone(log);
        let label = label.to_string();
        Arc::new(move || log.lock().unwrap().push(label.clone()))
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn plays_in_order_with_paired_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(TestCounter::new(0));
        let queue = SpeechOutputQueue::new(
            Arc::new(NullTts),
            TimedSink::factory(Duration::from_millis(10), stops),
        )
        .unwrap();

        for label in ["a", "b"] {
            queue
                .enqueue(
                    format!("say {}", label),
                    SpeakOptions {
                        on_start: Some(record(&log, &format!("start {}", label))),
                        on_end: Some(record(&log, &format!("end {}", label))),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        assert!(wait_until(2000, || log.lock().unwrap().len() == 4));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "end a", "start b", "end b"]
        );
    }

    #[test]
    fn cancel_all_suppresses_on_end_and_drops_pending() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(TestCounter::new(0));
        let queue = SpeechOutputQueue::new(
            Arc::new(NullTts),
            TimedSink::factory(Duration::from_secs(30), Arc::clone(&stops)),
        )
        .unwrap();

        queue
            .enqueue(
                "long speech",
                SpeakOptions {
                    on_start: Some(record(&log, "start long")),
                    on_end: Some(record(&log, "end long")),
                    ..Default::default()
                },
            )
            .unwrap();
        queue
            .enqueue(
                "queued",
                SpeakOptions {
                    on_start: Some(record(&log, "start queued")),
                    on_end: Some(record(&log, "end queued")),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(wait_until(2000, || queue.is_playing()));
        queue.cancel_all();
        queue.cancel_all(); // idempotent

        assert!(wait_until(2000, || stops.load(Ordering::SeqCst) >= 1));
        assert!(wait_until(2000, || !queue.is_playing()));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*log.lock().unwrap(), vec!["start long"]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn cancel_during_synthesis_fires_no_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entered = Arc::new(AtomicBool::new(false));
        let stops = Arc::new(TestCounter::new(0));
        let queue = SpeechOutputQueue::new(
            Arc::new(SlowTts {
                entered: Arc::clone(&entered),
            }),
            TimedSink::factory(Duration::from_millis(5), stops),
        )
        .unwrap();

        queue
            .enqueue(
                "slow speech",
                SpeakOptions {
                    on_start: Some(record(&log, "start")),
                    on_end: Some(record(&log, "end")),
                    ..Default::default()
                },
            )
            .unwrap();

        // Cancel while the worker is inside synthesize().
        assert!(wait_until(2000, || entered.load(Ordering::SeqCst)));
        queue.cancel_all();

        thread::sleep(Duration::from_millis(500));
        assert!(log.lock().unwrap().is_empty());
        assert!(!queue.is_playing());
    }

    #[test]
    fn synthesis_error_fires_on_error_and_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(TestCounter::new(0));
        let queue = SpeechOutputQueue::new(
            Arc::new(FailingTts),
            TimedSink::factory(Duration::from_millis(5), stops),
        )
        .unwrap();

        let errors = Arc::new(TestCounter::new(0));
        let errors_cb = Arc::clone(&errors);
        queue
            .enqueue(
                "will fail",
                SpeakOptions {
                    on_start: Some(record(&log, "start")),
                    on_end: Some(record(&log, "end")),
                    on_error: Some(Arc::new(move |_| {
                        errors_cb.fetch_add(1, Ordering::SeqCst);
                    })),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(wait_until(2000, || errors.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(50));
        // Neither start nor end fired for the failed request.
        assert!(log.lock().unwrap().is_empty());
    }
}
