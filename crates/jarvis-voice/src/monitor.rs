//! **VoiceActivityMonitor** — mic energy watcher for barge-in while speaking.
//!
//! Polls an energy source at a fixed interval and signals when the level
//! crosses the threshold, debounced so sustained speech produces one signal
//! per debounce window rather than one per poll. Runs only while the
//! assistant is speaking; the coordinator starts and stops it around
//! playback.

use crate::audio::{AudioChunk, CaptureConfig, MicCapture};
use crate::error::{VoiceError, VoiceResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Callback invoked when voice activity is detected during playback.
pub type OnVoiceActivity = Arc<dyn Fn() + Send + Sync>;

/// A live stream of energy readings on a 0-255 scale.
/// `sample` returns the latest reading, or `None` when the stream is gone.
pub trait EnergyStream: Send {
    fn sample(&mut self) -> Option<f32>;
}

/// Opens energy streams. Mic-backed in production, scripted in tests.
pub trait EnergySource: Send + Sync {
    fn open(&self) -> VoiceResult<Box<dyn EnergyStream>>;
}

/// Mic-backed energy source. Each `open` starts a capture thread that keeps
/// the latest chunk energy in a shared cell; dropping the stream stops it.
pub struct MicEnergySource {
    config: CaptureConfig,
}

impl MicEnergySource {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl Default for MicEnergySource {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

struct MicEnergyStream {
    latest: Arc<AtomicU32>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl EnergyStream for MicEnergyStream {
    fn sample(&mut self) -> Option<f32> {
        if !self.alive.load(Ordering::SeqCst) {
            return None;
        }
        Some(f32::from_bits(self.latest.load(Ordering::SeqCst)))
    }
}

impl Drop for MicEnergyStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl EnergySource for MicEnergySource {
    fn open(&self) -> VoiceResult<Box<dyn EnergyStream>> {
        let latest = Arc::new(AtomicU32::new(0f32.to_bits()));
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let capture = MicCapture::new(self.config.clone())?;

        let thread_latest = Arc::clone(&latest);
        let thread_stop = Arc::clone(&stop);
        let thread_alive = Arc::clone(&alive);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<()>>();

        // The cpal stream must live on the thread that owns it.
        std::thread::spawn(move || {
            let _stream = match capture.start_capture(chunk_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    thread_alive.store(false, Ordering::SeqCst);
                    return;
                }
            };
            while !thread_stop.load(Ordering::SeqCst) {
                match chunk_rx.blocking_recv() {
                    Some(chunk) => {
                        thread_latest.store(chunk.energy().to_bits(), Ordering::SeqCst);
                    }
                    None => break,
                }
            }
            thread_alive.store(false, Ordering::SeqCst);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(MicEnergyStream {
                latest,
                stop,
                alive,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::AudioDevice(
                "energy capture thread died during startup".to_string(),
            )),
        }
    }
}

/// Monitor tuning, typically derived from `VoiceSettings`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Energy level (0-255) above which speech is assumed.
    pub energy_threshold: f32,
    /// Sampling interval.
    pub poll_interval: Duration,
    /// Minimum gap between two signals.
    pub debounce: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 30.0,
            poll_interval: Duration::from_millis(50),
            debounce: Duration::from_millis(300),
        }
    }
}

/// Watches mic energy while output plays and signals barge-in.
pub struct VoiceActivityMonitor {
    config: MonitorConfig,
    source: Arc<dyn EnergySource>,
    on_voice_activity: OnVoiceActivity,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceActivityMonitor {
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn EnergySource>,
        on_voice_activity: OnVoiceActivity,
    ) -> Self {
        Self {
            config,
            source,
            on_voice_activity,
            task: Mutex::new(None),
        }
    }

    /// Begin sampling. A source that fails to open leaves barge-in detection
    /// unavailable but is not fatal. Idempotent while a task is live.
    pub fn start_monitoring(&self) {
        let mut task = match self.task.lock() {
            Ok(t) => t,
            Err(_) => return,
        };
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }

        let mut stream = match self.source.open() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("VoiceActivityMonitor: mic unavailable, barge-in disabled: {}", e);
                return;
            }
        };

        let config = self.config.clone();
        let callback = Arc::clone(&self.on_voice_activity);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            let mut last_signal: Option<Instant> = None;
            loop {
                ticker.tick().await;
                let energy = match stream.sample() {
                    Some(e) => e,
                    None => {
                        info!("VoiceActivityMonitor: energy stream ended");
                        break;
                    }
                };
                if energy > config.energy_threshold {
                    let now = Instant::now();
                    let debounced = last_signal
                        .map(|t| now.duration_since(t) < config.debounce)
                        .unwrap_or(false);
                    if !debounced {
                        last_signal = Some(now);
                        callback();
                    }
                }
            }
        }));
        info!("VoiceActivityMonitor: started");
    }

    /// Stop sampling and release the mic. Idempotent.
    pub fn stop_monitoring(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                info!("VoiceActivityMonitor: stopped");
            }
        }
    }

    /// Whether a sampling task is currently live.
    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Drop for VoiceActivityMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Replays a fixed energy script, then ends the stream.
    struct ScriptedEnergySource {
        script: Vec<f32>,
    }

    struct ScriptedEnergyStream {
        script: std::vec::IntoIter<f32>,
    }

    impl EnergyStream for ScriptedEnergyStream {
        fn sample(&mut self) -> Option<f32> {
            self.script.next()
        }
    }

    impl EnergySource for ScriptedEnergySource {
        fn open(&self) -> VoiceResult<Box<dyn EnergyStream>> {
            Ok(Box::new(ScriptedEnergyStream {
                script: self.script.clone().into_iter(),
            }))
        }
    }

    struct FailingSource;

    impl EnergySource for FailingSource {
        fn open(&self) -> VoiceResult<Box<dyn EnergyStream>> {
            Err(VoiceError::AudioDevice("no mic".to_string()))
        }
    }

    fn counting_callback() -> (OnVoiceActivity, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let cb: OnVoiceActivity = Arc::new(move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
        });
        (cb, count)
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_speech_is_debounced() {
        // 20 samples at 50ms: activity spans t=0..950ms; debounce 300ms
        // allows signals at 0, 300, 600, 900.
        let source = Arc::new(ScriptedEnergySource {
            script: vec![100.0; 20],
        });
        let (cb, count) = counting_callback();
        let monitor = VoiceActivityMonitor::new(MonitorConfig::default(), source, cb);
        monitor.start_monitoring();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_audio_never_signals() {
        let source = Arc::new(ScriptedEnergySource {
            script: vec![5.0; 20],
        });
        let (cb, count) = counting_callback();
        let monitor = VoiceActivityMonitor::new(MonitorConfig::default(), source, cb);
        monitor.start_monitoring();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_failure_is_tolerated() {
        let (cb, count) = counting_callback();
        let monitor =
            VoiceActivityMonitor::new(MonitorConfig::default(), Arc::new(FailingSource), cb);
        monitor.start_monitoring();
        assert!(!monitor.is_monitoring());
        monitor.stop_monitoring();
        monitor.stop_monitoring();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
