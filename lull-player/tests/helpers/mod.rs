//! Shared test infrastructure for lull-player integration tests
//!
//! - MockEngine: output engine on tokio's (pausable) clock that records every
//!   scheduled unit and lifecycle call instead of producing sound
//! - MemoryContentStore: in-memory content store with scripted failures and a
//!   fetch log
//! - Builders for index files, chunks and catalog manifests
//!
//! Run timing tests with `#[tokio::test(start_paused = true)]` so virtual time
//! auto-advances and "seconds" of playback elapse instantly.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lull_player::audio::{
    DecodedBuffer, EngineFactory, EngineState, GainNode, OutputEngine, ScheduledSource, SourceNode,
};
use lull_player::content::ContentStore;
use lull_player::error::{Error, Result};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

/// Sample rate of mock-decoded buffers (kept low; nothing is rendered)
pub const MOCK_SAMPLE_RATE: u32 = 1000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lull_player=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run without advancing virtual time
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Advance virtual time by `secs`, running every timer that falls due
pub async fn advance(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    settle().await;
}

// ========================================
// Mock engine
// ========================================

struct ClockState {
    engine_state: EngineState,
    suspended_at: Option<Instant>,
    suspended_total: Duration,
}

/// Engine clock: tokio time since creation minus time spent suspended
pub struct MockClock {
    origin: Instant,
    state: Mutex<ClockState>,
}

impl MockClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ClockState {
                engine_state: EngineState::Running,
                suspended_at: None,
                suspended_total: Duration::ZERO,
            }),
        }
    }

    pub fn now(&self) -> f64 {
        let state = self.state.lock().unwrap();
        let frozen_at = state.suspended_at.unwrap_or_else(Instant::now);
        (frozen_at - self.origin)
            .saturating_sub(state.suspended_total)
            .as_secs_f64()
    }

    fn engine_state(&self) -> EngineState {
        self.state.lock().unwrap().engine_state
    }
}

pub struct MockGain {
    value: Mutex<f32>,
    history: Mutex<Vec<f32>>,
}

impl MockGain {
    /// Every value ever set, in order
    pub fn history(&self) -> Vec<f32> {
        self.history.lock().unwrap().clone()
    }
}

impl GainNode for MockGain {
    fn gain(&self) -> f32 {
        *self.value.lock().unwrap()
    }

    fn set_gain(&self, value: f32) {
        *self.value.lock().unwrap() = value;
        self.history.lock().unwrap().push(value);
    }
}

struct UnitSignal {
    stopped: AtomicBool,
    notify: Notify,
}

struct MockSource {
    signal: Arc<UnitSignal>,
}

impl SourceNode for MockSource {
    fn stop(&self) {
        self.signal.stopped.store(true, Ordering::SeqCst);
        self.signal.notify.notify_one();
    }
}

/// One schedule() call as seen by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledUnit {
    pub start_at: f64,
    pub duration: f64,
    /// Engine time when schedule() was called
    pub scheduled_at: f64,
}

#[derive(Default)]
struct EngineLog {
    scheduled: Vec<ScheduledUnit>,
    suspends: usize,
    resumes: usize,
    closes: usize,
    signals: Vec<Arc<UnitSignal>>,
}

pub struct MockEngine {
    clock: Arc<MockClock>,
    log: Mutex<EngineLog>,
    gains: Mutex<Vec<Arc<MockGain>>>,
    close_delay: Mutex<Duration>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Arc::new(MockClock::new()),
            log: Mutex::new(EngineLog::default()),
            gains: Mutex::new(Vec::new()),
            close_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Make close() take `delay` (virtual time) before the engine is closed
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }

    /// Engine clock in seconds
    pub fn clock_time(&self) -> f64 {
        self.clock.now()
    }

    pub fn scheduled(&self) -> Vec<ScheduledUnit> {
        self.log.lock().unwrap().scheduled.clone()
    }

    pub fn suspend_count(&self) -> usize {
        self.log.lock().unwrap().suspends
    }

    pub fn resume_count(&self) -> usize {
        self.log.lock().unwrap().resumes
    }

    pub fn close_count(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    /// Output gain node (the first one created)
    pub fn output(&self) -> Arc<MockGain> {
        Arc::clone(&self.gains.lock().unwrap()[0])
    }

    pub fn gain(&self) -> f32 {
        self.output().gain()
    }

    fn stop_all_units(&self) {
        for signal in self.log.lock().unwrap().signals.drain(..) {
            signal.stopped.store(true, Ordering::SeqCst);
            signal.notify.notify_one();
        }
    }
}

#[async_trait]
impl OutputEngine for MockEngine {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn state(&self) -> EngineState {
        self.clock.engine_state()
    }

    fn create_gain(&self) -> Result<Arc<dyn GainNode>> {
        let gain = Arc::new(MockGain {
            value: Mutex::new(1.0),
            history: Mutex::new(Vec::new()),
        });
        self.gains.lock().unwrap().push(Arc::clone(&gain));
        Ok(gain)
    }

    fn schedule(
        &self,
        _output: &Arc<dyn GainNode>,
        buffer: DecodedBuffer,
        start_at: f64,
    ) -> Result<ScheduledSource> {
        if self.state() == EngineState::Closed {
            return Err(Error::Engine("engine closed".to_string()));
        }

        let duration = buffer.duration();
        let signal = Arc::new(UnitSignal {
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
        });
        let scheduled_at = self.clock.now();
        {
            let mut log = self.log.lock().unwrap();
            log.scheduled.push(ScheduledUnit {
                start_at,
                duration,
                scheduled_at,
            });
            log.signals.push(Arc::clone(&signal));
        }

        let (ended_tx, ended_rx) = oneshot::channel();
        let clock = Arc::clone(&self.clock);
        let watch = Arc::clone(&signal);
        let end_at = start_at + duration;
        tokio::spawn(async move {
            loop {
                if watch.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let remaining = end_at - clock.now();
                if remaining <= 0.0 {
                    break;
                }
                let wait = match clock.engine_state() {
                    EngineState::Running => Duration::from_secs_f64(remaining),
                    _ => Duration::from_millis(50),
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = watch.notify.notified() => {}
                }
            }
            let _ = ended_tx.send(());
        });

        Ok(ScheduledSource {
            node: Box::new(MockSource { signal }),
            ended: ended_rx,
        })
    }

    /// Chunks are `chunk:<seconds>` markers; anything else fails to decode
    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedBuffer> {
        let text = String::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        let secs: f64 = text
            .strip_prefix("chunk:")
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::Decode(format!("not a mock chunk: {:?}", text)))?;
        Ok(DecodedBuffer::silent(secs, MOCK_SAMPLE_RATE, 1))
    }

    async fn suspend(&self) -> Result<()> {
        let changed = {
            let mut state = self.clock.state.lock().unwrap();
            let running = state.engine_state == EngineState::Running;
            if running {
                state.engine_state = EngineState::Suspended;
                state.suspended_at = Some(Instant::now());
            }
            running
        };
        if changed {
            self.log.lock().unwrap().suspends += 1;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let changed = {
            let mut state = self.clock.state.lock().unwrap();
            let suspended = state.engine_state == EngineState::Suspended;
            if suspended {
                state.engine_state = EngineState::Running;
                if let Some(at) = state.suspended_at.take() {
                    state.suspended_total += Instant::now() - at;
                }
            }
            suspended
        };
        if changed {
            self.log.lock().unwrap().resumes += 1;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let delay = *self.close_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.clock.state.lock().unwrap().engine_state = EngineState::Closed;
        self.log.lock().unwrap().closes += 1;
        self.stop_all_units();
        Ok(())
    }
}

/// Hands out fresh mock engines and remembers them for inspection
#[derive(Default)]
pub struct MockEngineFactory {
    engines: Mutex<Vec<Arc<MockEngine>>>,
}

impl MockEngineFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn engines(&self) -> Vec<Arc<MockEngine>> {
        self.engines.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.engines.lock().unwrap().len()
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self) -> Result<Arc<dyn OutputEngine>> {
        let engine = MockEngine::new();
        self.engines.lock().unwrap().push(Arc::clone(&engine));
        Ok(engine)
    }
}

// ========================================
// In-memory content store
// ========================================

#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub path: String,
    pub at: Instant,
}

#[derive(Default)]
pub struct MemoryContentStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Remaining scripted failures per path
    failures: Mutex<HashMap<String, usize>>,
    /// Sound entries of the generated catalog.json
    sounds: Mutex<serde_json::Map<String, serde_json::Value>>,
    latency: Mutex<Duration>,
    log: Mutex<Vec<FetchRecord>>,
}

impl MemoryContentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.to_string(), bytes.into());
    }

    /// Delay every fetch by `latency` (virtual time)
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Fail the next `count` fetches of `path` with HTTP 503
    pub fn fail_next(&self, path: &str, count: usize) {
        self.failures.lock().unwrap().insert(path.to_string(), count);
    }

    pub fn fetches(&self) -> Vec<FetchRecord> {
        self.log.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.path == path).count()
    }

    pub fn fetch_times(&self, path: &str) -> Vec<Instant> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .map(|r| r.at)
            .collect()
    }

    /// Folder names of every index fetched, in fetch order
    pub fn index_fetches(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.path.strip_suffix("/index.txt"))
            .filter_map(|folder| folder.rsplit('/').next())
            .map(str::to_string)
            .collect()
    }

    pub fn total_fetches(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Store an item: `{folder}/index.txt` plus one chunk per duration
    pub fn insert_item(&self, folder: &str, chunk_secs: &[f64]) -> String {
        let names: Vec<String> = (0..chunk_secs.len()).map(|i| format!("{:04}.mp3", i)).collect();
        for (name, secs) in names.iter().zip(chunk_secs) {
            self.insert(&format!("{}/{}", folder, name), chunk_bytes(*secs));
        }
        let locator = format!("{}/index.txt", folder);
        self.insert(&locator, names.join("\n"));
        locator
    }

    /// Add a sound to catalog.json; every segment (and bridge, for contiguous
    /// sounds) gets an item at 128 kbps made of `chunk_secs` chunks
    pub fn insert_sound(
        &self,
        sound_id: &str,
        max_silence: f64,
        segments: &[(&str, bool)],
        chunk_secs: &[f64],
    ) {
        let entries: Vec<serde_json::Value> = segments
            .iter()
            .map(|(name, premium)| serde_json::json!({ "name": name, "premium": premium }))
            .collect();
        let catalog = {
            let mut sounds = self.sounds.lock().unwrap();
            sounds.insert(
                sound_id.to_string(),
                serde_json::json!({ "maxSilence": max_silence, "segments": entries }),
            );
            serde_json::json!({ "basePath": "sounds", "sounds": sounds.clone() })
        };
        self.insert("catalog.json", catalog.to_string());

        let names: Vec<String> = segments.iter().map(|(name, _)| name.to_string()).collect();
        let mut folders = names.clone();
        if max_silence <= 0.0 {
            for from in &names {
                for to in &names {
                    folders.push(format!("{}{}", from, to));
                }
            }
        }
        for folder in folders {
            self.insert_item(&format!("sounds/{}/128/{}", sound_id, folder), chunk_secs);
        }
    }

    fn take_failure(&self, path: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Mock chunk payload lasting `secs`
pub fn chunk_bytes(secs: f64) -> Vec<u8> {
    format!("chunk:{}", secs).into_bytes()
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.log.lock().unwrap().push(FetchRecord {
            path: path.to_string(),
            at: Instant::now(),
        });
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure(path) {
            return Err(Error::HttpStatus {
                path: path.to_string(),
                status: 503,
            });
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::HttpStatus {
                path: path.to_string(),
                status: 404,
            })
    }

    async fn fetch_text(&self, path: &str) -> Result<String> {
        let bytes = self.fetch_bytes(path).await?;
        String::from_utf8(bytes).map_err(|e| Error::Fetch {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}
