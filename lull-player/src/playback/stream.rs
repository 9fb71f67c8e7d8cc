//! Segment stream player
//!
//! Turns an ordered playlist of item locators (each pointing at an index file
//! of chunk names) into gapless audio scheduled on an [`OutputEngine`].
//!
//! # Buffering loop
//!
//! While there is pending work a background task repeats:
//! 1. Stop if both the playlist and the chunk list are empty.
//! 2. If more than `lookahead_secs` of audio is already scheduled past "now",
//!    wait `idle_backoff` and retry.
//! 3. If the chunk list is empty, pop the next item and load its index.
//!    A failed index load is logged, the item counts as drained, and the loop
//!    keeps going so later items are not starved.
//! 4. Fetch and decode the next chunk, schedule it at `max(cursor, now)` and
//!    advance the cursor by its duration.
//! 5. Wait `tick_interval` (or until woken by `play()`).
//!
//! # Timeline
//!
//! The cursor is the next free scheduling instant on the engine clock. It only
//! moves forward, except on `clear()` where it resets to "now". Every
//! cleared or stopped player bumps a generation counter; results of fetches
//! that were already in flight are dropped if their generation is stale.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lull_common::events::{PlayerEvent, PlayerState, Subscribers, Subscription, SubscriptionId};
use lull_common::volume::{validate_duration, validate_volume};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::audio::{DecodedBuffer, EngineState, GainNode, OutputEngine, SourceNode};
use crate::config::StreamConfig;
use crate::content::{index_base_path, parse_index, ContentStore};
use crate::error::{Error, Result};
use crate::playback::fader;

/// Resolves when a fade reached its target; errors if the fade was cancelled
pub type FadeDone = oneshot::Receiver<()>;

/// Streams a playlist of chunked items into gapless scheduled audio
#[derive(Clone)]
pub struct SegmentStreamPlayer {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    engine: Arc<dyn OutputEngine>,
    content: Arc<dyn ContentStore>,
    output: Arc<dyn GainNode>,
    config: StreamConfig,
    state: Mutex<StreamState>,
    events: Subscribers<PlayerEvent>,
    /// Wakes a sleeping buffering loop for an immediate attempt
    wake: Notify,
}

struct InFlightUnit {
    node: Box<dyn SourceNode>,
    /// Last chunk of its item
    final_chunk: bool,
    /// Discarded by clear()/stop(); its end must not drain an item
    cancelled: bool,
}

struct StreamState {
    lifecycle: PlayerState,
    /// play() called and not paused/stopped since
    active: bool,
    playlist: VecDeque<String>,
    chunks: VecDeque<String>,
    item_count: usize,
    cursor: f64,
    in_flight: HashMap<u64, InFlightUnit>,
    next_unit_id: u64,
    first_unit_started: bool,
    volume: f32,
    generation: u64,
    buffering: Option<JoinHandle<()>>,
    fade: Option<JoinHandle<()>>,
    fade_id: u64,
}

/// Work picked by one buffering iteration
enum Work {
    LoadIndex(String),
    NextChunk,
}

impl StreamState {
    fn has_pending_work(&self) -> bool {
        !self.playlist.is_empty() || !self.chunks.is_empty()
    }
}

impl SegmentStreamPlayer {
    /// Create a player bound to its own engine
    pub fn new(
        engine: Arc<dyn OutputEngine>,
        content: Arc<dyn ContentStore>,
        config: StreamConfig,
    ) -> Result<Self> {
        let output = engine.create_gain()?;
        output.set_gain(1.0);
        let cursor = engine.current_time();

        Ok(Self {
            inner: Arc::new(PlayerInner {
                engine,
                content,
                output,
                config,
                state: Mutex::new(StreamState {
                    lifecycle: PlayerState::Idle,
                    active: false,
                    playlist: VecDeque::new(),
                    chunks: VecDeque::new(),
                    item_count: 0,
                    cursor,
                    in_flight: HashMap::new(),
                    next_unit_id: 0,
                    first_unit_started: false,
                    volume: 1.0,
                    generation: 0,
                    buffering: None,
                    fade: None,
                    fade_id: 0,
                }),
                events: Subscribers::new(),
                wake: Notify::new(),
            }),
        })
    }

    pub fn subscribe(&self) -> Subscription<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Append an item (index locator) to the pending playlist
    pub fn add_item(&self, locator: impl Into<String>) -> Result<()> {
        let locator = locator.into();
        let mut st = self.inner.lock();
        if st.lifecycle == PlayerState::Stopped {
            return Err(Error::PlayerStopped);
        }

        debug!(locator = %locator, "Queued item");
        st.playlist.push_back(locator);
        st.item_count += 1;

        if st.active {
            if st.lifecycle == PlayerState::Idle {
                self.inner.set_state(&mut st, PlayerState::Buffering);
            }
            self.inner.ensure_buffering(&mut st);
        }
        Ok(())
    }

    /// Drop all pending work and every in-flight unit; reset the cursor to now
    pub fn clear(&self) {
        let mut st = self.inner.lock();
        if let Some(handle) = st.buffering.take() {
            handle.abort();
        }
        st.generation += 1;
        st.playlist.clear();
        st.chunks.clear();
        st.item_count = 0;
        st.first_unit_started = false;
        for unit in st.in_flight.values_mut() {
            unit.cancelled = true;
            unit.node.stop();
        }
        st.cursor = self.inner.engine.current_time();
        debug!(cursor = st.cursor, stopped_units = st.in_flight.len(), "Cleared playlist");
    }

    /// Start or resume playback
    pub async fn play(&self) -> Result<()> {
        if self.inner.lock().lifecycle == PlayerState::Stopped {
            return Err(Error::PlayerStopped);
        }

        if self.inner.engine.state() == EngineState::Suspended {
            self.inner.engine.resume().await?;
            let volume = self.inner.lock().volume;
            self.inner.output.set_gain(volume);
        }

        let mut st = self.inner.lock();
        if st.lifecycle == PlayerState::Stopped {
            return Err(Error::PlayerStopped);
        }
        st.active = true;

        let next = if !st.in_flight.is_empty() {
            PlayerState::Playing
        } else if st.has_pending_work() {
            PlayerState::Buffering
        } else {
            PlayerState::Idle
        };
        self.inner.set_state(&mut st, next);

        if st.has_pending_work() {
            self.inner.ensure_buffering(&mut st);
            self.inner.wake.notify_waiters();
        }
        Ok(())
    }

    /// Cancel any fade and suspend the engine
    pub async fn pause(&self) -> Result<()> {
        {
            let mut st = self.inner.lock();
            if st.lifecycle == PlayerState::Stopped {
                return Err(Error::PlayerStopped);
            }
            if let Some(fade) = st.fade.take() {
                fade.abort();
            }
            st.active = false;
        }

        if self.inner.engine.state() == EngineState::Running {
            self.inner.engine.suspend().await?;
        }

        let mut st = self.inner.lock();
        if st.lifecycle != PlayerState::Stopped {
            self.inner.set_state(&mut st, PlayerState::Paused);
        }
        Ok(())
    }

    /// Stop for good: cancel buffering and fades, close the engine.
    ///
    /// Calling it again finishes an engine close that was interrupted.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut st = self.inner.lock();
            if st.lifecycle == PlayerState::Stopped {
                if self.inner.engine.state() == EngineState::Closed {
                    return Ok(());
                }
            } else {
                self.inner.teardown(&mut st);
            }
        }

        if self.inner.engine.state() != EngineState::Closed {
            self.inner.engine.close().await?;
        }
        debug!("Stream player stopped");
        Ok(())
    }

    /// Set gain immediately, cancelling any running fade
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = validate_volume(volume)?;
        let mut st = self.inner.lock();
        if let Some(fade) = st.fade.take() {
            fade.abort();
        }
        st.volume = volume;
        self.inner.output.set_gain(volume);
        Ok(())
    }

    /// Linearly fade gain to `volume` over `duration_secs` of engine time.
    ///
    /// A fade already running is cancelled (its [`FadeDone`] errors). The
    /// returned receiver resolves exactly once, after gain snapped to `volume`.
    pub fn fade_to(&self, volume: f32, duration_secs: f64) -> Result<FadeDone> {
        let volume = validate_volume(volume)?;
        let duration = validate_duration(duration_secs)?;
        let (done_tx, done_rx) = oneshot::channel();

        let mut st = self.inner.lock();
        if let Some(fade) = st.fade.take() {
            fade.abort();
        }
        st.fade_id += 1;
        let fade_id = st.fade_id;

        let inner = Arc::clone(&self.inner);
        st.fade = Some(tokio::spawn(async move {
            fader::ramp(
                inner.engine.as_ref(),
                inner.output.as_ref(),
                volume,
                duration,
                inner.config.fade_step(),
            )
            .await;
            inner.finish_fade(fade_id, volume);
            let _ = done_tx.send(());
        }));
        trace!(volume, duration, fade_id, "Fade started");
        Ok(done_rx)
    }

    /// Items not yet fully drained (pending plus the one streaming)
    pub fn item_count(&self) -> usize {
        self.inner.lock().item_count
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().lifecycle
    }

    /// Configured volume (the last set_volume or completed fade target)
    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    /// Next free scheduling instant on the engine clock
    pub fn cursor(&self) -> f64 {
        self.inner.lock().cursor
    }
}

impl PlayerInner {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, st: &mut StreamState, state: PlayerState) {
        if st.lifecycle != state {
            debug!(from = %st.lifecycle, to = %state, "Stream player state");
            st.lifecycle = state;
            self.events.emit(PlayerEvent::StateChanged { state });
        }
    }

    /// Cancel all work and enter Stopped
    fn teardown(&self, st: &mut StreamState) {
        if let Some(handle) = st.buffering.take() {
            handle.abort();
        }
        if let Some(fade) = st.fade.take() {
            fade.abort();
        }
        st.generation += 1;
        st.active = false;
        st.playlist.clear();
        st.chunks.clear();
        st.item_count = 0;
        for unit in st.in_flight.values_mut() {
            unit.cancelled = true;
            unit.node.stop();
        }
        self.set_state(st, PlayerState::Stopped);
    }

    fn ensure_buffering(self: &Arc<Self>, st: &mut StreamState) {
        if st
            .buffering
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }
        let inner = Arc::clone(self);
        let generation = st.generation;
        st.buffering = Some(tokio::spawn(async move {
            inner.buffering_loop(generation).await;
        }));
    }

    async fn buffering_loop(self: Arc<Self>, generation: u64) {
        while let Some(delay) = self.buffer_once(generation).await {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// One buffering iteration. Returns the delay before the next one, or
    /// `None` when the loop should end.
    async fn buffer_once(self: &Arc<Self>, generation: u64) -> Option<Duration> {
        let tick = self.config.tick_interval();

        let work = {
            let mut st = self.lock();
            if st.generation != generation || st.lifecycle == PlayerState::Stopped {
                return None;
            }
            if !st.has_pending_work() {
                trace!("Buffering idle");
                st.buffering = None;
                return None;
            }
            let now = self.engine.current_time();
            if st.cursor - now > self.config.lookahead_secs {
                return Some(self.config.idle_backoff());
            }
            match st.chunks.is_empty() {
                true => Work::LoadIndex(st.playlist.pop_front()?),
                false => Work::NextChunk,
            }
        };

        if let Work::LoadIndex(locator) = work {
            match self.load_index(&locator).await {
                Ok(chunks) if !chunks.is_empty() => {
                    let mut st = self.lock();
                    if st.generation != generation {
                        return None;
                    }
                    debug!(locator = %locator, chunks = chunks.len(), "Loaded index");
                    st.chunks = chunks.into();
                }
                Ok(_) => {
                    warn!(locator = %locator, "Index lists no chunks; skipping item");
                    self.item_drained(generation);
                    return Some(tick);
                }
                Err(e) => {
                    warn!(locator = %locator, error = %e, "Failed to load index; skipping item");
                    self.item_drained(generation);
                    return Some(tick);
                }
            }
        }

        let (chunk, final_chunk) = {
            let mut st = self.lock();
            if st.generation != generation {
                return None;
            }
            let Some(chunk) = st.chunks.pop_front() else {
                return Some(tick);
            };
            let final_chunk = st.chunks.is_empty();
            (chunk, final_chunk)
        };

        match self.fetch_chunk(&chunk).await {
            Ok(buffer) => {
                if let Err(e) = self.schedule_unit(generation, &chunk, buffer, final_chunk) {
                    warn!(chunk = %chunk, error = %e, "Failed to schedule chunk");
                    if final_chunk {
                        self.item_drained(generation);
                    }
                }
            }
            Err(e) => {
                warn!(chunk = %chunk, error = %e, "Failed to fetch chunk");
                if final_chunk {
                    self.item_drained(generation);
                }
            }
        }

        Some(tick)
    }

    async fn load_index(&self, locator: &str) -> Result<Vec<String>> {
        let text = self.content.fetch_text(locator).await?;
        Ok(parse_index(index_base_path(locator), &text))
    }

    async fn fetch_chunk(&self, chunk: &str) -> Result<DecodedBuffer> {
        let bytes = self.content.fetch_bytes(chunk).await?;
        self.engine.decode(bytes).await
    }

    fn schedule_unit(
        self: &Arc<Self>,
        generation: u64,
        chunk: &str,
        buffer: DecodedBuffer,
        final_chunk: bool,
    ) -> Result<()> {
        let mut st = self.lock();
        if st.generation != generation || st.lifecycle == PlayerState::Stopped {
            debug!(chunk, "Dropping chunk fetched before clear/stop");
            return Ok(());
        }

        let now = self.engine.current_time();
        let start_at = st.cursor.max(now);
        let duration = buffer.duration();
        let source = self.engine.schedule(&self.output, buffer, start_at)?;

        st.cursor = start_at + duration;
        let id = st.next_unit_id;
        st.next_unit_id += 1;
        st.in_flight.insert(
            id,
            InFlightUnit {
                node: source.node,
                final_chunk,
                cancelled: false,
            },
        );
        debug!(chunk, start_at, duration, final_chunk, "Scheduled chunk");

        // A fresh timeline has its cursor at or before now, so this unit starts immediately
        if !st.first_unit_started {
            st.first_unit_started = true;
            self.events.emit(PlayerEvent::ItemTransition {
                remaining: st.item_count,
            });
        }
        if st.active && matches!(st.lifecycle, PlayerState::Idle | PlayerState::Buffering) {
            self.set_state(&mut st, PlayerState::Playing);
        }
        drop(st);

        let inner = Arc::clone(self);
        let ended = source.ended;
        tokio::spawn(async move {
            let _ = ended.await;
            inner.on_unit_ended(id);
        });
        Ok(())
    }

    fn on_unit_ended(&self, id: u64) {
        let mut st = self.lock();
        let Some(unit) = st.in_flight.remove(&id) else {
            return;
        };

        if unit.final_chunk && !unit.cancelled {
            st.item_count = st.item_count.saturating_sub(1);
            trace!(remaining = st.item_count, "Item drained");
            self.events.emit(PlayerEvent::ItemTransition {
                remaining: st.item_count,
            });
        }

        if st.in_flight.is_empty() {
            self.settle_state(&mut st);
        }
    }

    /// An item finished without reaching the engine (bad index, failed final chunk)
    fn item_drained(&self, generation: u64) {
        let mut st = self.lock();
        if st.generation != generation {
            return;
        }
        st.item_count = st.item_count.saturating_sub(1);
        self.events.emit(PlayerEvent::ItemTransition {
            remaining: st.item_count,
        });
        if st.in_flight.is_empty() {
            self.settle_state(&mut st);
        }
    }

    /// Nothing is in flight: Buffering if work remains, Idle otherwise
    fn settle_state(&self, st: &mut StreamState) {
        if matches!(st.lifecycle, PlayerState::Paused | PlayerState::Stopped) || !st.active {
            return;
        }
        let next = if st.has_pending_work() {
            PlayerState::Buffering
        } else {
            PlayerState::Idle
        };
        self.set_state(st, next);
    }

    fn finish_fade(&self, fade_id: u64, volume: f32) {
        let mut st = self.lock();
        if st.fade_id == fade_id {
            st.fade = None;
            st.volume = volume;
        }
    }
}
