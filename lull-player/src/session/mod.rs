//! Sound session
//!
//! Loops one named sound forever by feeding its own [`SegmentStreamPlayer`]
//! with segments picked from the sound's [`SegmentGraph`].
//!
//! # State machine
//!
//! ```text
//! Idle --play--> Buffering --player Playing--> Playing
//! Playing --pause--> Pausing --fade done--> Paused --play--> Playing
//! any non-terminal --stop--> Stopping --fade done--> Stopped (terminal)
//! ```
//!
//! `immediate` pause/stop skip the fade. A stopped session must be replaced,
//! never reused.
//!
//! # Background tasks
//!
//! - metadata loader: fetches the catalog with capped exponential backoff
//! - player listener: reacts to player state changes and item transitions
//! - silence timer: gap before the next segment of a non-contiguous sound
//! - transition: waits for a pause/stop fade before touching the transport

pub mod segments;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use lull_common::events::{
    PlayerEvent, PlayerState, SessionEvent, SessionState, Subscribers, Subscription,
    SubscriptionId,
};
use lull_common::retry::Backoff;
use lull_common::volume::{perceptual_gain, validate_duration, validate_volume};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audio::OutputEngine;
use crate::config::{SessionConfig, StreamConfig};
use crate::content::{Catalog, ContentStore};
use crate::error::{Error, Result};
use crate::playback::stream::FadeDone;
use crate::playback::SegmentStreamPlayer;

pub use segments::{AccessTier, Bridge, Segment, SegmentGraph};

/// One looping sound with its own stream player
#[derive(Clone)]
pub struct SoundSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    sound_id: String,
    content: Arc<dyn ContentStore>,
    player: SegmentStreamPlayer,
    state: Mutex<SessionShared>,
    events: Subscribers<SessionEvent>,
}

struct SessionShared {
    lifecycle: SessionState,
    config: SessionConfig,
    catalog: Option<Catalog>,
    graph: Option<segments::SegmentGraph>,
    /// Last queued segment
    previous: Option<Segment>,
    rng: StdRng,
    /// Fade in once the player first reports Playing after play()
    fade_in_pending: bool,
    volume: f32,
    master_volume: f32,
    /// Effective gain last sent to the player
    gain_target: f32,
    /// End of the running silence gap
    silence_until: Option<Instant>,
    /// Rest of a silence gap frozen by pause
    silence_held: Option<Duration>,
    metadata_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
    silence_task: Option<JoinHandle<()>>,
    transition_task: Option<JoinHandle<()>>,
}

impl SoundSession {
    /// Create a session and start loading its metadata.
    ///
    /// `seed` fixes segment choice and silence lengths; `None` seeds from entropy.
    pub fn new(
        sound_id: impl Into<String>,
        config: SessionConfig,
        stream: StreamConfig,
        engine: Arc<dyn OutputEngine>,
        content: Arc<dyn ContentStore>,
        seed: Option<u64>,
    ) -> Result<Self> {
        let sound_id = sound_id.into();
        let player = SegmentStreamPlayer::new(engine, Arc::clone(&content), stream)?;
        let player_events = player.subscribe();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let inner = Arc::new(SessionInner {
            sound_id,
            content,
            player,
            state: Mutex::new(SessionShared {
                lifecycle: SessionState::Idle,
                config,
                catalog: None,
                graph: None,
                previous: None,
                rng,
                fade_in_pending: false,
                volume: 1.0,
                master_volume: 1.0,
                gain_target: 1.0,
                silence_until: None,
                silence_held: None,
                metadata_task: None,
                listener_task: None,
                silence_task: None,
                transition_task: None,
            }),
            events: Subscribers::new(),
        });

        let listener = tokio::spawn(listen_player(Arc::downgrade(&inner), player_events));
        let metadata = tokio::spawn(load_metadata(Arc::downgrade(&inner)));
        {
            let mut s = inner.lock();
            s.listener_task = Some(listener);
            s.metadata_task = Some(metadata);
        }

        info!(sound_id = %inner.sound_id, "Created sound session");
        Ok(Self { inner })
    }

    pub fn sound_id(&self) -> &str {
        &self.inner.sound_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().lifecycle
    }

    /// Metadata loaded and segment graph built
    pub fn is_loaded(&self) -> bool {
        self.inner.lock().graph.is_some()
    }

    pub fn player(&self) -> &SegmentStreamPlayer {
        &self.inner.player
    }

    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Start or resume looping, fading in once audio is playing
    pub async fn play(&self) -> Result<()> {
        {
            let mut s = self.inner.lock();
            match s.lifecycle {
                SessionState::Stopping | SessionState::Stopped => {
                    return Err(Error::SessionStopped(self.inner.sound_id.clone()));
                }
                SessionState::Playing | SessionState::Buffering => return Ok(()),
                _ => {}
            }

            if let Some(task) = s.transition_task.take() {
                task.abort();
            }
            s.fade_in_pending = true;
            self.inner.player.set_volume(0.0)?;

            if s.graph.is_none() {
                debug!(sound_id = %self.inner.sound_id, "Metadata pending; playback starts once loaded");
                self.inner.set_state(&mut s, SessionState::Buffering);
                return Ok(());
            }
            if let Some(rest) = s.silence_held.take() {
                self.inner.start_silence(&mut s, rest);
            } else if !s.silence_pending() {
                self.inner.fill_queue(&mut s)?;
            }
        }

        self.inner.player.play().await?;
        self.inner.sync_with_player();
        Ok(())
    }

    /// Pause; unless `immediate`, fade out first and pause the transport after
    pub async fn pause(&self, immediate: bool) -> Result<()> {
        let fade = {
            let mut s = self.inner.lock();
            match s.lifecycle {
                SessionState::Stopping | SessionState::Stopped => {
                    return Err(Error::SessionStopped(self.inner.sound_id.clone()));
                }
                SessionState::Paused => return Ok(()),
                SessionState::Pausing if !immediate => return Ok(()),
                _ => {}
            }

            s.fade_in_pending = false;
            if let Some(task) = s.transition_task.take() {
                task.abort();
            }
            self.inner.hold_silence(&mut s);

            if immediate || s.lifecycle == SessionState::Idle {
                self.inner.set_state(&mut s, SessionState::Paused);
                None
            } else {
                self.inner.set_state(&mut s, SessionState::Pausing);
                Some(self.inner.player.fade_to(0.0, s.config.fade_out_secs)?)
            }
        };

        match fade {
            None => self.inner.player.pause().await,
            Some(done) => {
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    if done.await.is_ok() {
                        inner.finish_pause().await;
                    }
                });
                self.inner.lock().transition_task = Some(task);
                Ok(())
            }
        }
    }

    /// Stop for good; unless `immediate`, fade out first
    pub async fn stop(&self, immediate: bool) -> Result<()> {
        let fade: Option<FadeDone> = {
            let mut s = self.inner.lock();
            match s.lifecycle {
                SessionState::Stopped => return Ok(()),
                SessionState::Stopping if !immediate => return Ok(()),
                _ => {}
            }

            s.fade_in_pending = false;
            for task in [
                s.metadata_task.take(),
                s.silence_task.take(),
                s.transition_task.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }

            let audible = self.inner.player.state() != PlayerState::Paused
                && matches!(
                    s.lifecycle,
                    SessionState::Buffering | SessionState::Playing | SessionState::Pausing
                );
            self.inner.set_state(&mut s, SessionState::Stopping);

            if immediate || !audible {
                None
            } else {
                match self.inner.player.fade_to(0.0, s.config.fade_out_secs) {
                    Ok(done) => Some(done),
                    Err(e) => {
                        warn!(sound_id = %self.inner.sound_id, error = %e, "Fade-out failed; stopping immediately");
                        None
                    }
                }
            }
        };

        match fade {
            None => self.inner.finish_stop().await,
            Some(done) => {
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    let _ = done.await;
                    inner.finish_stop().await;
                });
                self.inner.lock().transition_task = Some(task);
            }
        }
        Ok(())
    }

    /// Mark Paused without starting or touching the transport
    pub fn mark_paused(&self) -> Result<()> {
        let mut s = self.inner.lock();
        if s.lifecycle.is_ending() {
            return Err(Error::SessionStopped(self.inner.sound_id.clone()));
        }
        s.fade_in_pending = false;
        self.inner.hold_silence(&mut s);
        self.inner.set_state(&mut s, SessionState::Paused);
        Ok(())
    }

    /// Own volume multiplier
    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    pub fn master_volume(&self) -> f32 {
        self.inner.lock().master_volume
    }

    /// Gain pushed to the player: `(master * own)^2`
    pub fn effective_volume(&self) -> f32 {
        let s = self.inner.lock();
        perceptual_gain(s.master_volume, s.volume)
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = validate_volume(volume)?;
        let mut s = self.inner.lock();
        s.volume = volume;
        self.inner.push_volume(&mut s)
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        let volume = validate_volume(volume)?;
        let mut s = self.inner.lock();
        s.master_volume = volume;
        self.inner.push_volume(&mut s)
    }

    pub fn set_fade_in_secs(&self, secs: f64) -> Result<()> {
        let secs = validate_duration(secs)?;
        self.inner.lock().config.fade_in_secs = secs;
        Ok(())
    }

    pub fn set_fade_out_secs(&self, secs: f64) -> Result<()> {
        let secs = validate_duration(secs)?;
        self.inner.lock().config.fade_out_secs = secs;
        Ok(())
    }

    /// Switch access tier; clears the playlist so selection restarts
    pub fn set_premium(&self, premium: bool) -> Result<()> {
        self.inner.reconfigure(|config| config.premium = premium)
    }

    /// Switch bitrate; clears the playlist so segments are fetched at the new rate
    pub fn set_bitrate(&self, bitrate_kbps: u32) -> Result<()> {
        if bitrate_kbps == 0 {
            return Err(Error::Config("bitrate must be non-zero".to_string()));
        }
        self.inner.reconfigure(|config| config.bitrate_kbps = bitrate_kbps)
    }

    pub fn config(&self) -> SessionConfig {
        self.inner.lock().config.clone()
    }
}

impl SessionShared {
    fn silence_pending(&self) -> bool {
        self.silence_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionShared> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, s: &mut SessionShared, state: SessionState) {
        if s.lifecycle == state {
            return;
        }
        debug!(sound_id = %self.sound_id, from = %s.lifecycle, to = %state, "Session state");
        s.lifecycle = state;
        self.events.emit(SessionEvent::StateChanged {
            sound_id: self.sound_id.clone(),
            state,
        });
    }

    fn graph_for(&self, catalog: &Catalog, bitrate_kbps: u32) -> Result<SegmentGraph> {
        let entry = catalog.sound(&self.sound_id)?;
        let base_path = catalog.sound_base_path(&self.sound_id, bitrate_kbps);
        Ok(SegmentGraph::build(&self.sound_id, entry, &base_path))
    }

    async fn fetch_catalog(&self, path: &str) -> Result<Catalog> {
        let catalog = Catalog::load(self.content.as_ref(), path).await?;
        catalog.sound(&self.sound_id)?;
        Ok(catalog)
    }

    /// Install loaded metadata; returns true when a pending play() should start the player
    fn install_catalog(&self, catalog: Catalog) -> bool {
        let mut s = self.lock();
        s.metadata_task = None;
        if s.lifecycle.is_ending() {
            return false;
        }

        let graph = match self.graph_for(&catalog, s.config.bitrate_kbps) {
            Ok(graph) => graph,
            Err(e) => {
                error!(sound_id = %self.sound_id, error = %e, "Loaded catalog is unusable");
                return false;
            }
        };
        info!(
            sound_id = %self.sound_id,
            segments = graph.segments().len(),
            bridges = graph.bridge_count(),
            contiguous = graph.is_contiguous(),
            "Sound metadata loaded"
        );
        s.graph = Some(graph);
        s.catalog = Some(catalog);

        if s.lifecycle != SessionState::Buffering {
            return false;
        }
        self.fill_queue(&mut s).is_ok()
    }

    /// Keep two items queued for contiguous sounds, one otherwise
    fn fill_queue(&self, s: &mut SessionShared) -> Result<()> {
        let Some(graph) = s.graph.as_ref() else {
            return Ok(());
        };
        let target = if graph.is_contiguous() { 2 } else { 1 };

        while self.player.item_count() < target {
            let segment = match graph.select_next(s.previous.as_ref(), s.config.premium, &mut s.rng) {
                Ok(segment) => segment,
                Err(e) => {
                    error!(sound_id = %self.sound_id, error = %e, "Segment selection failed");
                    return Err(e);
                }
            };
            self.player.add_item(segment.index_locator())?;
            debug!(sound_id = %self.sound_id, segment = %segment.name, bridge = segment.is_bridge(), "Queued segment");
            s.previous = Some(segment);
        }
        Ok(())
    }

    fn reconfigure(&self, update: impl FnOnce(&mut SessionConfig)) -> Result<()> {
        let mut s = self.lock();
        update(&mut s.config);
        if s.lifecycle.is_ending() {
            return Ok(());
        }

        if let Some(catalog) = s.catalog.as_ref() {
            let graph = self.graph_for(catalog, s.config.bitrate_kbps)?;
            s.graph = Some(graph);
        }
        s.previous = None;
        if let Some(task) = s.silence_task.take() {
            task.abort();
        }
        s.silence_until = None;
        s.silence_held = None;
        self.player.clear();
        debug!(
            sound_id = %self.sound_id,
            premium = s.config.premium,
            bitrate_kbps = s.config.bitrate_kbps,
            "Session reconfigured"
        );

        if matches!(s.lifecycle, SessionState::Playing | SessionState::Buffering) {
            self.fill_queue(&mut s)?;
        }
        Ok(())
    }

    fn push_volume(&self, s: &mut SessionShared) -> Result<()> {
        if s.lifecycle != SessionState::Playing || s.fade_in_pending {
            return Ok(());
        }
        let target = perceptual_gain(s.master_volume, s.volume);
        self.player.fade_to(target, s.config.volume_fade_secs)?;
        s.gain_target = target;
        Ok(())
    }

    /// Enter Playing, then fade in or catch up with volume changes made meanwhile
    fn enter_playing(&self, s: &mut SessionShared) {
        self.set_state(s, SessionState::Playing);
        let target = perceptual_gain(s.master_volume, s.volume);

        if s.fade_in_pending {
            s.fade_in_pending = false;
            match self.player.fade_to(target, s.config.fade_in_secs) {
                Ok(_) => debug!(sound_id = %self.sound_id, target, "Fading in"),
                Err(e) => warn!(sound_id = %self.sound_id, error = %e, "Fade-in failed"),
            }
            s.gain_target = target;
        } else if s.gain_target != target {
            match self.player.fade_to(target, s.config.volume_fade_secs) {
                Ok(_) => debug!(sound_id = %self.sound_id, target, "Applying deferred volume"),
                Err(e) => warn!(sound_id = %self.sound_id, error = %e, "Volume fade failed"),
            }
            s.gain_target = target;
        }
    }

    /// Align session state with the player right after player.play()
    fn sync_with_player(&self) {
        let mut s = self.lock();
        if s.lifecycle.is_ending() || s.lifecycle == SessionState::Pausing {
            return;
        }
        let player = self.player.state();
        if player == PlayerState::Playing || (player == PlayerState::Idle && s.silence_pending()) {
            self.enter_playing(&mut s);
        } else {
            self.set_state(&mut s, SessionState::Buffering);
        }
    }

    fn on_player_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::StateChanged {
                state: PlayerState::Playing,
            } => {
                let mut s = self.lock();
                if matches!(s.lifecycle, SessionState::Buffering | SessionState::Playing) {
                    self.enter_playing(&mut s);
                }
            }
            PlayerEvent::StateChanged {
                state: PlayerState::Buffering,
            } => {
                let mut s = self.lock();
                if s.lifecycle == SessionState::Playing {
                    self.set_state(&mut s, SessionState::Buffering);
                }
            }
            PlayerEvent::StateChanged { .. } => {}
            PlayerEvent::ItemTransition { .. } => self.on_item_transition(),
        }
    }

    fn on_item_transition(self: &Arc<Self>) {
        let mut s = self.lock();
        if s.lifecycle.is_ending() {
            return;
        }
        let Some(contiguous) = s.graph.as_ref().map(SegmentGraph::is_contiguous) else {
            return;
        };

        if contiguous {
            let _ = self.fill_queue(&mut s);
        } else if self.player.item_count() == 0 && !s.silence_pending() && s.silence_held.is_none() {
            self.schedule_silence(&mut s);
        }
    }

    fn schedule_silence(self: &Arc<Self>, s: &mut SessionShared) {
        let max_silence = s.graph.as_ref().map_or(0.0, SegmentGraph::max_silence);
        let secs = segments::silence_duration(s.config.min_silence_secs, max_silence, &mut s.rng);
        debug!(sound_id = %self.sound_id, secs, "Scheduling silence");
        self.start_silence(s, Duration::from_secs_f64(secs));
    }

    /// Queue the next segment once `gap` has passed
    fn start_silence(self: &Arc<Self>, s: &mut SessionShared, gap: Duration) {
        if let Some(task) = s.silence_task.take() {
            task.abort();
        }
        if matches!(s.lifecycle, SessionState::Pausing | SessionState::Paused) {
            s.silence_held = Some(gap);
            return;
        }
        let until = Instant::now() + gap;
        s.silence_until = Some(until);

        let session = Arc::downgrade(self);
        s.silence_task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            let Some(inner) = session.upgrade() else {
                return;
            };
            let mut s = inner.lock();
            s.silence_task = None;
            s.silence_until = None;
            if !s.lifecycle.is_ending() {
                let _ = inner.fill_queue(&mut s);
            }
        }));
    }

    /// Freeze a running silence gap; play() resumes it with the time left
    fn hold_silence(&self, s: &mut SessionShared) {
        if !s.silence_pending() {
            return;
        }
        if let Some(task) = s.silence_task.take() {
            task.abort();
        }
        let rest = s
            .silence_until
            .take()
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(Instant::now()));
        debug!(sound_id = %self.sound_id, rest_ms = rest.as_millis() as u64, "Holding silence");
        s.silence_held = Some(rest);
    }

    async fn finish_pause(&self) {
        if let Err(e) = self.player.pause().await {
            warn!(sound_id = %self.sound_id, error = %e, "Failed to pause player");
        }
        let mut s = self.lock();
        if s.lifecycle == SessionState::Pausing {
            self.set_state(&mut s, SessionState::Paused);
        }
    }

    async fn finish_stop(&self) {
        if let Err(e) = self.player.stop().await {
            warn!(sound_id = %self.sound_id, error = %e, "Failed to stop player");
        }
        let mut s = self.lock();
        if s.lifecycle == SessionState::Stopped {
            return;
        }
        for task in [
            s.listener_task.take(),
            s.silence_task.take(),
            s.metadata_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.set_state(&mut s, SessionState::Stopped);
        info!(sound_id = %self.sound_id, "Sound session stopped");
    }
}

async fn listen_player(session: Weak<SessionInner>, mut events: Subscription<PlayerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };
        inner.on_player_event(event);
    }
}

/// Fetch the catalog until it succeeds, backing off between attempts
async fn load_metadata(session: Weak<SessionInner>) {
    let mut backoff: Option<Backoff> = None;

    loop {
        let Some(inner) = session.upgrade() else {
            return;
        };
        let (path, initial, max) = {
            let s = inner.lock();
            (
                s.config.catalog_path.clone(),
                s.config.retry_initial(),
                s.config.retry_max(),
            )
        };

        match inner.fetch_catalog(&path).await {
            Ok(catalog) => {
                if inner.install_catalog(catalog) {
                    if let Err(e) = inner.player.play().await {
                        warn!(sound_id = %inner.sound_id, error = %e, "Failed to start player");
                    }
                    inner.sync_with_player();
                }
                return;
            }
            Err(e) => {
                let backoff = backoff.get_or_insert_with(|| Backoff::new(initial, max));
                let delay = backoff.next_delay();
                warn!(
                    sound_id = %inner.sound_id,
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Metadata load failed; retrying"
                );
                drop(inner);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
