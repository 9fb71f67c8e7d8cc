//! Sound session manager
//!
//! Owns the registry of live [`SoundSession`]s (one per sound identifier),
//! fans shared configuration out to them, mixes volumes and derives one
//! aggregate [`ManagerState`] from the set of session states.
//!
//! Sessions are single-use: a session that reaches `Stopped` is removed from
//! the registry, and the next `play_sound` for that sound builds a new one.
//! Per-sound volume survives that replacement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use lull_common::events::{
    KeyedSubscribers, ManagerEvent, ManagerState, SessionEvent, SessionState, SoundEvent,
    Subscribers, Subscription, SubscriptionId,
};
use lull_common::volume::{validate_duration, validate_volume};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::EngineFactory;
use crate::config::{LullConfig, SessionConfig, StreamConfig};
use crate::content::ContentStore;
use crate::error::{Error, Result};
use crate::session::SoundSession;

/// Registry and mixer for all playing sounds
#[derive(Clone)]
pub struct SoundSessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    engines: Arc<dyn EngineFactory>,
    content: Arc<dyn ContentStore>,
    stream_config: StreamConfig,
    state: Mutex<ManagerShared>,
    events: Subscribers<ManagerEvent>,
    sound_events: KeyedSubscribers<SoundEvent>,
}

struct SessionEntry {
    session: SoundSession,
    /// Distinguishes a replacement session from the one it replaced
    instance: Uuid,
    listener: JoinHandle<()>,
}

struct ManagerShared {
    session_config: SessionConfig,
    master_volume: f32,
    /// Remembered even while a sound has no live session
    sound_volumes: HashMap<String, f32>,
    sessions: HashMap<String, SessionEntry>,
    /// Last state notified per live sound
    sound_states: HashMap<String, SessionState>,
    aggregate: ManagerState,
    seed: Option<u64>,
    created: u64,
}

impl SoundSessionManager {
    pub fn new(
        engines: Arc<dyn EngineFactory>,
        content: Arc<dyn ContentStore>,
        config: LullConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                engines,
                content,
                stream_config: config.stream,
                state: Mutex::new(ManagerShared {
                    session_config: config.session,
                    master_volume: 1.0,
                    sound_volumes: HashMap::new(),
                    sessions: HashMap::new(),
                    sound_states: HashMap::new(),
                    aggregate: ManagerState::Idle,
                    seed: None,
                    created: 0,
                }),
                events: Subscribers::new(),
                sound_events: KeyedSubscribers::new(),
            }),
        }
    }

    /// Derive each new session's RNG seed from `seed` (reproducible segment choice)
    pub fn with_seed(self, seed: u64) -> Self {
        self.inner.lock().seed = Some(seed);
        self
    }

    /// Play `sound_id`, creating its session on first use.
    ///
    /// While the mix is paused the session is only marked Paused, so adding a
    /// sound does not resume everything else.
    pub async fn play_sound(&self, sound_id: &str) -> Result<()> {
        let (session, aggregate) = {
            let mut m = self.inner.lock();
            self.inner.refresh(&mut m);
            let live = m
                .sessions
                .get(sound_id)
                .map(|entry| entry.session.clone())
                .filter(|session| !session.state().is_ending());
            let session = match live {
                Some(session) => session,
                None => self.inner.create_session(&mut m, sound_id)?,
            };
            (session, m.aggregate)
        };

        let result = if aggregate == ManagerState::Paused {
            debug!(sound_id, "Mix is paused; marking sound paused");
            session.mark_paused()
        } else {
            session.play().await
        };
        self.refresh();
        result
    }

    /// Fade out and stop one sound; unknown sounds are ignored
    pub async fn stop_sound(&self, sound_id: &str) -> Result<()> {
        let Some(session) = self.session(sound_id) else {
            debug!(sound_id, "No live session to stop");
            return Ok(());
        };
        let result = session.stop(false).await;
        self.refresh();
        result
    }

    /// Resume every live session
    pub async fn resume(&self) -> Result<()> {
        for session in self.live_sessions() {
            if session.state().is_ending() {
                continue;
            }
            if let Err(e) = session.play().await {
                warn!(sound_id = %session.sound_id(), error = %e, "Failed to resume sound");
            }
        }
        self.refresh();
        Ok(())
    }

    /// Fade out and pause every live session that is not already stopping
    pub async fn pause(&self) -> Result<()> {
        for session in self.live_sessions() {
            if session.state().is_ending() {
                continue;
            }
            if let Err(e) = session.pause(false).await {
                warn!(sound_id = %session.sound_id(), error = %e, "Failed to pause sound");
            }
        }
        self.refresh();
        Ok(())
    }

    pub async fn stop_all(&self, immediate: bool) -> Result<()> {
        for session in self.live_sessions() {
            if let Err(e) = session.stop(immediate).await {
                warn!(sound_id = %session.sound_id(), error = %e, "Failed to stop sound");
            }
        }
        self.refresh();
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        let volume = validate_volume(volume)?;
        let mut m = self.inner.lock();
        m.master_volume = volume;
        for entry in m.sessions.values() {
            entry.session.set_master_volume(volume)?;
        }
        Ok(())
    }

    pub fn master_volume(&self) -> f32 {
        self.inner.lock().master_volume
    }

    /// Set one sound's own multiplier; remembered for future sessions of that sound
    pub fn set_sound_volume(&self, sound_id: &str, volume: f32) -> Result<()> {
        let volume = validate_volume(volume)?;
        let mut m = self.inner.lock();
        let previous = m.sound_volumes.insert(sound_id.to_string(), volume);

        if let Some(entry) = m.sessions.get(sound_id) {
            entry.session.set_volume(volume)?;
        }

        if previous.unwrap_or(1.0) != volume {
            self.inner.events.emit(ManagerEvent::SoundVolumeChanged {
                sound_id: sound_id.to_string(),
                volume,
                timestamp: Utc::now(),
            });
            self.inner
                .sound_events
                .emit(sound_id, SoundEvent::VolumeChanged { volume });
        }
        Ok(())
    }

    /// Remembered multiplier for `sound_id` (1.0 if never set)
    pub fn sound_volume(&self, sound_id: &str) -> f32 {
        self.inner
            .lock()
            .sound_volumes
            .get(sound_id)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn set_fade_in_secs(&self, secs: f64) -> Result<()> {
        let secs = validate_duration(secs)?;
        let mut m = self.inner.lock();
        m.session_config.fade_in_secs = secs;
        for entry in m.sessions.values() {
            entry.session.set_fade_in_secs(secs)?;
        }
        Ok(())
    }

    pub fn set_fade_out_secs(&self, secs: f64) -> Result<()> {
        let secs = validate_duration(secs)?;
        let mut m = self.inner.lock();
        m.session_config.fade_out_secs = secs;
        for entry in m.sessions.values() {
            entry.session.set_fade_out_secs(secs)?;
        }
        Ok(())
    }

    pub fn set_bitrate(&self, bitrate_kbps: u32) -> Result<()> {
        if bitrate_kbps == 0 {
            return Err(Error::Config("bitrate must be non-zero".to_string()));
        }
        let mut m = self.inner.lock();
        if m.session_config.bitrate_kbps == bitrate_kbps {
            return Ok(());
        }
        m.session_config.bitrate_kbps = bitrate_kbps;
        for entry in m.sessions.values() {
            entry.session.set_bitrate(bitrate_kbps)?;
        }
        info!(bitrate_kbps, "Bitrate changed");
        Ok(())
    }

    pub fn set_premium(&self, premium: bool) -> Result<()> {
        let mut m = self.inner.lock();
        if m.session_config.premium == premium {
            return Ok(());
        }
        m.session_config.premium = premium;
        for entry in m.sessions.values() {
            entry.session.set_premium(premium)?;
        }
        info!(premium, "Access tier changed");
        Ok(())
    }

    /// Aggregate state
    pub fn state(&self) -> ManagerState {
        self.inner.lock().aggregate
    }

    /// Current state of the live session for `sound_id`
    pub fn sound_state(&self, sound_id: &str) -> Option<SessionState> {
        self.session(sound_id).map(|session| session.state())
    }

    /// Sounds with a live session, sorted
    pub fn active_sounds(&self) -> Vec<String> {
        let mut sounds: Vec<String> = self.inner.lock().sessions.keys().cloned().collect();
        sounds.sort();
        sounds
    }

    pub fn session(&self, sound_id: &str) -> Option<SoundSession> {
        self.inner
            .lock()
            .sessions
            .get(sound_id)
            .map(|entry| entry.session.clone())
    }

    pub fn subscribe(&self) -> Subscription<ManagerEvent> {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Per-sound state and volume notifications for `sound_id`
    pub fn subscribe_sound(&self, sound_id: &str) -> Subscription<SoundEvent> {
        self.inner.sound_events.subscribe(sound_id)
    }

    pub fn unsubscribe_sound(&self, sound_id: &str, id: SubscriptionId) -> bool {
        self.inner.sound_events.unsubscribe(sound_id, id)
    }

    fn refresh(&self) {
        let mut m = self.inner.lock();
        self.inner.refresh(&mut m);
    }

    fn live_sessions(&self) -> Vec<SoundSession> {
        self.inner
            .lock()
            .sessions
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerShared> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create_session(self: &Arc<Self>, m: &mut ManagerShared, sound_id: &str) -> Result<SoundSession> {
        let engine = self.engines.create()?;
        let seed = m.seed.map(|seed| seed.wrapping_add(m.created));
        m.created += 1;

        let session = SoundSession::new(
            sound_id,
            m.session_config.clone(),
            self.stream_config.clone(),
            engine,
            Arc::clone(&self.content),
            seed,
        )?;
        session.set_master_volume(m.master_volume)?;
        session.set_volume(m.sound_volumes.get(sound_id).copied().unwrap_or(1.0))?;

        let instance = Uuid::new_v4();
        let listener = tokio::spawn(watch_session(
            Arc::downgrade(self),
            sound_id.to_string(),
            instance,
            session.subscribe(),
        ));

        let replaced = m.sessions.insert(
            sound_id.to_string(),
            SessionEntry {
                session: session.clone(),
                instance,
                listener,
            },
        );
        if let Some(old) = replaced {
            debug!(sound_id, state = %old.session.state(), "Replacing ending session");
            old.listener.abort();
        }
        info!(sound_id, %instance, "Registered sound session");
        Ok(session)
    }

    /// A session reported a change; its event only triggers a re-read of its
    /// current state, so late events never roll the recorded state back
    fn on_session_state(&self, sound_id: &str, instance: Uuid) {
        let mut m = self.lock();
        let state = match m.sessions.get(sound_id) {
            Some(entry) if entry.instance == instance => entry.session.state(),
            _ => return,
        };
        self.record_state(&mut m, sound_id, state);
        self.reconcile(&mut m);
    }

    /// Re-read every live session's state and reconcile the aggregate
    fn refresh(&self, m: &mut ManagerShared) {
        let states: Vec<(String, SessionState)> = m
            .sessions
            .iter()
            .map(|(id, entry)| (id.clone(), entry.session.state()))
            .collect();
        for (sound_id, state) in states {
            self.record_state(m, &sound_id, state);
        }
        self.reconcile(m);
    }

    fn record_state(&self, m: &mut ManagerShared, sound_id: &str, state: SessionState) {
        if state == SessionState::Stopped {
            m.sessions.remove(sound_id);
            debug!(sound_id, "Disposed stopped session");
        }
        self.notify_sound_state(m, sound_id, state);
    }

    fn notify_sound_state(&self, m: &mut ManagerShared, sound_id: &str, state: SessionState) {
        let previous = if state == SessionState::Stopped {
            m.sound_states.remove(sound_id)
        } else {
            m.sound_states.insert(sound_id.to_string(), state)
        };
        if previous == Some(state) {
            return;
        }

        self.events.emit(ManagerEvent::SoundStateChanged {
            sound_id: sound_id.to_string(),
            state,
            timestamp: Utc::now(),
        });
        self.sound_events
            .emit(sound_id, SoundEvent::StateChanged { state });
    }

    fn reconcile(&self, m: &mut ManagerShared) {
        let states = m.sessions.keys().map(|id| {
            m.sound_states
                .get(id)
                .copied()
                .unwrap_or(SessionState::Idle)
        });
        let next = ManagerState::reconcile(states);
        if next == m.aggregate {
            return;
        }

        info!(from = %m.aggregate, to = %next, "Aggregate state");
        m.aggregate = next;
        self.events.emit(ManagerEvent::StateChanged {
            state: next,
            timestamp: Utc::now(),
        });
    }
}

async fn watch_session(
    manager: Weak<ManagerInner>,
    sound_id: String,
    instance: Uuid,
    mut events: Subscription<SessionEvent>,
) {
    while let Some(SessionEvent::StateChanged { state, .. }) = events.recv().await {
        let Some(inner) = manager.upgrade() else {
            return;
        };
        inner.on_session_state(&sound_id, instance);
        if state == SessionState::Stopped {
            return;
        }
    }
}

