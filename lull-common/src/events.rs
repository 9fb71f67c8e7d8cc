//! Event types and subscriber lists for the Lull event system
//!
//! Every component (stream player, sound session, session manager) owns an
//! explicit [`Subscribers`] list. Listeners register with `subscribe()` and get
//! back a [`Subscription`] carrying an id (for `unsubscribe()`) and an unbounded
//! receiver. Emission never blocks the producer and never re-enters listener
//! code, so components can emit while holding their own state lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ========================================
// Lifecycle states
// ========================================

/// Segment stream player lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// Nothing scheduled and no pending work
    Idle,
    /// Waiting for the first unit of pending work to be scheduled
    Buffering,
    /// At least one unit is scheduled on the engine
    Playing,
    /// Engine suspended
    Paused,
    /// Engine closed; terminal
    Stopped,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Buffering => write!(f, "buffering"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Sound session state
///
/// `Stopped` is terminal: a stopped session must never be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Buffering,
    Playing,
    Pausing,
    Paused,
    Stopping,
    Stopped,
}

impl SessionState {
    /// True for `Stopping` and `Stopped`
    pub fn is_ending(&self) -> bool {
        matches!(self, SessionState::Stopping | SessionState::Stopped)
    }

    /// True when the session is heading to (or already in) a silent rest state
    pub fn is_quiescent(&self) -> bool {
        matches!(
            self,
            SessionState::Stopping
                | SessionState::Stopped
                | SessionState::Pausing
                | SessionState::Paused
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Buffering => "buffering",
            SessionState::Playing => "playing",
            SessionState::Pausing => "pausing",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Aggregate state of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Idle,
    Playing,
    Paused,
}

impl ManagerState {
    /// Reconcile a set of live session states into one aggregate state.
    ///
    /// - `Idle` iff every session is `Stopping` or `Stopped` (vacuously true when empty)
    /// - `Paused` iff every session is `Stopping`, `Pausing` or `Paused`
    /// - `Playing` otherwise
    pub fn reconcile<I>(states: I) -> ManagerState
    where
        I: IntoIterator<Item = SessionState>,
    {
        let mut all_ending = true;
        let mut all_quiescent = true;

        for state in states {
            all_ending &= state.is_ending();
            all_quiescent &= state.is_quiescent();
        }

        if all_ending {
            ManagerState::Idle
        } else if all_quiescent {
            ManagerState::Paused
        } else {
            ManagerState::Playing
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Idle => write!(f, "idle"),
            ManagerState::Playing => write!(f, "playing"),
            ManagerState::Paused => write!(f, "paused"),
        }
    }
}

// ========================================
// Event payloads
// ========================================

/// Events emitted by a segment stream player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Lifecycle state changed
    StateChanged { state: PlayerState },

    /// Playback moved across an item boundary (first unit of a fresh timeline
    /// scheduled, which starts it at once, or an item drained)
    ItemTransition {
        /// Items not yet fully drained after this transition
        remaining: usize,
    },
}

/// Events emitted by a sound session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    StateChanged { sound_id: String, state: SessionState },
}

/// Events emitted by the session manager to global subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ManagerEvent {
    /// Aggregate state changed
    StateChanged {
        state: ManagerState,
        timestamp: DateTime<Utc>,
    },

    /// A sound's session state changed
    SoundStateChanged {
        sound_id: String,
        state: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// A sound's own volume multiplier changed
    SoundVolumeChanged {
        sound_id: String,
        volume: f32,
        timestamp: DateTime<Utc>,
    },
}

/// Events delivered to per-sound subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SoundEvent {
    StateChanged { state: SessionState },
    VolumeChanged { volume: f32 },
}

// ========================================
// Subscriber lists
// ========================================

/// Identifies one registration on a [`Subscribers`] list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end of a registration
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Id to pass to the owner's `unsubscribe`
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once unsubscribed or the owner is dropped.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Take the next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Drain every already-delivered event
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Explicit subscriber list owned by one component instance
pub struct Subscribers<E> {
    next_id: AtomicU64,
    senders: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>>,
}

impl<E: Clone> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a new listener
    pub fn subscribe(&self) -> Subscription<E> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a listener. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut senders = self.lock();
        let before = senders.len();
        senders.retain(|(sub_id, _)| *sub_id != id);
        senders.len() != before
    }

    /// Deliver an event to every live listener, pruning dropped receivers.
    ///
    /// Returns the number of listeners the event was delivered to.
    pub fn emit(&self, event: E) -> usize {
        let mut senders = self.lock();
        senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        senders.len()
    }

    /// Number of registered listeners
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber lists keyed by sound identifier
pub struct KeyedSubscribers<E> {
    lists: Mutex<HashMap<String, Subscribers<E>>>,
}

impl<E: Clone> KeyedSubscribers<E> {
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, key: &str) -> Subscription<E> {
        self.lock()
            .entry(key.to_string())
            .or_default()
            .subscribe()
    }

    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let mut lists = self.lock();
        let Some(list) = lists.get(key) else {
            return false;
        };
        let removed = list.unsubscribe(id);
        if list.subscriber_count() == 0 {
            lists.remove(key);
        }
        removed
    }

    pub fn emit(&self, key: &str, event: E) -> usize {
        self.lock().get(key).map(|list| list.emit(event)).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Subscribers<E>>> {
        self.lists.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone> Default for KeyedSubscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_empty_is_idle() {
        assert_eq!(
            ManagerState::reconcile(Vec::<SessionState>::new()),
            ManagerState::Idle
        );
    }

    #[test]
    fn test_reconcile_only_stopped_is_idle() {
        assert_eq!(
            ManagerState::reconcile([SessionState::Stopped]),
            ManagerState::Idle
        );
        assert_eq!(
            ManagerState::reconcile([SessionState::Stopping, SessionState::Stopped]),
            ManagerState::Idle
        );
    }

    #[test]
    fn test_reconcile_paused_and_stopped_is_paused() {
        assert_eq!(
            ManagerState::reconcile([SessionState::Paused, SessionState::Stopped]),
            ManagerState::Paused
        );
        assert_eq!(
            ManagerState::reconcile([SessionState::Pausing, SessionState::Stopping]),
            ManagerState::Paused
        );
    }

    #[test]
    fn test_reconcile_any_active_is_playing() {
        assert_eq!(
            ManagerState::reconcile([SessionState::Playing, SessionState::Paused]),
            ManagerState::Playing
        );
        assert_eq!(
            ManagerState::reconcile([SessionState::Buffering]),
            ManagerState::Playing
        );
        // A session that has not started yet still counts as live
        assert_eq!(
            ManagerState::reconcile([SessionState::Idle, SessionState::Stopped]),
            ManagerState::Playing
        );
    }

    #[tokio::test]
    async fn test_subscribers_emit_and_receive() {
        let subscribers: Subscribers<PlayerEvent> = Subscribers::new();
        let mut sub = subscribers.subscribe();

        let delivered = subscribers.emit(PlayerEvent::StateChanged {
            state: PlayerState::Playing,
        });
        assert_eq!(delivered, 1);

        let event = sub.recv().await.unwrap();
        assert_eq!(
            event,
            PlayerEvent::StateChanged {
                state: PlayerState::Playing
            }
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subscribers: Subscribers<PlayerEvent> = Subscribers::new();
        let mut first = subscribers.subscribe();
        let mut second = subscribers.subscribe();
        assert_ne!(first.id(), second.id());

        assert!(subscribers.unsubscribe(first.id()));
        assert!(!subscribers.unsubscribe(first.id()));

        subscribers.emit(PlayerEvent::ItemTransition { remaining: 2 });
        assert!(first.try_recv().is_none());
        assert_eq!(
            second.try_recv(),
            Some(PlayerEvent::ItemTransition { remaining: 2 })
        );
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let subscribers: Subscribers<PlayerEvent> = Subscribers::new();
        let sub = subscribers.subscribe();
        assert_eq!(subscribers.subscriber_count(), 1);
        drop(sub);

        let delivered = subscribers.emit(PlayerEvent::ItemTransition { remaining: 0 });
        assert_eq!(delivered, 0);
        assert_eq!(subscribers.subscriber_count(), 0);
    }

    #[test]
    fn test_keyed_subscribers_route_by_key() {
        let keyed: KeyedSubscribers<SoundEvent> = KeyedSubscribers::new();
        let mut rain = keyed.subscribe("rain");
        let mut wind = keyed.subscribe("wind");

        keyed.emit("rain", SoundEvent::VolumeChanged { volume: 0.5 });

        assert_eq!(rain.drain(), vec![SoundEvent::VolumeChanged { volume: 0.5 }]);
        assert!(wind.drain().is_empty());

        assert!(keyed.unsubscribe("wind", wind.id()));
        assert_eq!(keyed.emit("wind", SoundEvent::VolumeChanged { volume: 1.0 }), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Pausing.to_string(), "pausing");
        assert_eq!(PlayerState::Buffering.to_string(), "buffering");
        assert_eq!(ManagerState::Paused.to_string(), "paused");
    }
}
