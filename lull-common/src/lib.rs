//! # Lull Common Library
//!
//! Shared building blocks for the Lull ambient-sound player:
//! - Lifecycle state enums and event payloads
//! - Explicit subscriber lists for component events
//! - Volume validation and perceptual gain mixing
//! - Capped exponential backoff for retried loads

pub mod error;
pub mod events;
pub mod retry;
pub mod volume;

pub use error::{Error, Result};
pub use events::{
    KeyedSubscribers, ManagerEvent, ManagerState, PlayerEvent, PlayerState, SessionEvent,
    SessionState, SoundEvent, Subscribers, Subscription, SubscriptionId,
};
pub use retry::Backoff;
