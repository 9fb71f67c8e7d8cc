//! # Lull Player Library (lull-player)
//!
//! Gapless ambient-sound looping on top of chunked remote audio.
//!
//! **Layers:**
//! - [`playback::SegmentStreamPlayer`]: streams a playlist of chunk indexes
//!   into back-to-back scheduled audio on an [`audio::OutputEngine`]
//! - [`session::SoundSession`]: loops one sound by choosing segments (and
//!   bridge segments for gapless sounds), with fade-in/out state handling
//! - [`manager::SoundSessionManager`]: registry of sessions, shared
//!   configuration, volume mixing and the aggregate Idle/Playing/Paused state
//!
//! The library never opens an audio device or installs a tracing subscriber;
//! the host supplies an [`audio::EngineFactory`] and a [`content::ContentStore`].

pub mod audio;
pub mod config;
pub mod content;
pub mod error;
pub mod manager;
pub mod playback;
pub mod session;

pub use config::{LullConfig, SessionConfig, StreamConfig};
pub use error::{Error, Result};
pub use manager::SoundSessionManager;
pub use playback::SegmentStreamPlayer;
pub use session::SoundSession;
