//! Segment streaming and fades

pub mod fader;
pub mod stream;

pub use stream::SegmentStreamPlayer;
