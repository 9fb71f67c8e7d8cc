//! Output engine contract
//!
//! The stream player never touches an audio device directly. It drives an
//! [`OutputEngine`] that provides:
//! - a monotonic clock in seconds that stops while the engine is suspended
//! - a gain-controllable mix node connected to the device output
//! - buffer sources scheduled at an exact engine time, each with an
//!   end-of-playback notification
//! - chunk decoding (a symphonia-based default is provided)
//! - suspend / resume / close of the whole engine; close is terminal
//!
//! Scheduled sources are owned by the engine: it releases their audio once
//! playback ends. Stopping a source still delivers its end notification.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::audio::decoder;
use crate::error::Result;

/// Engine run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Suspended,
    /// Terminal
    Closed,
}

/// Decoded PCM ready to be scheduled
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    /// Interleaved f32 samples
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Buffer of the given length with no audible content
    pub fn silent(duration_secs: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Gain-controllable mix node
pub trait GainNode: Send + Sync {
    fn gain(&self) -> f32;
    fn set_gain(&self, value: f32);
}

/// Handle to one scheduled buffer source
pub trait SourceNode: Send + Sync {
    /// Stop playback now. The end notification still fires.
    fn stop(&self);
}

/// A buffer source bound to one decoded buffer and scheduled at a start time
pub struct ScheduledSource {
    pub node: Box<dyn SourceNode>,

    /// Resolves once playback of the buffer ended (naturally or via `stop`)
    pub ended: oneshot::Receiver<()>,
}

/// Audio output engine consumed by the segment stream player
#[async_trait]
pub trait OutputEngine: Send + Sync {
    /// Engine clock in seconds
    fn current_time(&self) -> f64;

    fn state(&self) -> EngineState;

    /// Create a gain node connected to the device output
    fn create_gain(&self) -> Result<Arc<dyn GainNode>>;

    /// Schedule `buffer` to start at engine time `start_at`, routed through `output`
    fn schedule(
        &self,
        output: &Arc<dyn GainNode>,
        buffer: DecodedBuffer,
        start_at: f64,
    ) -> Result<ScheduledSource>;

    /// Decode raw chunk bytes into a playable buffer
    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedBuffer> {
        decoder::decode_chunk_async(bytes).await
    }

    async fn suspend(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Close the engine; it cannot be resumed afterwards
    async fn close(&self) -> Result<()>;
}

/// Creates one private engine per stream player
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn OutputEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Arc<dyn OutputEngine>> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn OutputEngine>> {
        self()
    }
}
