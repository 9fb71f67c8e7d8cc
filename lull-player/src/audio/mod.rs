//! Output engine adapter contract and default chunk decoding

pub mod decoder;
pub mod output;

pub use decoder::decode_chunk;
pub use output::{
    DecodedBuffer, EngineFactory, EngineState, GainNode, OutputEngine, ScheduledSource,
    SourceNode,
};
