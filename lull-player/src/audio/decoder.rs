//! Chunk decoder using symphonia
//!
//! Decodes one in-memory chunk (a few seconds of MP3/AAC/Vorbis/FLAC/WAV) to
//! interleaved f32 PCM. Chunks are small, so the whole chunk is decoded at once.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::audio::output::DecodedBuffer;
use crate::error::{Error, Result};

/// Decode a complete chunk held in memory
pub fn decode_chunk(bytes: Vec<u8>) -> Result<DecodedBuffer> {
    let byte_len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Decode(format!("Failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
            }
            Err(e) => return Err(Error::Decode(format!("Decode failed: {}", e))),
        }
    }

    if sample_rate == 0 || channels == 0 {
        return Err(Error::Decode("Chunk has no sample rate or channel layout".to_string()));
    }

    debug!(
        bytes = byte_len,
        frames = samples.len() / channels as usize,
        sample_rate,
        channels,
        "Decoded chunk"
    );

    Ok(DecodedBuffer::new(samples, sample_rate, channels))
}

/// Decode on the blocking pool so the async runtime keeps scheduling
pub async fn decode_chunk_async(bytes: Vec<u8>) -> Result<DecodedBuffer> {
    tokio::task::spawn_blocking(move || decode_chunk(bytes))
        .await
        .map_err(|e| Error::Decode(format!("Decode task failed: {}", e)))?
}
