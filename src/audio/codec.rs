//! Sample codec: raw `f32` audio and JPEG frames to and from the wire format.
//!
//! Audio travels as base64-encoded 16-bit little-endian mono PCM, frames as
//! base64-encoded JPEG. Everything here is pure and stateless.

use anyhow::{bail, Context, Result};
use base64::Engine;

use crate::live::messages::Blob;

/// Sample rate of the outbound microphone stream
pub const PCM_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech coming back from the model
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME type attached to outbound video frames
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// A decoded, playable mono buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Root-mean-square amplitude of a sample window
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Encode raw microphone samples as a PCM blob at [`PCM_SAMPLE_RATE`]
pub fn encode_audio(samples: &[f32]) -> Blob {
    let pcm_bytes: Vec<u8> = samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect();

    Blob {
        mime_type: format!("audio/pcm;rate={}", PCM_SAMPLE_RATE),
        data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
    }
}

/// Decode a base64 PCM payload into a playable buffer at `sample_rate`
pub fn decode_audio(payload: &str, sample_rate: u32) -> Result<PlaybackBuffer> {
    let bytes = decode_transport_text(payload)?;

    if bytes.len() % 2 != 0 {
        bail!("PCM payload has odd length ({} bytes)", bytes.len());
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
    })
}

/// Wrap already-compressed JPEG bytes as an image blob
pub fn encode_image(jpeg: &[u8]) -> Blob {
    Blob {
        mime_type: JPEG_MIME_TYPE.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(jpeg),
    }
}

/// Decode transport-safe base64 text back into raw bytes
pub fn decode_transport_text(text: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .context("Failed to decode base64 payload")
}
