//! PCM16 transport codec.
//!
//! Captured audio travels as 16-bit little-endian PCM wrapped in base64 text.
//! This module converts between floating-point samples, the PCM16 byte layout
//! and the base64 [`TransportChunk`] envelope.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;
use crate::error::{LiveError, Result};

/// Scale between `[-1.0, 1.0]` floats and signed 16-bit integers.
const PCM16_SCALE: f32 = 32768.0;

/// Wire representation of one audio frame or one encoded video still.
///
/// Serializes as `{"mimeType": "...", "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportChunk {
    mime_type: String,
    data: String,
}

impl TransportChunk {
    /// Wrap already base64-encoded data.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    /// Base64-encode raw bytes into a chunk.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, STANDARD.encode(bytes))
    }

    /// The mime type of the payload.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base64 payload.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload carries audio.
    pub fn is_audio(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("audio/")
    }

    /// Decode the base64 payload back to bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| LiveError::malformed(format!("invalid base64 payload: {e}")))
    }
}

/// Decoded audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Create a buffer from per-channel samples.
    ///
    /// All channels are expected to hold the same number of frames.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self { channels, sample_rate }
    }

    /// Create a mono buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// All channels.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Whether the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        AudioFormat::new(self.sample_rate, 1).duration_secs(self.frames())
    }
}

fn to_pcm16(sample: f32) -> i16 {
    // `as` truncates toward zero, saturates out-of-range values and maps NaN to 0.
    (sample * PCM16_SCALE) as i16
}

/// Encode float samples as a base64 PCM16 chunk.
///
/// Multi-channel input is expected to be interleaved. An empty slice yields a
/// chunk with an empty payload.
pub fn encode_samples(samples: &[f32], format: AudioFormat) -> TransportChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&to_pcm16(*sample).to_le_bytes());
    }
    TransportChunk::from_bytes(format.mime_type(), &bytes)
}

/// Decode a base64 PCM16 chunk into per-channel float samples.
///
/// Fails with [`LiveError::MalformedPayload`] when the payload is not valid
/// base64 or its length is not a multiple of `2 * format.channels`.
pub fn decode_chunk(chunk: &TransportChunk, format: AudioFormat) -> Result<PcmBuffer> {
    let bytes = chunk.decode_bytes()?;
    decode_pcm16(&bytes, format)
}

/// Decode raw PCM16 little-endian bytes into per-channel float samples.
pub fn decode_pcm16(bytes: &[u8], format: AudioFormat) -> Result<PcmBuffer> {
    let channel_count = usize::from(format.channels);
    if channel_count == 0 {
        return Err(LiveError::malformed("channel count must be at least 1"));
    }

    let frame_bytes = 2 * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(LiveError::malformed(format!(
            "payload of {} bytes is not a multiple of {} ({} channel(s) of PCM16)",
            bytes.len(),
            frame_bytes,
            channel_count
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for (index, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        channels[index % channel_count].push(f32::from(sample) / PCM16_SCALE);
    }

    Ok(PcmBuffer::new(channels, format.sample_rate))
}
