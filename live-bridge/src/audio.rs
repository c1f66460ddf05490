//! Audio format definitions and capture-side buffering utilities.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::{Deserialize, Serialize};

use crate::error::{LiveError, Result};

/// Base mime type for raw 16-bit little-endian PCM.
pub const PCM_MIME: &str = "audio/pcm";

/// Sample rate the live API accepts for microphone input.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the speech the live API streams back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Number of samples per captured microphone frame.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// PCM16 audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono).
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new audio format specification.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// PCM16 mono at 16kHz (live input).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: INPUT_SAMPLE_RATE, channels: 1 }
    }

    /// PCM16 mono at 24kHz (live output).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: OUTPUT_SAMPLE_RATE, channels: 1 }
    }

    /// Duration in seconds of `frames` samples per channel.
    pub fn duration_secs(&self, frames: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    /// Mime type announcing this format, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("{PCM_MIME};rate={}", self.sample_rate)
    }

    /// Format described by a PCM mime type, keeping `self` for anything the
    /// mime type does not state.
    pub fn with_mime_rate(self, mime_type: &str) -> Self {
        match parse_pcm_rate(mime_type) {
            Some(sample_rate) => Self { sample_rate, ..self },
            None => self,
        }
    }
}

/// Extract the `rate=` parameter from a PCM mime type.
///
/// Returns `None` for non-PCM mime types or when no valid rate is given.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    let mut parts = mime_type.split(';');
    let base = parts.next()?.trim();
    if !base.eq_ignore_ascii_case(PCM_MIME) {
        return None;
    }
    parts
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0)
}

/// One fixed-size block of captured mono samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// The samples, in capture order.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a new frame.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        AudioFormat::new(self.sample_rate, 1).duration_secs(self.samples.len())
    }
}

/// Accumulates arbitrarily sized sample blocks into fixed-size frames.
///
/// Devices deliver audio in whatever block size their driver prefers; the
/// live API is fed frames of exactly `frame_size` samples.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    frame_size: usize,
    sample_rate: u32,
}

impl FrameAccumulator {
    /// Create a new accumulator. A `frame_size` of zero is treated as one.
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self { buffer: Vec::with_capacity(frame_size), frame_size, sample_rate }
    }

    /// Push new samples, returning every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_size);
        while self.buffer.len() >= self.frame_size {
            let rest = self.buffer.split_off(self.frame_size);
            let full = std::mem::replace(&mut self.buffer, rest);
            frames.push(AudioFrame::new(full, self.sample_rate));
        }
        frames
    }

    /// Samples waiting for the next frame boundary.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Input frames handed to rubato per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Source frames repeated before a standalone buffer so the interpolator
/// starts on signal instead of silence.
const EDGE_PAD: usize = 64;

/// Mono sample-rate converter backed by rubato.
///
/// One instance belongs to one stream. [`process`](Self::process) carries
/// filter state and partial input across calls, so consecutive blocks
/// resample as one continuous signal.
pub struct MonoResampler {
    from_rate: u32,
    to_rate: u32,
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoResampler {
    /// Create a resampler converting `from_rate` to `to_rate`.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(LiveError::config(format!(
                "cannot resample {from_rate} Hz to {to_rate} Hz"
            )));
        }
        let inner = if from_rate == to_rate {
            None
        } else {
            let ratio = f64::from(to_rate) / f64::from(from_rate);
            let resampler =
                FastFixedIn::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
                    .map_err(|e| LiveError::config(format!("resampler setup failed: {e}")))?;
            Some(resampler)
        };
        Ok(Self { from_rate, to_rate, inner, pending: Vec::new() })
    }

    /// Input sample rate.
    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Output sample rate.
    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Whether the resampler passes samples through unchanged.
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Resample one block of a continuous stream.
    ///
    /// Input is held back until a full chunk is available, so the output
    /// lags the input by at most one chunk.
    pub fn process(&mut self, block: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(block.to_vec());
        };
        self.pending.extend_from_slice(block);

        let mut output = Vec::new();
        let mut consumed = 0;
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            run_chunk(inner, &self.pending[consumed..consumed + needed], &mut output)?;
            consumed += needed;
        }
        self.pending.drain(..consumed);
        Ok(output)
    }

    /// Resample a standalone buffer to exactly `frames` output frames.
    ///
    /// The buffer is edge-extended on both sides so its first and last
    /// samples hold instead of fading against silence, and the filter delay
    /// is trimmed from the head. Stream state is reset first.
    pub fn resample_exact(&mut self, input: &[f32], frames: usize) -> Result<Vec<f32>> {
        let (Some(&first), Some(&last)) = (input.first(), input.last()) else {
            return Ok(vec![0.0; frames]);
        };
        let (from_rate, to_rate) = (self.from_rate, self.to_rate);
        self.pending.clear();
        let Some(inner) = self.inner.as_mut() else {
            let mut output = input.to_vec();
            output.resize(frames, last);
            return Ok(output);
        };
        inner.reset();

        let mut padded = vec![first; EDGE_PAD];
        padded.extend_from_slice(input);
        let skip = scaled_len(EDGE_PAD, from_rate, to_rate) + inner.output_delay();
        let wanted = skip + frames;

        let mut output = Vec::with_capacity(wanted + RESAMPLE_CHUNK);
        let mut offset = 0;
        while output.len() < wanted {
            let needed = inner.input_frames_next();
            let start = offset.min(padded.len());
            let end = (offset + needed).min(padded.len());
            let mut chunk = padded[start..end].to_vec();
            chunk.resize(needed, last);
            run_chunk(inner, &chunk, &mut output)?;
            offset += needed;
        }

        output.drain(..skip);
        output.truncate(frames);
        Ok(output)
    }
}

impl std::fmt::Debug for MonoResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonoResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Frames `frames` input frames become at the output rate, rounded.
pub fn scaled_len(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    let from = u64::from(from_rate.max(1));
    ((frames as u64 * u64::from(to_rate) + from / 2) / from) as usize
}

fn run_chunk(inner: &mut FastFixedIn<f32>, chunk: &[f32], output: &mut Vec<f32>) -> Result<()> {
    let input = [chunk];
    let channels = inner
        .process(&input[..], None)
        .map_err(|e| LiveError::resample(e.to_string()))?;
    if let Some(channel) = channels.into_iter().next() {
        output.extend(channel);
    }
    Ok(())
}
