//! Frame-clocked mixer for scheduled playback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::playback::{PlaybackControl, PlaybackNotifier};

struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
    stopped: Arc<AtomicBool>,
    notifier: Option<PlaybackNotifier>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixes mono voices, each booked at an absolute frame, into an
/// interleaved output buffer.
///
/// The clock is the number of frames rendered so far, so it advances
/// exactly as fast as the device consumes audio.
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    /// Create a mixer for a device running at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate: sample_rate.max(1), frames_rendered: 0, voices: Vec::new() }
    }

    /// Device sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device time in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    /// Voices booked and not yet finished or stopped.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Book mono `samples` (already at the device rate) at `start_frame`.
    pub fn add_voice(
        &mut self,
        samples: Vec<f32>,
        start_frame: u64,
        notifier: PlaybackNotifier,
    ) -> VoiceControl {
        let stopped = Arc::new(AtomicBool::new(false));
        self.voices.push(Voice {
            start_frame,
            samples,
            stopped: stopped.clone(),
            notifier: Some(notifier),
        });
        VoiceControl { stopped }
    }

    /// Fill `out` with `out.len() / channels` frames and advance the clock.
    ///
    /// Voices that played to their end report completion; stopped voices
    /// are discarded silently.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block_start = self.frames_rendered;
        out.fill(0.0);

        self.voices.retain(|voice| !voice.stopped.load(Ordering::Acquire));

        for voice in &self.voices {
            let end = voice.end_frame();
            if end <= block_start || voice.start_frame >= block_start + frames as u64 {
                continue;
            }
            for frame in 0..frames {
                let at = block_start + frame as u64;
                if at < voice.start_frame || at >= end {
                    continue;
                }
                let sample = voice.samples[(at - voice.start_frame) as usize];
                for slot in &mut out[frame * channels..(frame + 1) * channels] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.frames_rendered += frames as u64;
        let now = self.frames_rendered;
        self.voices.retain_mut(|voice| {
            if voice.end_frame() > now {
                return true;
            }
            if let Some(notifier) = voice.notifier.take() {
                notifier.finished();
            }
            false
        });
    }

    /// Drop every voice without reporting completion.
    pub fn clear(&mut self) {
        self.voices.clear();
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("sample_rate", &self.sample_rate)
            .field("frames_rendered", &self.frames_rendered)
            .field("voices", &self.voices.len())
            .finish()
    }
}

/// Device frame a time in seconds falls on.
///
/// Consecutive bookings whose boundaries share the same `seconds` value map
/// to the same frame, so back-to-back voices meet without a gap.
pub fn frame_at(seconds: f64, sample_rate: u32) -> u64 {
    (seconds.max(0.0) * f64::from(sample_rate)).round() as u64
}

/// Stops one mixer voice.
#[derive(Debug)]
pub struct VoiceControl {
    stopped: Arc<AtomicBool>,
}

impl PlaybackControl for VoiceControl {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}
