//! Media device boundary: microphone, camera and speaker acquisition.

use async_trait::async_trait;

use crate::audio::AudioFormat;
use crate::error::Result;
use crate::playback::AudioOutput;
use crate::video::VideoFrame;

/// Which devices a session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Request a microphone.
    pub audio: bool,
    /// Request a camera.
    pub video: bool,
}

impl MediaConstraints {
    /// Microphone and camera.
    pub fn audio_video() -> Self {
        Self { audio: true, video: true }
    }

    /// Microphone only.
    pub fn audio_only() -> Self {
        Self { audio: true, video: false }
    }
}

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Microphone audio.
    Audio,
    /// Camera video.
    Video,
}

/// A live device track. Stopping it releases the underlying device.
pub trait MediaTrack: Send {
    /// Kind of the track.
    fn kind(&self) -> TrackKind;

    /// Human-readable device label.
    fn label(&self) -> &str;

    /// Release the device.
    fn stop(&mut self);
}

/// Produces microphone samples as the device records them.
#[async_trait]
pub trait AudioSource: Send {
    /// Sample rate of the blocks this source yields.
    fn sample_rate(&self) -> u32;

    /// Next block of mono samples in `[-1.0, 1.0]`, of any length.
    ///
    /// Returns `None` once the device stops producing audio.
    async fn next_block(&mut self) -> Option<Vec<f32>>;
}

/// Grabs the current camera image on demand.
#[async_trait]
pub trait VideoSource: Send {
    /// The current frame, or `None` while the camera has no picture yet.
    async fn grab_frame(&mut self) -> Result<Option<VideoFrame>>;
}

/// Devices acquired for one session.
///
/// The capture pipeline borrows the sources; the tracks stay here so that
/// teardown can release them. Tracks are stopped at most once, and stopped
/// automatically on drop.
pub struct MediaStream {
    tracks: Vec<Box<dyn MediaTrack>>,
    audio: Option<Box<dyn AudioSource>>,
    video: Option<Box<dyn VideoSource>>,
}

impl MediaStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self { tracks: Vec::new(), audio: None, video: None }
    }

    /// Add an audio source and its track.
    pub fn with_audio(
        mut self,
        track: Box<dyn MediaTrack>,
        source: Box<dyn AudioSource>,
    ) -> Self {
        self.tracks.push(track);
        self.audio = Some(source);
        self
    }

    /// Add a video source and its track.
    pub fn with_video(
        mut self,
        track: Box<dyn MediaTrack>,
        source: Box<dyn VideoSource>,
    ) -> Self {
        self.tracks.push(track);
        self.video = Some(source);
        self
    }

    /// Hand the audio source to a consumer.
    pub fn take_audio(&mut self) -> Option<Box<dyn AudioSource>> {
        self.audio.take()
    }

    /// Hand the video source to a consumer.
    pub fn take_video(&mut self) -> Option<Box<dyn VideoSource>> {
        self.video.take()
    }

    /// Number of tracks not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Stop every track. Later calls are no-ops.
    pub fn stop_tracks(&mut self) {
        for mut track in self.tracks.drain(..) {
            tracing::debug!(kind = ?track.kind(), label = track.label(), "Stopping media track");
            track.stop();
        }
        self.audio = None;
        self.video = None;
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("tracks", &self.tracks.len())
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}

/// Platform access to capture and output devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the requested capture devices.
    ///
    /// Fails with [`LiveError::DeviceUnavailable`](crate::LiveError::DeviceUnavailable)
    /// when permission is denied or a device is missing.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream>;

    /// Open the speaker for playback in `format`.
    fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrack {
        stops: Arc<AtomicUsize>,
    }

    impl MediaTrack for CountingTrack {
        fn kind(&self) -> TrackKind {
            TrackKind::Audio
        }

        fn label(&self) -> &str {
            "test-mic"
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SilentSource;

    #[async_trait]
    impl AudioSource for SilentSource {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        async fn next_block(&mut self) -> Option<Vec<f32>> {
            None
        }
    }

    #[test]
    fn test_tracks_stop_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut stream = MediaStream::new()
            .with_audio(Box::new(CountingTrack { stops: stops.clone() }), Box::new(SilentSource));

        assert_eq!(stream.live_tracks(), 1);
        stream.stop_tracks();
        stream.stop_tracks();
        drop(stream);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_stops_tracks() {
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let _stream = MediaStream::new().with_audio(
                Box::new(CountingTrack { stops: stops.clone() }),
                Box::new(SilentSource),
            );
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_sources() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut stream = MediaStream::new()
            .with_audio(Box::new(CountingTrack { stops: stops.clone() }), Box::new(SilentSource));

        assert!(stream.take_audio().is_some());
        assert!(stream.take_audio().is_none());
        assert!(stream.take_video().is_none());
        // Taking the source leaves the track with the stream.
        assert_eq!(stream.live_tracks(), 1);
    }
}
