//! Desktop audio devices backed by cpal.
//!
//! cpal streams are not `Send`, so every stream lives on its own thread and
//! is torn down through a shutdown channel. The microphone is downmixed to
//! mono; the speaker mixes scheduled buffers against a clock counted in
//! rendered frames.
//!
//! This backend has no camera. Acquiring with `video: true` fails with
//! [`LiveError::DeviceUnavailable`].

mod microphone;
mod mixer;
mod speaker;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::AudioFormat;
use crate::device::{MediaConstraints, MediaDevices, MediaStream};
use crate::error::{LiveError, Result};
use crate::playback::AudioOutput;

pub use microphone::{MicrophoneSource, MicrophoneTrack};
pub use mixer::Mixer;
pub use speaker::SpeakerOutput;

/// Default cpal input and output devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopDevices;

impl DesktopDevices {
    /// Use the host's default devices.
    pub fn new() -> Self {
        Self
    }

    /// Names of the default input and output devices, if present.
    pub fn describe() -> (Option<String>, Option<String>) {
        let host = cpal::default_host();
        let input = host.default_input_device().and_then(|d| d.name().ok());
        let output = host.default_output_device().and_then(|d| d.name().ok());
        (input, output)
    }
}

#[async_trait]
impl MediaDevices for DesktopDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        if constraints.video {
            return Err(LiveError::device("camera capture is not available on the desktop backend"));
        }
        let mut stream = MediaStream::new();
        if constraints.audio {
            let (track, source) = microphone::open_default().await?;
            stream = stream.with_audio(Box::new(track), Box::new(source));
        }
        Ok(stream)
    }

    fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(SpeakerOutput::open_default(format)?))
    }
}
