//! Default speaker as a scheduled [`AudioOutput`].

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::mixer::{Mixer, frame_at};
use crate::audio::{AudioFormat, MonoResampler};
use crate::codec::PcmBuffer;
use crate::error::{LiveError, Result};
use crate::playback::{AudioOutput, PlaybackControl, PlaybackNotifier};

/// Speaker output driven by a [`Mixer`] on the device callback.
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
    resampler: Option<MonoResampler>,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    format: AudioFormat,
}

impl SpeakerOutput {
    fn new(
        mixer: Arc<Mutex<Mixer>>,
        shutdown: std::sync::mpsc::Sender<()>,
        format: AudioFormat,
    ) -> Self {
        let device_rate = mixer.lock().sample_rate();
        Self { mixer, device_rate, resampler: None, shutdown: Some(shutdown), format }
    }

    /// Open the host's default output device for buffers in `format`.
    ///
    /// Buffers are resampled to the device rate when the two differ.
    pub fn open_default(format: AudioFormat) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| LiveError::device("no speaker found"))?;
        let label = device.name().unwrap_or_else(|_| "speaker".to_string());
        let supported = device
            .default_output_config()
            .map_err(|e| LiveError::device(format!("speaker config unavailable: {e}")))?;

        let sample_format = supported.sample_format();
        let config = supported.config();
        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0)));

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_mixer = mixer.clone();
        std::thread::Builder::new()
            .name("live-bridge-speaker".to_string())
            .spawn(move || {
                let built = match sample_format {
                    SampleFormat::F32 => build_output::<f32>(&device, &config, thread_mixer),
                    SampleFormat::I16 => build_output::<i16>(&device, &config, thread_mixer),
                    SampleFormat::U16 => build_output::<u16>(&device, &config, thread_mixer),
                    other => {
                        Err(LiveError::device(format!("unsupported speaker format {other:?}")))
                    }
                };
                let stream = match built.and_then(|stream| {
                    stream
                        .play()
                        .map(|()| stream)
                        .map_err(|e| LiveError::device(format!("speaker failed to start: {e}")))
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                info!(device = %label, rate = config.sample_rate.0, "Speaker output started");

                let _ = shutdown_rx.recv();
                drop(stream);
                info!(device = %label, "Speaker output stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| LiveError::device("speaker thread exited during setup"))??;

        Ok(Self::new(mixer, shutdown_tx, format))
    }

    /// Format buffers are expected in.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Stream resampler for `rate`, rebuilt when the buffer rate changes.
    fn resampler_for(&mut self, rate: u32) -> Result<&mut MonoResampler> {
        let resampler = match self.resampler.take() {
            Some(resampler) if resampler.from_rate() == rate => resampler,
            _ => MonoResampler::new(rate, self.device_rate)?,
        };
        Ok(self.resampler.insert(resampler))
    }
}

impl AudioOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn schedule(
        &mut self,
        buffer: PcmBuffer,
        start_at: f64,
        notifier: PlaybackNotifier,
    ) -> Result<Box<dyn PlaybackControl>> {
        if self.shutdown.is_none() {
            return Err(LiveError::playback("speaker is closed"));
        }

        // Both ends come from the scheduler's own clock arithmetic, so the
        // next voice starts on exactly the frame this one ends on.
        let start_frame = frame_at(start_at, self.device_rate);
        let end_frame = frame_at(start_at + buffer.duration_secs(), self.device_rate);
        let frames = end_frame.saturating_sub(start_frame) as usize;

        let mono = downmix(&buffer);
        let samples = self.resampler_for(buffer.sample_rate())?.resample_exact(&mono, frames)?;

        debug!(id = %notifier.id(), start_frame, frames, "Booking speaker voice");
        let control = self.mixer.lock().add_voice(samples, start_frame, notifier);
        Ok(Box::new(control))
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            self.mixer.lock().clear();
            let _ = shutdown.send(());
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SpeakerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerOutput")
            .field("format", &self.format)
            .field("open", &self.shutdown.is_some())
            .finish()
    }
}

fn downmix(buffer: &PcmBuffer) -> Vec<f32> {
    match buffer.channels() {
        [] => Vec::new(),
        [mono] => mono.clone(),
        channels => {
            let scale = 1.0 / channels.len() as f32;
            (0..buffer.frames())
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                .collect()
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.lock().render(&mut scratch, channels);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(*sample);
                }
            },
            |err| error!(error = %err, "Speaker stream error"),
            None,
        )
        .map_err(|e| LiveError::device(format!("failed to open speaker: {e}")))
}
