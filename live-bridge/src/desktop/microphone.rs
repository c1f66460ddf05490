//! Default microphone as an [`AudioSource`].

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, trace};

use crate::device::{AudioSource, MediaTrack, TrackKind};
use crate::error::{LiveError, Result};

/// Device callbacks buffered before blocks are dropped.
const BLOCK_CAPACITY: usize = 256;

/// Handle to the microphone stream thread.
#[derive(Debug)]
pub struct MicrophoneTrack {
    label: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MediaTrack for MicrophoneTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mono sample blocks from the microphone thread.
#[derive(Debug)]
pub struct MicrophoneSource {
    sample_rate: u32,
    blocks: mpsc::Receiver<Vec<f32>>,
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn next_block(&mut self) -> Option<Vec<f32>> {
        self.blocks.recv().await
    }
}

/// Open the host's default input device.
pub(crate) async fn open_default() -> Result<(MicrophoneTrack, MicrophoneSource)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveError::device("no microphone found"))?;
    let label = device.name().unwrap_or_else(|_| "microphone".to_string());
    let supported = device
        .default_input_config()
        .map_err(|e| LiveError::device(format!("microphone config unavailable: {e}")))?;

    let sample_format = supported.sample_format();
    let config = supported.config();
    let sample_rate = config.sample_rate.0;

    let (blocks_tx, blocks) = mpsc::channel(BLOCK_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let thread_label = label.clone();
    std::thread::Builder::new()
        .name("live-bridge-mic".to_string())
        .spawn(move || {
            let built = match sample_format {
                SampleFormat::F32 => build_input::<f32>(&device, &config, blocks_tx),
                SampleFormat::I16 => build_input::<i16>(&device, &config, blocks_tx),
                SampleFormat::U16 => build_input::<u16>(&device, &config, blocks_tx),
                other => Err(LiveError::device(format!("unsupported microphone format {other:?}"))),
            };
            let stream = match built.and_then(|stream| {
                stream
                    .play()
                    .map(|()| stream)
                    .map_err(|e| LiveError::device(format!("microphone failed to start: {e}")))
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            info!(device = %thread_label, "Microphone capture started");

            let _ = shutdown_rx.blocking_recv();
            drop(stream);
            info!(device = %thread_label, "Microphone capture stopped");
        })?;

    ready_rx
        .await
        .map_err(|_| LiveError::device("microphone thread exited during setup"))??;

    Ok((
        MicrophoneTrack { label, shutdown: Some(shutdown_tx) },
        MicrophoneSource { sample_rate, blocks },
    ))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    blocks: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = usize::from(config.channels).max(1);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
                    })
                    .collect();
                if blocks.try_send(mono).is_err() {
                    trace!("Microphone block dropped");
                }
            },
            |err| error!(error = %err, "Microphone stream error"),
            None,
        )
        .map_err(|e| LiveError::device(format!("failed to open microphone: {e}")))
}
