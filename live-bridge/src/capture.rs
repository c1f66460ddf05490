//! Capture pipeline: microphone and camera to outbound transport chunks.
//!
//! Audio and video run as two independent producer tasks feeding one bounded
//! outbound channel. Each producer preserves its own order; the two streams
//! interleave arbitrarily. Producers never wait on the network: when the
//! channel is full the chunk is dropped and counted.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::audio::{AudioFormat, FrameAccumulator, MonoResampler};
use crate::codec::{TransportChunk, encode_samples};
use crate::config::CaptureConfig;
use crate::device::{AudioSource, MediaStream, VideoSource};
use crate::video::encode_jpeg;

/// Starts capture tasks for one session.
pub struct CapturePipeline;

impl CapturePipeline {
    /// Take the sources out of `stream` and start producing chunks.
    ///
    /// The tracks stay with `stream`; the caller releases them after
    /// stopping the returned handle. Video is only captured when both the
    /// stream has a camera and `config.video` is set.
    pub fn start(
        stream: &mut MediaStream,
        config: &CaptureConfig,
        input_format: AudioFormat,
        outbound: mpsc::Sender<TransportChunk>,
    ) -> CaptureHandle {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        if let Some(source) = stream.take_audio() {
            tasks.push(tokio::spawn(run_audio(
                source,
                config.audio_frame_size,
                input_format,
                outbound.clone(),
                cancel.child_token(),
            )));
        }

        match stream.take_video() {
            Some(source) if config.video => {
                tasks.push(tokio::spawn(run_video(
                    source,
                    config.clone(),
                    outbound,
                    cancel.child_token(),
                )));
            }
            Some(_) => debug!("Camera acquired but video capture disabled"),
            None => {}
        }

        debug!(producers = tasks.len(), "Capture started");
        CaptureHandle { cancel, tasks }
    }
}

/// Running capture tasks. Stopping is idempotent; dropping the handle stops
/// capture as well.
#[derive(Debug)]
pub struct CaptureHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Signal every producer to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for every producer to exit.
    pub async fn join(&mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Capture task ended abnormally");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Push one chunk without waiting. Returns `false` once the receiver is gone.
fn forward(
    outbound: &mpsc::Sender<TransportChunk>,
    chunk: TransportChunk,
    dropped: &mut u64,
) -> bool {
    match outbound.try_send(chunk) {
        Ok(()) => true,
        Err(TrySendError::Full(chunk)) => {
            *dropped += 1;
            warn!(
                mime_type = chunk.mime_type(),
                dropped = *dropped,
                "Outbound queue full, dropping chunk"
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn run_audio(
    mut source: Box<dyn AudioSource>,
    frame_size: usize,
    format: AudioFormat,
    outbound: mpsc::Sender<TransportChunk>,
    cancel: CancellationToken,
) {
    let mut resampler = match MonoResampler::new(source.sample_rate(), format.sample_rate) {
        Ok(resampler) => resampler,
        Err(e) => {
            warn!(error = %e, "Cannot convert microphone rate, audio capture disabled");
            return;
        }
    };
    let mut frames = FrameAccumulator::new(frame_size, format.sample_rate);
    let mut sent = 0u64;
    let mut dropped = 0u64;

    if !resampler.is_passthrough() {
        debug!(
            from = resampler.from_rate(),
            to = resampler.to_rate(),
            "Resampling microphone input"
        );
    }

    'capture: loop {
        let block = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            block = source.next_block() => block,
        };
        let Some(block) = block else {
            debug!("Microphone stopped producing audio");
            break;
        };

        let samples = match resampler.process(&block) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Dropping microphone block");
                continue;
            }
        };
        for frame in frames.push(&samples) {
            let chunk = encode_samples(&frame.samples, format);
            if !forward(&outbound, chunk, &mut dropped) {
                break 'capture;
            }
            sent += 1;
            trace!(sent, "Queued audio frame");
        }
    }

    debug!(sent, dropped, "Audio capture stopped");
}

async fn run_video(
    mut source: Box<dyn VideoSource>,
    config: CaptureConfig,
    outbound: mpsc::Sender<TransportChunk>,
    cancel: CancellationToken,
) {
    let period = config.video_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sent = 0u64;
    let mut dropped = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = source.grab_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("Camera has no frame yet");
                continue;
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Skipping camera frame");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Camera failed, stopping video capture");
                break;
            }
        };

        match encode_jpeg(frame, config.jpeg_quality, config.max_video_width) {
            Ok(chunk) => {
                if !forward(&outbound, chunk, &mut dropped) {
                    break;
                }
                sent += 1;
                trace!(sent, "Queued video still");
            }
            Err(e) => warn!(error = %e, "Dropping camera frame"),
        }
    }

    debug!(sent, dropped, "Video capture stopped");
}
