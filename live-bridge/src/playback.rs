//! Audio output boundary and gapless playback scheduling.
//!
//! Model speech arrives as a sequence of small PCM chunks at irregular
//! intervals. [`PlaybackScheduler`] decodes each one and books it on the
//! output device's clock directly after the previous chunk, so playback is
//! back-to-back no matter how the chunks were spaced on the network.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::audio::AudioFormat;
use crate::codec::{PcmBuffer, TransportChunk, decode_chunk};
use crate::error::{LiveError, Result};

/// Identifies one scheduled buffer for the lifetime of its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(u64);

impl PlaybackId {
    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "playback-{}", self.0)
    }
}

/// Control over one buffer the output has accepted.
pub trait PlaybackControl: Send {
    /// Stop playback now, or cancel it if it has not started.
    fn stop(&mut self);
}

/// Completion signal handed to the output with each buffer.
///
/// The output calls [`finished`](Self::finished) when the buffer plays to
/// its end. Consuming `self` makes a second notification impossible.
#[derive(Debug)]
pub struct PlaybackNotifier {
    id: PlaybackId,
    tx: mpsc::UnboundedSender<PlaybackId>,
}

impl PlaybackNotifier {
    /// Id of the buffer this notifier belongs to.
    pub fn id(&self) -> PlaybackId {
        self.id
    }

    /// Report natural completion. Safe to call from any thread.
    pub fn finished(self) {
        // The scheduler may already be gone; nothing to report to then.
        let _ = self.tx.send(self.id);
    }
}

/// A clock-bearing output device accepting scheduled playback.
pub trait AudioOutput: Send {
    /// Current device time in seconds. Non-decreasing.
    fn current_time(&self) -> f64;

    /// Book `buffer` to start playing at device time `start_at`.
    ///
    /// Must not block on playback itself.
    fn schedule(
        &mut self,
        buffer: PcmBuffer,
        start_at: f64,
        notifier: PlaybackNotifier,
    ) -> Result<Box<dyn PlaybackControl>>;

    /// Release the device. Called at most once by the scheduler.
    fn close(&mut self);
}

/// Where one enqueued chunk landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    /// Id of the booked buffer.
    pub id: PlaybackId,
    /// Device time at which it starts.
    pub start_time: f64,
    /// Its length in seconds.
    pub duration: f64,
}

impl ScheduledPlayback {
    /// Device time at which it ends.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Schedules inbound speech for gapless sequential playback.
///
/// Invariant: `next_start_time` only grows, except on [`interrupt`](Self::interrupt),
/// and every booking starts at `max(next_start_time, device_now)`.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    format: AudioFormat,
    next_start_time: f64,
    next_id: u64,
    active: HashMap<PlaybackId, Box<dyn PlaybackControl>>,
    finished_tx: mpsc::UnboundedSender<PlaybackId>,
    finished_rx: mpsc::UnboundedReceiver<PlaybackId>,
    closed: bool,
}

impl PlaybackScheduler {
    /// Create a scheduler on `output`, decoding chunks as `format` unless a
    /// chunk's mime type states its own rate.
    pub fn new(output: Box<dyn AudioOutput>, format: AudioFormat) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            output,
            format,
            next_start_time: 0.0,
            next_id: 0,
            active: HashMap::new(),
            finished_tx,
            finished_rx,
            closed: false,
        }
    }

    /// Decode a chunk and book it right after everything already booked.
    ///
    /// Returns `Ok(None)` for an empty chunk. A malformed chunk is rejected
    /// with [`LiveError::MalformedPayload`] and leaves the schedule untouched.
    pub fn enqueue(&mut self, chunk: &TransportChunk) -> Result<Option<ScheduledPlayback>> {
        if self.closed {
            return Err(LiveError::playback("scheduler is closed"));
        }
        let format = self.format.with_mime_rate(chunk.mime_type());
        let buffer = decode_chunk(chunk, format)?;
        self.schedule(buffer)
    }

    /// Book an already decoded buffer.
    pub fn schedule(&mut self, buffer: PcmBuffer) -> Result<Option<ScheduledPlayback>> {
        if self.closed {
            return Err(LiveError::playback("scheduler is closed"));
        }
        if buffer.is_empty() {
            tracing::trace!("Skipping empty audio buffer");
            return Ok(None);
        }

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration_secs();

        let id = PlaybackId(self.next_id);
        self.next_id += 1;
        let notifier = PlaybackNotifier { id, tx: self.finished_tx.clone() };

        let control = self.output.schedule(buffer, start_time, notifier)?;
        self.active.insert(id, control);
        self.next_start_time = start_time + duration;

        tracing::debug!(
            %id,
            start_time,
            duration,
            backlog = self.next_start_time - now,
            active = self.active.len(),
            "Scheduled audio buffer"
        );
        Ok(Some(ScheduledPlayback { id, start_time, duration }))
    }

    /// Stop every booked buffer and drop the backlog.
    ///
    /// Completions already reported are applied first, so only buffers
    /// still playing are stopped. The next enqueue starts at the device's
    /// current time. Returns the number of buffers stopped.
    pub fn interrupt(&mut self) -> usize {
        self.drain_finished();
        let stopped = self.active.len();
        for (_, mut control) in self.active.drain() {
            control.stop();
        }
        self.next_start_time = 0.0;
        if stopped > 0 {
            tracing::debug!(stopped, "Interrupted playback");
        }
        stopped
    }

    /// Deregister a buffer that played to its end.
    ///
    /// Returns `false` if the buffer was already removed by an interrupt.
    pub fn mark_finished(&mut self, id: PlaybackId) -> bool {
        let removed = self.active.remove(&id).is_some();
        if removed {
            tracing::trace!(%id, "Audio buffer finished");
        }
        removed
    }

    /// Wait for the next natural completion reported by the output.
    pub async fn next_finished(&mut self) -> Option<PlaybackId> {
        self.finished_rx.recv().await
    }

    /// Apply every completion reported so far. Returns how many buffers
    /// were deregistered.
    pub fn drain_finished(&mut self) -> usize {
        let mut removed = 0;
        while let Ok(id) = self.finished_rx.try_recv() {
            if self.mark_finished(id) {
                removed += 1;
            }
        }
        removed
    }

    /// Number of buffers booked and not yet finished.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Device time at which the next buffer would start, before clamping
    /// to the current time.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Current device time.
    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    /// Stop playback and release the output. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.interrupt();
        self.output.close();
        self.closed = true;
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("format", &self.format)
            .field("next_start_time", &self.next_start_time)
            .field("active", &self.active.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_samples;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct OutputState {
        now: f64,
        booked: Vec<(PlaybackId, f64, f64)>,
        notifiers: Vec<PlaybackNotifier>,
        stopped: Vec<PlaybackId>,
        closes: usize,
    }

    #[derive(Clone, Default)]
    struct ManualOutput(Arc<Mutex<OutputState>>);

    impl ManualOutput {
        fn set_time(&self, now: f64) {
            self.0.lock().now = now;
        }

        fn finish_oldest(&self) -> Option<PlaybackId> {
            let mut state = self.0.lock();
            if state.notifiers.is_empty() {
                return None;
            }
            let notifier = state.notifiers.remove(0);
            let id = notifier.id();
            notifier.finished();
            Some(id)
        }
    }

    struct ManualControl {
        id: PlaybackId,
        state: Arc<Mutex<OutputState>>,
    }

    impl PlaybackControl for ManualControl {
        fn stop(&mut self) {
            self.state.lock().stopped.push(self.id);
        }
    }

    impl AudioOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            self.0.lock().now
        }

        fn schedule(
            &mut self,
            buffer: PcmBuffer,
            start_at: f64,
            notifier: PlaybackNotifier,
        ) -> Result<Box<dyn PlaybackControl>> {
            let id = notifier.id();
            let mut state = self.0.lock();
            state.booked.push((id, start_at, buffer.duration_secs()));
            state.notifiers.push(notifier);
            Ok(Box::new(ManualControl { id, state: self.0.clone() }))
        }

        fn close(&mut self) {
            self.0.lock().closes += 1;
        }
    }

    /// Chunk of `frames` silent samples at 24kHz.
    fn chunk(frames: usize) -> TransportChunk {
        encode_samples(&vec![0.0; frames], AudioFormat::pcm16_24khz())
    }

    fn scheduler() -> (PlaybackScheduler, ManualOutput) {
        let output = ManualOutput::default();
        let scheduler =
            PlaybackScheduler::new(Box::new(output.clone()), AudioFormat::pcm16_24khz());
        (scheduler, output)
    }

    #[test]
    fn test_chunks_play_back_to_back() {
        let (mut scheduler, _output) = scheduler();

        let first = scheduler.enqueue(&chunk(12_000)).unwrap().unwrap();
        let second = scheduler.enqueue(&chunk(6_000)).unwrap().unwrap();
        let third = scheduler.enqueue(&chunk(24_000)).unwrap().unwrap();

        assert_eq!(first.start_time, 0.0);
        assert_eq!(second.start_time, first.start_time + 0.5);
        assert_eq!(third.start_time, second.start_time + 0.25);
        assert_eq!(scheduler.next_start_time(), 1.75);
        assert_eq!(scheduler.active_count(), 3);
    }

    #[test]
    fn test_arrival_jitter_does_not_change_offsets() {
        let (mut instant, _) = scheduler();
        let instant_starts: Vec<f64> = [12_000, 6_000, 24_000]
            .into_iter()
            .map(|frames| instant.enqueue(&chunk(frames)).unwrap().unwrap().start_time)
            .collect();

        let (mut delayed, output) = scheduler();
        let mut delayed_starts = Vec::new();
        for (frames, now) in [(12_000, 0.0), (6_000, 0.25), (24_000, 0.5)] {
            output.set_time(now);
            delayed_starts.push(delayed.enqueue(&chunk(frames)).unwrap().unwrap().start_time);
        }

        assert_eq!(instant_starts, delayed_starts);
    }

    #[test]
    fn test_late_chunk_starts_now() {
        let (mut scheduler, output) = scheduler();
        scheduler.enqueue(&chunk(12_000)).unwrap();

        // Underrun: the device clock passed the booked horizon.
        output.set_time(2.0);
        let late = scheduler.enqueue(&chunk(6_000)).unwrap().unwrap();
        assert_eq!(late.start_time, 2.0);
        assert_eq!(scheduler.next_start_time(), 2.25);
    }

    #[test]
    fn test_interrupt_stops_all_and_resets_backlog() {
        let (mut scheduler, output) = scheduler();
        for _ in 0..3 {
            scheduler.enqueue(&chunk(24_000)).unwrap();
        }
        assert_eq!(scheduler.next_start_time(), 3.0);

        output.set_time(0.5);
        assert_eq!(scheduler.interrupt(), 3);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(output.0.lock().stopped.len(), 3);
        assert_eq!(scheduler.next_start_time(), 0.0);

        let next = scheduler.enqueue(&chunk(6_000)).unwrap().unwrap();
        assert_eq!(next.start_time, 0.5);
    }

    #[test]
    fn test_natural_completion_deregisters_once() {
        let (mut scheduler, output) = scheduler();
        scheduler.enqueue(&chunk(6_000)).unwrap();
        scheduler.enqueue(&chunk(6_000)).unwrap();

        output.finish_oldest();
        assert_eq!(scheduler.drain_finished(), 1);
        assert_eq!(scheduler.active_count(), 1);

        // An interrupt followed by a late completion for the same buffer
        // must not remove anything twice.
        assert_eq!(scheduler.interrupt(), 1);
        output.finish_oldest();
        assert_eq!(scheduler.drain_finished(), 0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_interrupt_skips_reported_completions() {
        let (mut scheduler, output) = scheduler();
        let first = scheduler.enqueue(&chunk(6_000)).unwrap().unwrap();
        scheduler.enqueue(&chunk(6_000)).unwrap();
        scheduler.enqueue(&chunk(6_000)).unwrap();

        // Reported but not yet drained when the interruption arrives.
        assert_eq!(output.finish_oldest(), Some(first.id));
        assert_eq!(scheduler.interrupt(), 2);

        let stopped = output.0.lock().stopped.clone();
        assert_eq!(stopped.len(), 2);
        assert!(!stopped.contains(&first.id));
    }

    #[test]
    fn test_malformed_chunk_leaves_schedule_intact() {
        let (mut scheduler, _output) = scheduler();
        scheduler.enqueue(&chunk(12_000)).unwrap();

        let odd = TransportChunk::from_bytes("audio/pcm;rate=24000", &[1, 2, 3]);
        assert!(matches!(scheduler.enqueue(&odd), Err(LiveError::MalformedPayload(_))));
        assert_eq!(scheduler.active_count(), 1);

        let next = scheduler.enqueue(&chunk(6_000)).unwrap().unwrap();
        assert_eq!(next.start_time, 0.5);
    }

    #[test]
    fn test_empty_chunk_is_skipped() {
        let (mut scheduler, output) = scheduler();
        assert!(scheduler.enqueue(&chunk(0)).unwrap().is_none());
        assert!(output.0.lock().booked.is_empty());
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_mime_rate_overrides_default_format() {
        let (mut scheduler, _output) = scheduler();
        let chunk = encode_samples(&vec![0.0; 8_000], AudioFormat::pcm16_16khz());
        let booked = scheduler.enqueue(&chunk).unwrap().unwrap();
        assert_eq!(booked.duration, 0.5);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut scheduler, output) = scheduler();
        scheduler.enqueue(&chunk(6_000)).unwrap();

        scheduler.close();
        scheduler.close();
        assert!(scheduler.is_closed());
        assert_eq!(output.0.lock().closes, 1);
        assert_eq!(output.0.lock().stopped.len(), 1);
        assert!(scheduler.enqueue(&chunk(6_000)).is_err());

        drop(scheduler);
        assert_eq!(output.0.lock().closes, 1);
    }

    #[tokio::test]
    async fn test_next_finished_reports_completion() {
        let (mut scheduler, output) = scheduler();
        let booked = scheduler.enqueue(&chunk(6_000)).unwrap().unwrap();

        output.finish_oldest();
        let id = scheduler.next_finished().await.unwrap();
        assert_eq!(id, booked.id);
        assert!(scheduler.mark_finished(id));
        assert!(!scheduler.mark_finished(id));
    }
}
