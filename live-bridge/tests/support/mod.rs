//! In-memory fakes for the session, device and output boundaries.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use live_bridge::{
    AudioFormat, AudioOutput, AudioSource, LiveConfig, LiveConnector, LiveControllerHandle,
    LiveError, LiveSession, MediaConstraints, MediaDevices, MediaStream, MediaTrack, PcmBuffer,
    PlaybackControl, PlaybackId, PlaybackNotifier, Result, SessionEvent, SessionState,
    SharedSession, TrackKind, TransportChunk, VideoFrame, VideoSource, encode_samples,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration used by most controller tests.
pub fn audio_config() -> LiveConfig {
    LiveConfig::default().without_video()
}

/// A 24kHz model speech chunk of `frames` samples.
pub fn speech(frames: usize) -> TransportChunk {
    encode_samples(&vec![0.1; frames], AudioFormat::pcm16_24khz())
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until the controller reports `state`.
pub async fn wait_for_state(handle: &LiveControllerHandle, state: SessionState) {
    let mut status = handle.watch_status();
    tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("controller dropped status channel");
}

// ── Output ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Booking {
    pub id: PlaybackId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
struct OutputState {
    now: f64,
    bookings: Vec<Booking>,
    notifiers: Vec<PlaybackNotifier>,
    stopped: usize,
    closes: usize,
}

/// Audio output whose clock only moves when the test says so.
#[derive(Clone, Default)]
pub struct ManualClockOutput {
    state: Arc<Mutex<OutputState>>,
}

impl ManualClockOutput {
    pub fn set_time(&self, now: f64) {
        self.state.lock().now = now;
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.state.lock().bookings.clone()
    }

    pub fn stopped(&self) -> usize {
        self.state.lock().stopped
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// Report natural completion of the oldest booked buffer.
    pub fn finish_oldest(&self) -> Option<PlaybackId> {
        let mut state = self.state.lock();
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
    state: Arc<Mutex<OutputState>>,
}

impl PlaybackControl for ManualControl {
    fn stop(&mut self) {
        self.state.lock().stopped += 1;
    }
}

impl AudioOutput for ManualClockOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn schedule(
        &mut self,
        buffer: PcmBuffer,
        start_at: f64,
        notifier: PlaybackNotifier,
    ) -> Result<Box<dyn PlaybackControl>> {
        let mut state = self.state.lock();
        state.bookings.push(Booking {
            id: notifier.id(),
            start: start_at,
            duration: buffer.duration_secs(),
        });
        state.notifiers.push(notifier);
        Ok(Box::new(ManualControl { state: self.state.clone() }))
    }

    fn close(&mut self) {
        self.state.lock().closes += 1;
    }
}

// ── Devices ─────────────────────────────────────────────────────────────

struct CountingTrack {
    kind: TrackKind,
    stops: Arc<AtomicUsize>,
}

impl MediaTrack for CountingTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        match self.kind {
            TrackKind::Audio => "fake-mic",
            TrackKind::Video => "fake-camera",
        }
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedMic {
    blocks: mpsc::UnboundedReceiver<Vec<f32>>,
}

#[async_trait]
impl AudioSource for ScriptedMic {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    async fn next_block(&mut self) -> Option<Vec<f32>> {
        self.blocks.recv().await
    }
}

struct StillCamera;

#[async_trait]
impl VideoSource for StillCamera {
    async fn grab_frame(&mut self) -> Result<Option<VideoFrame>> {
        Ok(Some(VideoFrame::new(4, 4, vec![200; 4 * 4 * 3])))
    }
}

/// Media devices backed by a scripted microphone, a still camera and
/// manual-clock outputs.
#[derive(Default)]
pub struct FakeDevices {
    fail_acquire: bool,
    fail_output: bool,
    acquire_delay: Option<Duration>,
    mics: Mutex<Vec<mpsc::UnboundedSender<Vec<f32>>>>,
    outputs: Mutex<Vec<ManualClockOutput>>,
    tracks_created: AtomicUsize,
    track_stops: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisition fails as if permission were denied.
    pub fn denied() -> Self {
        Self { fail_acquire: true, ..Self::default() }
    }

    /// The speaker cannot be opened.
    pub fn without_speaker() -> Self {
        Self { fail_output: true, ..Self::default() }
    }

    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = Some(delay);
        self
    }

    /// Feed one block into the most recently acquired microphone.
    pub fn push_mic(&self, block: Vec<f32>) {
        if let Some(mic) = self.mics.lock().last() {
            let _ = mic.send(block);
        }
    }

    pub fn output(&self) -> Option<ManualClockOutput> {
        self.outputs.lock().last().cloned()
    }

    pub fn outputs_opened(&self) -> usize {
        self.outputs.lock().len()
    }

    pub fn output_closes(&self) -> usize {
        self.outputs.lock().iter().map(ManualClockOutput::closes).sum()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn tracks_created(&self) -> usize {
        self.tracks_created.load(Ordering::SeqCst)
    }

    pub fn track_stops(&self) -> usize {
        self.track_stops.load(Ordering::SeqCst)
    }

    fn track(&self, kind: TrackKind) -> Box<dyn MediaTrack> {
        self.tracks_created.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingTrack { kind, stops: self.track_stops.clone() })
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_acquire {
            return Err(LiveError::device("permission denied"));
        }

        let mut stream = MediaStream::new();
        if constraints.audio {
            let (tx, blocks) = mpsc::unbounded_channel();
            self.mics.lock().push(tx);
            let mic = Box::new(ScriptedMic { blocks });
            stream = stream.with_audio(self.track(TrackKind::Audio), mic);
        }
        if constraints.video {
            stream = stream.with_video(self.track(TrackKind::Video), Box::new(StillCamera));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }

    fn open_output(&self, _format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        if self.fail_output {
            return Err(LiveError::device("no speaker"));
        }
        let output = ManualClockOutput::default();
        self.outputs.lock().push(output.clone());
        Ok(Box::new(output))
    }
}

// ── Session ─────────────────────────────────────────────────────────────

/// A remote session driven by the test.
pub struct FakeSession {
    id: String,
    events_tx: mpsc::UnboundedSender<Result<SessionEvent>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<SessionEvent>>>,
    sent: Mutex<Vec<TransportChunk>>,
    send_attempts: AtomicUsize,
    fail_sends: AtomicBool,
    closes: AtomicUsize,
}

impl FakeSession {
    fn new(id: String) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id,
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(Ok(event));
    }

    pub fn emit_err(&self, error: LiveError) {
        let _ = self.events_tx.send(Err(error));
    }

    pub fn sent(&self) -> Vec<TransportChunk> {
        self.sent.lock().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveSession for FakeSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.closes() == 0
    }

    async fn send_input(&self, chunk: &TransportChunk) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LiveError::send("network unreachable"));
        }
        self.sent.lock().push(chunk.clone());
        Ok(())
    }

    async fn next_event(&self) -> Option<Result<SessionEvent>> {
        self.events_rx.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`FakeSession`]s.
pub struct FakeConnector {
    auto_open: bool,
    fail: Option<String>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    /// Sessions report `Open` as soon as they are created.
    pub fn new() -> Self {
        Self { auto_open: true, fail: None, sessions: Mutex::new(Vec::new()) }
    }

    /// Sessions wait for the test to emit `Open`.
    pub fn manual_open() -> Self {
        Self { auto_open: false, ..Self::new() }
    }

    /// Every open fails.
    pub fn failing(message: &str) -> Self {
        Self { fail: Some(message.to_string()), ..Self::new() }
    }

    pub fn latest(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().last().cloned()
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn total_closes(&self) -> usize {
        self.sessions.lock().iter().map(|s| s.closes()).sum()
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn open(&self, config: &LiveConfig) -> Result<SharedSession> {
        if let Some(message) = &self.fail {
            return Err(LiveError::connection(message.clone()));
        }
        let mut sessions = self.sessions.lock();
        let session = Arc::new(FakeSession::new(format!("{}-{}", config.model, sessions.len())));
        if self.auto_open {
            session.emit(SessionEvent::Open);
        }
        sessions.push(session.clone());
        Ok(session)
    }
}
