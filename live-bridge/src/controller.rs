//! Session lifecycle controller.
//!
//! [`LiveController`] is a single task that owns every session resource. The
//! UI talks to it through a cloneable [`LiveControllerHandle`]; the remote
//! session, the connect attempt and the audio output talk to it through
//! channels. Nothing else mutates session state, so a `stop` can never race
//! an in-flight chunk: every inbound event carries the generation of the
//! session that produced it and events from an older generation are dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureHandle, CapturePipeline};
use crate::codec::TransportChunk;
use crate::config::LiveConfig;
use crate::device::{MediaConstraints, MediaDevices, MediaStream};
use crate::error::{LiveError, Result};
use crate::events::{ServerMessage, SessionEvent, SessionState, StatusUpdate};
use crate::playback::{AudioOutput, PlaybackId, PlaybackScheduler};
use crate::session::{LiveConnector, SharedSession};

/// How long teardown waits for the remote session to close.
pub const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const COMMAND_CAPACITY: usize = 16;
const UPDATE_CAPACITY: usize = 64;

enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Devices and session produced by a successful connect attempt.
struct Established {
    stream: MediaStream,
    output: Box<dyn AudioOutput>,
    session: SharedSession,
}

enum ControllerEvent {
    Established(Result<Established>),
    Session(SessionEvent),
    Failed(LiveError),
}

struct Tagged {
    generation: u64,
    event: ControllerEvent,
}

enum Step {
    Command(Option<Command>),
    Event(Tagged),
    Finished(PlaybackId),
}

/// Everything a session may hold. Each field is released at most once and
/// `release` may run from any partially started state.
#[derive(Default)]
struct SessionResources {
    connecting: Option<JoinHandle<()>>,
    capture: Option<CaptureHandle>,
    forwarder: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    playback: Option<PlaybackScheduler>,
    session: Option<SharedSession>,
    stream: Option<MediaStream>,
}

impl SessionResources {
    async fn release(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.join().await;
        }
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        if let Some(task) = self.pump.take() {
            task.abort();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.close();
        }
        if let Some(session) = self.session.take() {
            close_session(session).await;
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
        }
    }
}

async fn close_session(session: SharedSession) {
    let session_id = session.session_id().to_string();
    match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => debug!(%session_id, "Session closed"),
        Ok(Err(e)) => warn!(%session_id, error = %e, "Session close failed"),
        Err(_) => warn!(%session_id, "Session close timed out"),
    }
}

/// The lifecycle controller task.
///
/// States move `Disconnected -> Connecting -> Live -> Disconnected`, through
/// `Error` on any session-level failure. Start while not disconnected and
/// stop while disconnected are no-ops.
pub struct LiveController {
    config: LiveConfig,
    connector: Arc<dyn LiveConnector>,
    devices: Arc<dyn MediaDevices>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<Tagged>,
    events_rx: mpsc::Receiver<Tagged>,
    state_tx: watch::Sender<SessionState>,
    updates_tx: broadcast::Sender<StatusUpdate>,
    generation: u64,
    resources: SessionResources,
}

impl LiveController {
    /// Spawn the controller on the current Tokio runtime.
    pub fn spawn(
        config: LiveConfig,
        connector: Arc<dyn LiveConnector>,
        devices: Arc<dyn MediaDevices>,
    ) -> LiveControllerHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (updates_tx, _) = broadcast::channel(UPDATE_CAPACITY);

        let controller = Self {
            config,
            connector,
            devices,
            commands,
            events_tx,
            events_rx,
            state_tx,
            updates_tx: updates_tx.clone(),
            generation: 0,
            resources: SessionResources::default(),
        };
        tokio::spawn(controller.run());

        LiveControllerHandle { commands: commands_tx, state: state_rx, updates: updates_tx }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    async fn run(mut self) {
        info!(
            provider = self.connector.provider(),
            model = %self.config.model,
            "Live controller started"
        );

        loop {
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                Some(tagged) = self.events_rx.recv() => Step::Event(tagged),
                Some(id) = playback_finished(&mut self.resources.playback) => Step::Finished(id),
            };

            match step {
                Step::Command(Some(Command::Start(ack))) => {
                    let _ = ack.send(self.start());
                }
                Step::Command(Some(Command::Stop(ack))) => {
                    self.stop().await;
                    let _ = ack.send(());
                }
                Step::Command(Some(Command::Shutdown(ack))) => {
                    self.stop().await;
                    let _ = ack.send(());
                    break;
                }
                Step::Command(None) => {
                    self.stop().await;
                    break;
                }
                Step::Event(tagged) => self.handle_event(tagged).await,
                Step::Finished(id) => {
                    if let Some(playback) = self.resources.playback.as_mut() {
                        playback.mark_finished(id);
                    }
                }
            }
        }

        info!("Live controller stopped");
    }

    fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != SessionState::Disconnected {
            debug!(%state, "Start ignored, session already active");
            return Ok(());
        }
        self.config.validate()?;

        self.generation += 1;
        let generation = self.generation;
        self.transition(SessionState::Connecting, None);

        let config = self.config.clone();
        let connector = self.connector.clone();
        let devices = self.devices.clone();
        let events = self.events_tx.clone();
        self.resources.connecting = Some(tokio::spawn(async move {
            let result = connect(&config, connector.as_ref(), devices.as_ref()).await;
            let tagged = Tagged { generation, event: ControllerEvent::Established(result) };
            let _ = events.send(tagged).await;
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        if self.state() == SessionState::Disconnected {
            debug!("Stop ignored, no active session");
            return;
        }
        // Anything still in flight for the old session is now stale.
        self.generation += 1;
        self.resources.release().await;
        self.transition(SessionState::Disconnected, None);
    }

    /// Session-level failure: surface it, then tear down.
    async fn fail(&mut self, error: LiveError) {
        error!(error = %error, "Live session failed");
        self.generation += 1;
        self.transition(SessionState::Error, Some(error.to_string()));
        self.resources.release().await;
        self.transition(SessionState::Disconnected, None);
    }

    async fn handle_event(&mut self, tagged: Tagged) {
        let Tagged { generation, event } = tagged;
        if generation != self.generation {
            match event {
                ControllerEvent::Established(Ok(established)) => {
                    debug!(generation, "Discarding connection from a stopped session");
                    discard(established).await;
                }
                _ => debug!(generation, "Discarding event from a stopped session"),
            }
            return;
        }

        match event {
            ControllerEvent::Established(Ok(established)) => self.on_established(established),
            ControllerEvent::Established(Err(e)) => {
                self.resources.connecting = None;
                self.fail(e).await;
            }
            ControllerEvent::Session(SessionEvent::Open) => self.on_open(),
            ControllerEvent::Session(SessionEvent::Message(message)) => self.on_message(message),
            ControllerEvent::Session(SessionEvent::Closed { reason }) => {
                info!(reason = reason.as_deref().unwrap_or("none"), "Session closed by remote");
                self.generation += 1;
                self.resources.release().await;
                self.transition(SessionState::Disconnected, reason);
            }
            ControllerEvent::Session(SessionEvent::Error(message)) => {
                self.fail(LiveError::session(message)).await;
            }
            ControllerEvent::Failed(e) => self.fail(e).await,
        }
    }

    fn on_established(&mut self, established: Established) {
        let Established { stream, output, session } = established;
        self.resources.connecting = None;
        debug!(session_id = session.session_id(), "Session opened, waiting for setup");

        self.resources.playback = Some(PlaybackScheduler::new(output, self.config.output_format));
        self.resources.pump = Some(tokio::spawn(pump_events(
            session.clone(),
            self.generation,
            self.events_tx.clone(),
        )));
        self.resources.session = Some(session);
        self.resources.stream = Some(stream);
    }

    fn on_open(&mut self) {
        if self.state() != SessionState::Connecting {
            debug!(state = %self.state(), "Ignoring duplicate open");
            return;
        }
        let (Some(session), Some(stream)) =
            (self.resources.session.clone(), self.resources.stream.as_mut())
        else {
            warn!("Open received before connection was established");
            return;
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        self.resources.capture = Some(CapturePipeline::start(
            stream,
            &self.config.capture,
            self.config.input_format,
            outbound_tx,
        ));
        self.resources.forwarder = Some(tokio::spawn(forward_input(session, outbound_rx)));
        self.transition(SessionState::Live, None);
    }

    fn on_message(&mut self, message: ServerMessage) {
        if self.state() != SessionState::Live {
            debug!(state = %self.state(), "Ignoring message outside a live session");
            return;
        }
        let Some(playback) = self.resources.playback.as_mut() else {
            return;
        };

        if message.interrupted {
            let stopped = playback.interrupt();
            info!(stopped, "Model interrupted by user");
        } else if let Some(chunk) = message.audio {
            if !chunk.is_audio() {
                debug!(mime_type = chunk.mime_type(), "Ignoring non-audio inline data");
            } else if let Err(e) = playback.enqueue(&chunk) {
                warn!(error = %e, mime_type = chunk.mime_type(), "Dropping audio chunk");
            }
        }

        if let Some(text) = message.text.as_deref() {
            debug!(text, "Model text");
        }
        if message.turn_complete {
            debug!("Model turn complete");
        }
    }

    fn transition(&mut self, next: SessionState, detail: Option<String>) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Ignoring illegal state transition");
            return;
        }
        info!(
            from = %current,
            to = %next,
            detail = detail.as_deref().unwrap_or(""),
            "Live session state changed"
        );
        self.state_tx.send_replace(next);
        let _ = self.updates_tx.send(StatusUpdate { state: next, detail });
    }
}

async fn connect(
    config: &LiveConfig,
    connector: &dyn LiveConnector,
    devices: &dyn MediaDevices,
) -> Result<Established> {
    let constraints = MediaConstraints { audio: true, video: config.capture.video };
    let stream = devices.acquire(constraints).await?;
    debug!(?stream, "Media devices acquired");
    let output = devices.open_output(config.output_format)?;
    let session = connector.open(config).await?;
    Ok(Established { stream, output, session })
}

/// Release a connection that completed after its session was stopped.
async fn discard(established: Established) {
    let Established { mut stream, mut output, session } = established;
    output.close();
    stream.stop_tracks();
    close_session(session).await;
}

async fn playback_finished(playback: &mut Option<PlaybackScheduler>) -> Option<PlaybackId> {
    match playback {
        Some(playback) => playback.next_finished().await,
        None => std::future::pending().await,
    }
}

/// Read session events into the controller until the session ends.
async fn pump_events(session: SharedSession, generation: u64, events: mpsc::Sender<Tagged>) {
    loop {
        let event = match session.next_event().await {
            Some(Ok(event)) => event,
            Some(Err(e)) if e.is_recoverable() => {
                warn!(error = %e, "Dropping inbound message");
                continue;
            }
            Some(Err(e)) => {
                let tagged = Tagged { generation, event: ControllerEvent::Failed(e) };
                let _ = events.send(tagged).await;
                break;
            }
            None => SessionEvent::Closed { reason: None },
        };

        let terminal = event.is_terminal();
        let tagged = Tagged { generation, event: ControllerEvent::Session(event) };
        if events.send(tagged).await.is_err() || terminal {
            break;
        }
    }
}

/// Send captured chunks to the session in capture order.
async fn forward_input(session: SharedSession, mut outbound: mpsc::Receiver<TransportChunk>) {
    let mut sent = 0u64;
    let mut failed = 0u64;
    while let Some(chunk) = outbound.recv().await {
        match session.send_input(&chunk).await {
            Ok(()) => sent += 1,
            Err(e) => {
                failed += 1;
                warn!(
                    error = %e,
                    mime_type = chunk.mime_type(),
                    failed,
                    "Failed to send input chunk"
                );
            }
        }
    }
    debug!(sent, failed, "Input forwarder stopped");
}

/// UI-facing handle to a running [`LiveController`].
#[derive(Clone)]
pub struct LiveControllerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    updates: broadcast::Sender<StatusUpdate>,
}

impl LiveControllerHandle {
    /// Begin a live session. Returns once the controller is `Connecting`, or
    /// immediately if a session is already active.
    pub async fn start_live_session(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Start(ack)).await?;
        done.await.map_err(|_| LiveError::ControllerClosed)?
    }

    /// End the live session and release every resource. Safe in any state.
    pub async fn stop_live_session(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Stop(ack)).await?;
        done.await.map_err(|_| LiveError::ControllerClosed)
    }

    /// Stop any session and end the controller task.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown(ack)).await?;
        done.await.map_err(|_| LiveError::ControllerClosed)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes the current state.
    pub fn watch_status(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Receiver for every transition, including transient `Error` states.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| LiveError::ControllerClosed)
    }
}

impl std::fmt::Debug for LiveControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveControllerHandle").field("status", &self.status()).finish()
    }
}
