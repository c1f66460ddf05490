//! Event and state types shared by the session boundary and the controller.

use serde::{Deserialize, Serialize};

use crate::codec::TransportChunk;

// ── Session events ──────────────────────────────────────────────────────

/// Events delivered by a remote streaming session.
///
/// These replace the open/message/close/error callbacks of a callback-style
/// client with one typed stream consumed by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session finished its handshake and accepts input.
    Open,
    /// An inbound server message.
    Message(ServerMessage),
    /// The remote side closed the session.
    Closed {
        /// Close reason, when the remote side gave one.
        reason: Option<String>,
    },
    /// The remote side reported a session-level error.
    Error(String),
}

impl SessionEvent {
    /// Whether the session ends after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Error(_))
    }
}

/// One inbound message from the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    /// Inline speech audio.
    pub audio: Option<TransportChunk>,
    /// The user started speaking over the model.
    pub interrupted: bool,
    /// The model finished its turn.
    pub turn_complete: bool,
    /// Inline text, for text modalities.
    pub text: Option<String>,
}

impl ServerMessage {
    /// A message carrying one audio chunk.
    pub fn audio(chunk: TransportChunk) -> Self {
        Self { audio: Some(chunk), ..Default::default() }
    }

    /// A barge-in notification.
    pub fn interrupted() -> Self {
        Self { interrupted: true, ..Default::default() }
    }

    /// An end-of-turn notification.
    pub fn turn_complete() -> Self {
        Self { turn_complete: true, ..Default::default() }
    }
}

// ── Lifecycle state ─────────────────────────────────────────────────────

/// Lifecycle state of a live session, as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// No session; every resource released.
    #[default]
    Disconnected,
    /// Devices being acquired and the session opening.
    Connecting,
    /// Session open and capture running.
    Live,
    /// The session failed; teardown follows immediately.
    Error,
}

impl SessionState {
    /// Status string shown by the UI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Live => "Live",
            Self::Error => "Error",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Live)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Live, Error)
                | (Live, Disconnected)
                | (Error, Disconnected)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state transition, broadcast to status subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// The state entered.
    pub state: SessionState,
    /// Error message for `Error`, close reason for `Disconnected`.
    pub detail: Option<String>,
}
