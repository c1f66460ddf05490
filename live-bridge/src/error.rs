//! Error types for the live-session bridge.

use thiserror::Error;

/// Result type for live-session operations.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur while running a live session.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Camera or microphone denied or missing.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transport chunk that cannot be decoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Sending an input chunk over the session failed.
    #[error("Send failure: {0}")]
    SendFailure(String),

    /// The remote session reported an error.
    #[error("Session error: {0}")]
    SessionError(String),

    /// Connection could not be established.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No session is open.
    #[error("Session not connected")]
    NotConnected,

    /// The audio output refused a playback request.
    #[error("Playback error: {0}")]
    PlaybackError(String),

    /// Sample-rate conversion failed for one block.
    #[error("Resample error: {0}")]
    ResampleError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The controller task is no longer running.
    #[error("Live controller has shut down")]
    ControllerClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LiveError {
    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    /// Create a new malformed payload error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a new send failure.
    pub fn send<S: Into<String>>(msg: S) -> Self {
        Self::SendFailure(msg.into())
    }

    /// Create a new session error.
    pub fn session<S: Into<String>>(msg: S) -> Self {
        Self::SessionError(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new playback error.
    pub fn playback<S: Into<String>>(msg: S) -> Self {
        Self::PlaybackError(msg.into())
    }

    /// Create a new resample error.
    pub fn resample<S: Into<String>>(msg: S) -> Self {
        Self::ResampleError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the error only affects a single unit of the stream.
    ///
    /// Recoverable errors drop the offending chunk and let the session
    /// continue. Everything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload(_)
                | Self::SendFailure(_)
                | Self::PlaybackError(_)
                | Self::ResampleError(_)
                | Self::SerializationError(_)
        )
    }
}
