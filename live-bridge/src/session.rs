//! Remote streaming session boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::TransportChunk;
use crate::config::LiveConfig;
use crate::error::Result;
use crate::events::SessionEvent;

/// An open bidirectional streaming session with a remote model.
///
/// All methods take `&self` so one session can be shared between the task
/// forwarding captured input and the task reading inbound events.
///
/// # Example
///
/// ```rust,ignore
/// use live_bridge::{LiveSession, SessionEvent};
///
/// async fn drain(session: &dyn LiveSession) {
///     while let Some(event) = session.next_event().await {
///         match event {
///             Ok(SessionEvent::Message(msg)) => { /* route audio / interruption */ }
///             Ok(event) if event.is_terminal() => break,
///             Ok(_) => {}
///             Err(e) => tracing::warn!(error = %e, "bad inbound message"),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Get the session ID.
    fn session_id(&self) -> &str;

    /// Check if the session is currently connected.
    fn is_connected(&self) -> bool;

    /// Send one realtime input chunk (audio frame or video still).
    async fn send_input(&self, chunk: &TransportChunk) -> Result<()>;

    /// Get the next event from the server.
    ///
    /// Returns `None` once the session is closed. Errors for which
    /// [`LiveError::is_recoverable`](crate::LiveError::is_recoverable) holds
    /// only affect one message.
    async fn next_event(&self) -> Option<Result<SessionEvent>>;

    /// Close the session gracefully.
    async fn close(&self) -> Result<()>;
}

/// A session shared between the controller and its worker tasks.
pub type SharedSession = Arc<dyn LiveSession>;

/// A factory for opening live sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Get the provider name (e.g., "gemini").
    fn provider(&self) -> &str;

    /// Connect and configure a new session.
    ///
    /// The returned session delivers [`SessionEvent::Open`] once the remote
    /// side has accepted the configuration.
    async fn open(&self, config: &LiveConfig) -> Result<SharedSession>;
}
