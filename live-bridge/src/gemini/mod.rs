//! Gemini Live API transport.
//!
//! Implements [`LiveConnector`](crate::LiveConnector) and
//! [`LiveSession`](crate::LiveSession) over Google's WebSocket-based Live API:
//!
//! - Input audio: 16kHz mono PCM, sent as `realtimeInput.mediaChunks`
//! - Input video: JPEG stills on the same channel
//! - Output audio: 24kHz mono PCM in `serverContent.modelTurn` inline data
//! - Barge-in reported as `serverContent.interrupted`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use live_bridge::gemini::GeminiLiveConnector;
//! use live_bridge::{LiveConfig, LiveConnector};
//!
//! let connector = GeminiLiveConnector::from_env()?;
//! let config = LiveConfig::default().with_instruction("You are a helpful tutor.");
//! let session = connector.open(&config).await?;
//! ```

mod connector;
mod session;

pub use connector::GeminiLiveConnector;
pub use session::GeminiLiveSession;

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Available voices for Gemini Live (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Environment variables searched for an API key, in order.
pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];
