//! # live-bridge
//!
//! Real-time audio/video live sessions with hosted multimodal models.
//!
//! The bridge opens a bidirectional streaming session, streams microphone
//! audio and periodic camera stills into it as they are produced, and plays
//! the model's streamed speech back without gaps, flushing it instantly when
//! the user talks over the model.
//!
//! ## Architecture
//!
//! ```text
//!   MediaDevices ──acquire──▶ MediaStream
//!                                 │ sources
//!                        ┌────────▼─────────┐  TransportChunk   ┌─────────────┐
//!                        │ CapturePipeline  │ ───────────────▶  │ LiveSession │
//!                        │ (audio + video)  │   bounded mpsc    │  (remote)   │
//!                        └──────────────────┘                   └──────┬──────┘
//!                                                                      │ SessionEvent
//!   ┌──────────────────┐      enqueue / interrupt     ┌────────────────▼──┐
//!   │ PlaybackScheduler│ ◀─────────────────────────── │  LiveController   │
//!   │  (AudioOutput)   │                              │ (state machine)   │
//!   └──────────────────┘                              └───────────────────┘
//! ```
//!
//! ## Features
//!
//! - **PCM codec**: float samples to base64 PCM16 and back
//! - **Capture**: fixed-size 16kHz frames plus JPEG stills on a timer
//! - **Gapless playback**: chunks booked back-to-back on the device clock
//! - **Barge-in**: interruption stops every scheduled buffer at once
//! - **Lifecycle**: `Disconnected → Connecting → Live`, with idempotent teardown
//! - **Gemini Live** (feature `gemini`, default)
//! - **Desktop audio** through cpal (feature `desktop-audio`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use live_bridge::{LiveConfig, LiveController};
//! use live_bridge::gemini::GeminiLiveConnector;
//! use live_bridge::desktop::DesktopDevices;
//!
//! let config = LiveConfig::default()
//!     .with_instruction("You are a friendly interviewer.")
//!     .without_video();
//! let live = LiveController::spawn(
//!     config,
//!     Arc::new(GeminiLiveConnector::from_env()?),
//!     Arc::new(DesktopDevices::new()),
//! );
//!
//! live.start_live_session().await?;
//! println!("{}", live.status());
//! live.stop_live_session().await?;
//! ```

pub mod audio;
pub mod capture;
pub mod codec;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod video;

// Provider implementations
#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "desktop-audio")]
pub mod desktop;

// Re-exports
pub use audio::{AudioFormat, AudioFrame, FrameAccumulator, MonoResampler, scaled_len};
pub use capture::{CaptureHandle, CapturePipeline};
pub use codec::{PcmBuffer, TransportChunk, decode_chunk, encode_samples};
pub use config::{CaptureConfig, LiveConfig, LiveConfigBuilder};
pub use controller::{LiveController, LiveControllerHandle};
pub use device::{
    AudioSource, MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind, VideoSource,
};
pub use error::{LiveError, Result};
pub use events::{ServerMessage, SessionEvent, SessionState, StatusUpdate};
pub use playback::{
    AudioOutput, PlaybackControl, PlaybackId, PlaybackNotifier, PlaybackScheduler,
    ScheduledPlayback,
};
pub use session::{LiveConnector, LiveSession, SharedSession};
pub use video::{VideoFrame, encode_jpeg};
