//! # Desktop Live Voice Example
//!
//! Talks to a Gemini Live model through the default microphone and speaker.
//! Speak over the model to interrupt it; press Ctrl-C to end the session.
//!
//! ## Environment Variables
//!
//! | Variable         | Required | Description                                     |
//! |------------------|----------|-------------------------------------------------|
//! | `GEMINI_API_KEY` | **Yes**  | AI Studio key (`GOOGLE_API_KEY` also accepted)  |
//! | `LIVE_CONFIG`    | No       | Path to a TOML file overriding the defaults     |
//! | `RUST_LOG`       | No       | Log filter, e.g. `live_bridge=debug`            |
//!
//! ## Running
//!
//! ```sh
//! cargo run -p live-bridge --example desktop_live --features desktop-audio
//! ```

use std::sync::Arc;

use live_bridge::desktop::DesktopDevices;
use live_bridge::gemini::GeminiLiveConnector;
use live_bridge::{LiveConfig, LiveController};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("live_bridge=info")),
        )
        .init();

    // --- 1. Configuration ---
    let config = match std::env::var("LIVE_CONFIG") {
        Ok(path) => LiveConfig::from_file(path)?,
        Err(_) => LiveConfig::default()
            .with_instruction("You are a friendly conversation partner. Keep answers short."),
    }
    .without_video();

    let (input, output) = DesktopDevices::describe();
    println!("Microphone: {}", input.as_deref().unwrap_or("none"));
    println!("Speaker:    {}", output.as_deref().unwrap_or("none"));

    // --- 2. Controller ---
    let live = LiveController::spawn(
        config,
        Arc::new(GeminiLiveConnector::from_env()?),
        Arc::new(DesktopDevices::new()),
    );

    let mut updates = live.subscribe_updates();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update.detail {
                Some(detail) => println!("[{}] {detail}", update.state),
                None => println!("[{}]", update.state),
            }
        }
    });

    // --- 3. Run until Ctrl-C ---
    live.start_live_session().await?;
    tokio::signal::ctrl_c().await?;

    println!("\nEnding session...");
    live.stop_live_session().await?;
    live.shutdown().await?;
    Ok(())
}
