//! Gemini Live WebSocket session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::codec::TransportChunk;
use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::events::{ServerMessage, SessionEvent};
use crate::session::LiveSession;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// Client message envelope. Exactly one field is set per message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<GeminiSetup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<GeminiRealtimeInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiSetup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: Value,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRealtimeInput {
    media_chunks: Vec<TransportChunk>,
}

fn setup_message(config: &LiveConfig) -> GeminiClientMessage {
    let mut generation_config = json!({
        "responseModalities": config.response_modalities,
    });

    if let Some(voice) = &config.voice {
        generation_config["speechConfig"] = json!({
            "voiceConfig": {
                "prebuiltVoiceConfig": {
                    "voiceName": voice
                }
            }
        });
    }

    if let Some(temp) = config.temperature {
        generation_config["temperature"] = json!(temp);
    }

    let system_instruction = config.instruction.as_ref().map(|text| GeminiContent {
        parts: vec![GeminiTextPart { text: text.clone() }],
    });

    GeminiClientMessage {
        setup: Some(GeminiSetup {
            model: config.model.clone(),
            system_instruction,
            generation_config,
        }),
        realtime_input: None,
    }
}

fn input_message(chunk: &TransportChunk) -> GeminiClientMessage {
    GeminiClientMessage {
        setup: None,
        realtime_input: Some(GeminiRealtimeInput { media_chunks: vec![chunk.clone()] }),
    }
}

/// Translate one server frame into a session event.
///
/// Returns `Ok(None)` for frames that carry nothing the bridge routes
/// (usage metadata, transcriptions, go-away notices).
fn translate(raw: &str) -> Result<Option<SessionEvent>> {
    let value: Value = serde_json::from_str(raw)?;

    if value.get("setupComplete").is_some() {
        return Ok(Some(SessionEvent::Open));
    }

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Ok(Some(SessionEvent::Error(message)));
    }

    if let Some(go_away) = value.get("goAway") {
        let time_left = go_away.get("timeLeft").unwrap_or(&Value::Null);
        tracing::debug!(%time_left, "Server going away");
        return Ok(None);
    }

    let Some(content) = value.get("serverContent") else {
        return Ok(None);
    };

    let mut message = ServerMessage {
        interrupted: content.get("interrupted").and_then(Value::as_bool).unwrap_or(false),
        turn_complete: content.get("turnComplete").and_then(Value::as_bool).unwrap_or(false),
        ..Default::default()
    };

    let parts = content
        .get("modelTurn")
        .and_then(|turn| turn.get("parts"))
        .and_then(Value::as_array);
    for part in parts.into_iter().flatten() {
        if let Some(inline) = part.get("inlineData") {
            let mime_type = inline.get("mimeType").and_then(Value::as_str).unwrap_or_default();
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if message.audio.is_none() && mime_type.starts_with("audio/") {
                message.audio = Some(TransportChunk::new(mime_type, data));
            }
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            message.text.get_or_insert_with(String::new).push_str(text);
        }
    }

    if message == ServerMessage::default() {
        return Ok(None);
    }
    Ok(Some(SessionEvent::Message(message)))
}

fn close_event(frame: Option<&CloseFrame>) -> SessionEvent {
    let Some(frame) = frame else {
        return SessionEvent::Closed { reason: None };
    };
    let reason = frame.reason.as_str().to_string();
    match frame.code {
        CloseCode::Normal | CloseCode::Away => SessionEvent::Closed {
            reason: (!reason.is_empty()).then_some(reason),
        },
        code => SessionEvent::Error(format!("closed with code {}: {reason}", u16::from(code))),
    }
}

/// Gemini Live session.
///
/// Manages a WebSocket connection to Google's Gemini Live API.
pub struct GeminiLiveSession {
    session_id: String,
    connected: Arc<AtomicBool>,
    sender: Arc<Mutex<WsSink>>,
    receiver: Arc<Mutex<WsSource>>,
}

impl GeminiLiveSession {
    /// Connect to `url` and send the setup message for `config`.
    ///
    /// The session reports [`SessionEvent::Open`] when the server
    /// acknowledges the setup.
    pub async fn connect(url: &str, config: &LiveConfig) -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let request = url.into_client_request().map_err(|e| {
            LiveError::connection(format!("Failed to create client request: {}", e))
        })?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| LiveError::connection(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = stream.split();
        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            connected: Arc::new(AtomicBool::new(true)),
            sender: Arc::new(Mutex::new(sink)),
            receiver: Arc::new(Mutex::new(source)),
        };

        tracing::info!(
            session_id = %session.session_id,
            model = %config.model,
            "Sending setup message"
        );
        session.send_raw(&setup_message(config)).await?;
        Ok(session)
    }

    async fn send_raw<T: Serialize>(&self, value: &T) -> Result<()> {
        let msg = serde_json::to_string(value)?;

        let mut sender = self.sender.lock().await;
        sender.send(Message::Text(msg.into())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            LiveError::connection(format!("Send error: {}", e))
        })
    }
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_input(&self, chunk: &TransportChunk) -> Result<()> {
        if !self.is_connected() {
            return Err(LiveError::NotConnected);
        }
        self.send_raw(&input_message(chunk))
            .await
            .map_err(|e| LiveError::send(e.to_string()))
    }

    async fn next_event(&self) -> Option<Result<SessionEvent>> {
        let mut receiver = self.receiver.lock().await;

        loop {
            let message = match receiver.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Some(Err(LiveError::connection(format!("Receive error: {}", e))));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
            };

            let raw = match &message {
                Message::Text(text) => text.as_str(),
                Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        return Some(Err(LiveError::malformed(format!(
                            "Invalid UTF-8 in binary message: {}",
                            e
                        ))));
                    }
                },
                Message::Close(frame) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Some(Ok(close_event(frame.as_ref())));
                }
                _ => continue,
            };

            match translate(raw) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| LiveError::connection(format!("Close error: {}", e)))?;

        Ok(())
    }
}

impl std::fmt::Debug for GeminiLiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveSession")
            .field("session_id", &self.session_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}
