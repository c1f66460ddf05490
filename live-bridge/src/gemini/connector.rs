//! Gemini Live connector.

use async_trait::async_trait;
use tracing::warn;

use super::session::GeminiLiveSession;
use super::{API_KEY_VARS, GEMINI_LIVE_URL, GEMINI_VOICES};
use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::session::{LiveConnector, SharedSession};

/// Opens Gemini Live sessions with a Studio API key.
///
/// # Example
///
/// ```rust,ignore
/// use live_bridge::gemini::GeminiLiveConnector;
///
/// let connector = GeminiLiveConnector::new("key");
/// let session = connector.open(&config).await?;
/// ```
#[derive(Clone)]
pub struct GeminiLiveConnector {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveConnector {
    /// Create a connector for the public Live endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), endpoint: GEMINI_LIVE_URL.to_string() }
    }

    /// Read the API key from `GEMINI_API_KEY`, `GOOGLE_API_KEY` or `API_KEY`.
    pub fn from_env() -> Result<Self> {
        API_KEY_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|key| !key.trim().is_empty()))
            .map(Self::new)
            .ok_or_else(|| {
                let vars = API_KEY_VARS.join(", ");
                LiveError::config(format!("no API key found, set one of {vars}"))
            })
    }

    /// Use a different WebSocket endpoint, e.g. a local proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The WebSocket endpoint sessions connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

/// Whether `voice` is one of the prebuilt Gemini voices.
fn is_known_voice(voice: &str) -> bool {
    GEMINI_VOICES.iter().any(|known| known.eq_ignore_ascii_case(voice))
}

impl std::fmt::Debug for GeminiLiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn open(&self, config: &LiveConfig) -> Result<SharedSession> {
        if self.api_key.trim().is_empty() {
            return Err(LiveError::config("Gemini API key is empty"));
        }
        if let Some(voice) = config.voice.as_deref().filter(|voice| !is_known_voice(voice)) {
            warn!(voice, known = ?GEMINI_VOICES, "Voice is not a prebuilt Gemini voice");
        }
        let session = GeminiLiveSession::connect(&self.url(), config).await?;
        Ok(std::sync::Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_carries_key() {
        let connector = GeminiLiveConnector::new("abc").with_endpoint("ws://127.0.0.1:9000/live");
        assert_eq!(connector.url(), "ws://127.0.0.1:9000/live?key=abc");
        assert_eq!(connector.provider(), "gemini");
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", GeminiLiveConnector::new("secret-key"));
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn test_known_voices() {
        assert!(is_known_voice("Puck"));
        assert!(is_known_voice("kore"));
        assert!(!is_known_voice("Nova"));
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_connecting() {
        let connector = GeminiLiveConnector::new("  ");
        let err = connector.open(&LiveConfig::default()).await.err().expect("expected error");
        assert!(matches!(err, LiveError::ConfigError(_)));
    }
}
