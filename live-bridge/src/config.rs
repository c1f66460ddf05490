//! Configuration types for live sessions.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioFormat, DEFAULT_FRAME_SIZE};
use crate::error::{LiveError, Result};

/// Default native-audio live model.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice.
pub const DEFAULT_VOICE: &str = "Puck";

/// Capture pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Samples per outbound microphone frame.
    pub audio_frame_size: usize,
    /// Whether the camera is captured at all.
    pub video: bool,
    /// Milliseconds between camera stills.
    pub video_interval_ms: u64,
    /// JPEG quality for stills (1-100).
    pub jpeg_quality: u8,
    /// Stills wider than this are downsampled before encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_video_width: Option<u32>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            audio_frame_size: DEFAULT_FRAME_SIZE,
            video: true,
            video_interval_ms: 1000,
            jpeg_quality: 50,
            max_video_width: Some(640),
        }
    }
}

impl CaptureConfig {
    /// Interval between camera stills.
    pub fn video_interval(&self) -> Duration {
        Duration::from_millis(self.video_interval_ms)
    }
}

/// Configuration for a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Model to connect to.
    pub model: String,

    /// System instruction for the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Prebuilt voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities requested from the model.
    pub response_modalities: Vec<String>,

    /// Temperature for response generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Format of outbound microphone audio.
    pub input_format: AudioFormat,

    /// Format of inbound model audio.
    pub output_format: AudioFormat,

    /// Capture pipeline settings.
    pub capture: CaptureConfig,

    /// Outbound chunks queued before capture starts dropping.
    pub outbound_capacity: usize,

    /// Inbound session events queued before the network reader waits.
    pub event_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instruction: None,
            voice: Some(DEFAULT_VOICE.to_string()),
            response_modalities: vec!["AUDIO".to_string()],
            temperature: None,
            input_format: AudioFormat::pcm16_16khz(),
            output_format: AudioFormat::pcm16_24khz(),
            capture: CaptureConfig::default(),
            outbound_capacity: 64,
            event_capacity: 256,
        }
    }
}

impl LiveConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for LiveConfig.
    pub fn builder() -> LiveConfigBuilder {
        LiveConfigBuilder::new()
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| LiveError::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Disable camera capture.
    pub fn without_video(mut self) -> Self {
        self.capture.video = false;
        self
    }

    /// Set the capture settings.
    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(LiveError::config("model must not be empty"));
        }
        if self.capture.audio_frame_size == 0 {
            return Err(LiveError::config("capture.audio_frame_size must be greater than 0"));
        }
        if self.capture.video_interval_ms == 0 {
            return Err(LiveError::config("capture.video_interval_ms must be greater than 0"));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(LiveError::config("capture.jpeg_quality must be within 1..=100"));
        }
        let formats = [("input_format", self.input_format), ("output_format", self.output_format)];
        for (name, format) in formats {
            if format.channels == 0 {
                return Err(LiveError::config(format!("{name}.channels must be at least 1")));
            }
            if format.sample_rate == 0 {
                return Err(LiveError::config(format!(
                    "{name}.sample_rate must be greater than 0"
                )));
            }
        }
        if self.outbound_capacity == 0 || self.event_capacity == 0 {
            return Err(LiveError::config("queue capacities must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for LiveConfig.
#[derive(Debug, Clone, Default)]
pub struct LiveConfigBuilder {
    config: LiveConfig,
}

impl LiveConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = Some(temp);
        self
    }

    /// Enable or disable camera capture.
    pub fn video(mut self, enabled: bool) -> Self {
        self.config.capture.video = enabled;
        self
    }

    /// Set the interval between camera stills.
    pub fn video_interval(mut self, interval: Duration) -> Self {
        self.config.capture.video_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the microphone frame size.
    pub fn audio_frame_size(mut self, samples: usize) -> Self {
        self.config.capture.audio_frame_size = samples;
        self
    }

    /// Set the JPEG quality for stills.
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.capture.jpeg_quality = quality;
        self
    }

    /// Set the outbound queue depth.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<LiveConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_live_api() {
        let config = LiveConfig::default();
        assert_eq!(config.input_format, AudioFormat::pcm16_16khz());
        assert_eq!(config.output_format, AudioFormat::pcm16_24khz());
        assert_eq!(config.capture.audio_frame_size, 4096);
        assert_eq!(config.capture.video_interval(), Duration::from_secs(1));
        assert_eq!(config.response_modalities, vec!["AUDIO".to_string()]);
        assert_eq!(config.voice.as_deref(), Some("Puck"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LiveConfig::builder()
            .instruction("Ask technical interview questions.")
            .voice("Kore")
            .video(false)
            .video_interval(Duration::from_millis(500))
            .build()
            .unwrap();

        assert_eq!(config.instruction.as_deref(), Some("Ask technical interview questions."));
        assert_eq!(config.voice.as_deref(), Some("Kore"));
        assert!(!config.capture.video);
        assert_eq!(config.capture.video_interval_ms, 500);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        assert!(LiveConfig::builder().audio_frame_size(0).build().is_err());
        assert!(LiveConfig::builder().jpeg_quality(0).build().is_err());
        assert!(LiveConfig::builder().video_interval(Duration::ZERO).build().is_err());
        assert!(LiveConfig::builder().model("  ").build().is_err());
        assert!(LiveConfig::builder().outbound_capacity(0).build().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = LiveConfig::from_toml_str(
            r#"
            instruction = "Speak Spanish."

            [capture]
            video = false
            audio_frame_size = 2048
            "#,
        )
        .unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.instruction.as_deref(), Some("Speak Spanish."));
        assert!(!config.capture.video);
        assert_eq!(config.capture.audio_frame_size, 2048);
        assert_eq!(config.capture.jpeg_quality, 50);
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        let err = LiveConfig::from_toml_str("[output_format]\nsample_rate = 24000\nchannels = 0\n")
            .unwrap_err();
        assert!(matches!(err, LiveError::ConfigError(_)));

        let err = LiveConfig::from_toml_str("model = [1, 2]").unwrap_err();
        assert!(matches!(err, LiveError::ConfigError(_)));
    }
}
