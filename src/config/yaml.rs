use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file take precedence over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// session:
///   url: "https://tutor.example.com/api/voice-chat/session/"
///   cookie: "sessionid=abc123"
///
/// realtime:
///   base_url: "https://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   data_channel_label: "oai-events"
///   data_channel_timeout_ms: 5000
///
/// interaction:
///   auto_connect: false
///   hold_threshold_ms: 200
///
/// microphone:
///   track_check_interval_ms: 1000
///
/// vad:
///   threshold: 0.5
///   prefix_padding_ms: 300
///   silence_duration_ms: 500
///   create_response: true
///
/// events:
///   capacity: 256
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub session: Option<SessionYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub interaction: Option<InteractionYaml>,
    pub microphone: Option<MicrophoneYaml>,
    pub vad: Option<VadYaml>,
    pub events: Option<EventsYaml>,
}

/// Session endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub url: Option<String>,
    pub cookie: Option<String>,
}

/// Realtime endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub data_channel_label: Option<String>,
    pub data_channel_timeout_ms: Option<u64>,
}

/// Gesture handling configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InteractionYaml {
    pub auto_connect: Option<bool>,
    pub hold_threshold_ms: Option<u64>,
}

/// Microphone monitoring configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MicrophoneYaml {
    pub track_check_interval_ms: Option<u64>,
}

/// Server VAD parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VadYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub create_response: Option<bool>,
}

/// Event bus configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventsYaml {
    pub capacity: Option<usize>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&contents)
    }

    /// Parse YAML configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
