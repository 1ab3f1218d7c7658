//! Configuration module for the voice-chat client
//!
//! This module handles client configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use realtime_voice_client::config::VoiceChatConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = VoiceChatConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config_path = PathBuf::from("voice-chat.yaml");
//! let config = VoiceChatConfig::from_file(&config_path)?;
//!
//! println!("Session endpoint: {}", config.session_url);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::openai::{
    OPENAI_EVENTS_CHANNEL, OPENAI_REALTIME_URL, OpenAIRealtimeModel, TurnDetection,
};
use crate::utils::{validate_base_url, validate_endpoint_url};

/// Default hold duration separating a tap from push-to-talk.
pub const DEFAULT_HOLD_THRESHOLD_MS: u64 = 200;
/// Default microphone health poll interval.
pub const DEFAULT_TRACK_CHECK_INTERVAL_MS: u64 = 1000;
/// Default bound on the data-channel-open wait.
pub const DEFAULT_DATA_CHANNEL_TIMEOUT_MS: u64 = 5000;
/// Default event bus capacity per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server VAD parameters sent when the channel is toggled open.
#[derive(Debug, Clone, PartialEq)]
pub struct VadSettings {
    /// Amplitude activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech (ms)
    pub prefix_padding_ms: u32,
    /// Silence ending a turn (ms)
    pub silence_duration_ms: u32,
    /// Whether the server responds automatically at turn end
    pub create_response: bool,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

impl VadSettings {
    /// Wire representation for `session.update`.
    pub fn turn_detection(&self) -> TurnDetection {
        TurnDetection::ServerVad {
            threshold: self.threshold,
            prefix_padding_ms: self.prefix_padding_ms,
            silence_duration_ms: self.silence_duration_ms,
            create_response: self.create_response,
        }
    }
}

/// Voice-chat client configuration
///
/// Contains everything needed to run one voice-chat session:
/// - Session endpoint (ephemeral credential issuance)
/// - Realtime endpoint and model
/// - Gesture and monitoring timings
/// - Server VAD parameters
#[derive(Debug, Clone)]
pub struct VoiceChatConfig {
    /// Server endpoint issuing ephemeral session secrets
    pub session_url: String,
    /// Cookie forwarded on the session request in place of same-origin credentials
    pub session_cookie: Option<Zeroizing<String>>,
    /// Realtime SDP exchange endpoint
    pub base_url: String,
    /// Realtime model id
    pub model: String,
    /// Connect as soon as the session object is created
    pub auto_connect: bool,
    /// Press duration separating a tap from push-to-talk (ms)
    pub hold_threshold_ms: u64,
    /// Microphone health poll interval (ms)
    pub track_check_interval_ms: u64,
    /// Bound on the wait for the data channel to open (ms)
    pub data_channel_timeout_ms: u64,
    /// Label of the control data channel
    pub data_channel_label: String,
    /// Per-subscriber event bus capacity
    pub event_capacity: usize,
    /// Server VAD parameters
    pub vad: VadSettings,
}

impl Default for VoiceChatConfig {
    fn default() -> Self {
        Self {
            session_url: String::new(),
            session_cookie: None,
            base_url: OPENAI_REALTIME_URL.to_string(),
            model: OpenAIRealtimeModel::default().as_str().to_string(),
            auto_connect: false,
            hold_threshold_ms: DEFAULT_HOLD_THRESHOLD_MS,
            track_check_interval_ms: DEFAULT_TRACK_CHECK_INTERVAL_MS,
            data_channel_timeout_ms: DEFAULT_DATA_CHANNEL_TIMEOUT_MS,
            data_channel_label: OPENAI_EVENTS_CHANNEL.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            vad: VadSettings::default(),
        }
    }
}

impl VoiceChatConfig {
    /// Create a configuration for the given session endpoint with defaults elsewhere.
    pub fn new(session_url: impl Into<String>) -> Self {
        Self {
            session_url: session_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to environment variables
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        Self::from_yaml(yaml)
    }

    /// Build configuration from parsed YAML, falling back to environment variables
    pub fn from_yaml(yaml: YamlConfig) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_string("VOICE_CHAT_SESSION_URL") {
            self.session_url = v;
        }
        if let Some(v) = env_string("VOICE_CHAT_SESSION_COOKIE") {
            self.session_cookie = Some(Zeroizing::new(v));
        }
        if let Some(v) = env_string("VOICE_CHAT_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = env_string("VOICE_CHAT_MODEL") {
            self.model = v;
        }
        if let Some(v) = env_parse::<bool>("VOICE_CHAT_AUTO_CONNECT")? {
            self.auto_connect = v;
        }
        if let Some(v) = env_parse::<u64>("VOICE_CHAT_HOLD_THRESHOLD_MS")? {
            self.hold_threshold_ms = v;
        }
        if let Some(v) = env_parse::<u64>("VOICE_CHAT_TRACK_CHECK_INTERVAL_MS")? {
            self.track_check_interval_ms = v;
        }
        if let Some(v) = env_parse::<u64>("VOICE_CHAT_DATA_CHANNEL_TIMEOUT_MS")? {
            self.data_channel_timeout_ms = v;
        }
        if let Some(v) = env_string("VOICE_CHAT_DATA_CHANNEL_LABEL") {
            self.data_channel_label = v;
        }
        if let Some(v) = env_parse::<usize>("VOICE_CHAT_EVENT_CAPACITY")? {
            self.event_capacity = v;
        }
        if let Some(v) = env_parse::<f32>("VOICE_CHAT_VAD_THRESHOLD")? {
            self.vad.threshold = v;
        }
        if let Some(v) = env_parse::<u32>("VOICE_CHAT_VAD_PREFIX_PADDING_MS")? {
            self.vad.prefix_padding_ms = v;
        }
        if let Some(v) = env_parse::<u32>("VOICE_CHAT_VAD_SILENCE_DURATION_MS")? {
            self.vad.silence_duration_ms = v;
        }
        if let Some(v) = env_parse::<bool>("VOICE_CHAT_VAD_CREATE_RESPONSE")? {
            self.vad.create_response = v;
        }
        Ok(())
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(session) = yaml.session {
            if let Some(v) = session.url {
                self.session_url = v;
            }
            if let Some(v) = session.cookie {
                self.session_cookie = Some(Zeroizing::new(v));
            }
        }
        if let Some(realtime) = yaml.realtime {
            if let Some(v) = realtime.base_url {
                self.base_url = v;
            }
            if let Some(v) = realtime.model {
                self.model = v;
            }
            if let Some(v) = realtime.data_channel_label {
                self.data_channel_label = v;
            }
            if let Some(v) = realtime.data_channel_timeout_ms {
                self.data_channel_timeout_ms = v;
            }
        }
        if let Some(interaction) = yaml.interaction {
            if let Some(v) = interaction.auto_connect {
                self.auto_connect = v;
            }
            if let Some(v) = interaction.hold_threshold_ms {
                self.hold_threshold_ms = v;
            }
        }
        if let Some(v) = yaml.microphone.and_then(|m| m.track_check_interval_ms) {
            self.track_check_interval_ms = v;
        }
        if let Some(vad) = yaml.vad {
            if let Some(v) = vad.threshold {
                self.vad.threshold = v;
            }
            if let Some(v) = vad.prefix_padding_ms {
                self.vad.prefix_padding_ms = v;
            }
            if let Some(v) = vad.silence_duration_ms {
                self.vad.silence_duration_ms = v;
            }
            if let Some(v) = vad.create_response {
                self.vad.create_response = v;
            }
        }
        if let Some(v) = yaml.events.and_then(|e| e.capacity) {
            self.event_capacity = v;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_url.trim().is_empty() {
            return Err(ConfigError::Missing("session_url"));
        }
        validate_endpoint_url(&self.session_url).map_err(|e| ConfigError::InvalidValue {
            key: "session_url".to_string(),
            value: e.to_string(),
        })?;
        validate_base_url(&self.base_url).map_err(|e| ConfigError::InvalidValue {
            key: "base_url".to_string(),
            value: e.to_string(),
        })?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if OpenAIRealtimeModel::parse(&self.model).is_none() {
            warn!("Unrecognized realtime model '{}', passing through", self.model);
        }

        for (key, value) in [
            ("hold_threshold_ms", self.hold_threshold_ms),
            ("track_check_interval_ms", self.track_check_interval_ms),
            ("data_channel_timeout_ms", self.data_channel_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }

        if self.data_channel_label.is_empty() {
            return Err(ConfigError::Missing("data_channel_label"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(ConfigError::InvalidValue {
                key: "vad.threshold".to_string(),
                value: self.vad.threshold.to_string(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }

    #[inline]
    pub fn track_check_interval(&self) -> Duration {
        Duration::from_millis(self.track_check_interval_ms)
    }

    #[inline]
    pub fn data_channel_timeout(&self) -> Duration {
        Duration::from_millis(self.data_channel_timeout_ms)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: &[&str] = &[
        "VOICE_CHAT_SESSION_URL",
        "VOICE_CHAT_SESSION_COOKIE",
        "VOICE_CHAT_BASE_URL",
        "VOICE_CHAT_MODEL",
        "VOICE_CHAT_AUTO_CONNECT",
        "VOICE_CHAT_HOLD_THRESHOLD_MS",
        "VOICE_CHAT_TRACK_CHECK_INTERVAL_MS",
        "VOICE_CHAT_DATA_CHANNEL_TIMEOUT_MS",
        "VOICE_CHAT_DATA_CHANNEL_LABEL",
        "VOICE_CHAT_EVENT_CAPACITY",
        "VOICE_CHAT_VAD_THRESHOLD",
        "VOICE_CHAT_VAD_PREFIX_PADDING_MS",
        "VOICE_CHAT_VAD_SILENCE_DURATION_MS",
        "VOICE_CHAT_VAD_CREATE_RESPONSE",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            // SAFETY: tests touching the environment run under #[serial]
            unsafe { std::env::remove_var(key) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: tests touching the environment run under #[serial]
        unsafe { std::env::set_var(key, value) };
    }

    #[test]
    fn test_defaults() {
        let config = VoiceChatConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1/realtime");
        assert_eq!(config.model, "gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(config.hold_threshold(), Duration::from_millis(200));
        assert_eq!(config.track_check_interval(), Duration::from_secs(1));
        assert_eq!(config.data_channel_timeout(), Duration::from_secs(5));
        assert_eq!(config.data_channel_label, "oai-events");
        assert!(!config.auto_connect);
        assert_eq!(config.vad, VadSettings::default());
    }

    #[test]
    fn test_validate_requires_session_url() {
        let config = VoiceChatConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("session_url"))
        ));

        let config = VoiceChatConfig::new("https://tutor.example.com/session/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = VoiceChatConfig {
            hold_threshold_ms: 0,
            ..VoiceChatConfig::new("https://tutor.example.com/session/")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "hold_threshold_ms"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let config = VoiceChatConfig {
            base_url: "ftp://api.example.com/realtime".to_string(),
            ..VoiceChatConfig::new("https://tutor.example.com/session/")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "base_url"
        ));
    }

    #[test]
    fn test_validate_accepts_unknown_model() {
        let config = VoiceChatConfig {
            model: "gpt-realtime-next".to_string(),
            ..VoiceChatConfig::new("https://tutor.example.com/session/")
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vad_turn_detection() {
        let td = VadSettings::default().turn_detection();
        assert_eq!(
            td,
            TurnDetection::ServerVad {
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
                create_response: true,
            }
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        set_env("VOICE_CHAT_SESSION_URL", "http://localhost:8000/api/session/");
        set_env("VOICE_CHAT_HOLD_THRESHOLD_MS", "300");
        set_env("VOICE_CHAT_AUTO_CONNECT", "true");
        set_env("VOICE_CHAT_VAD_THRESHOLD", "0.6");

        let config = VoiceChatConfig::from_env().unwrap();
        assert_eq!(config.session_url, "http://localhost:8000/api/session/");
        assert_eq!(config.hold_threshold_ms, 300);
        assert!(config.auto_connect);
        assert_eq!(config.vad.threshold, 0.6);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        clear_env();
        set_env("VOICE_CHAT_SESSION_URL", "http://localhost:8000/api/session/");
        set_env("VOICE_CHAT_DATA_CHANNEL_TIMEOUT_MS", "soon");

        let result = VoiceChatConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key, .. }) if key == "VOICE_CHAT_DATA_CHANNEL_TIMEOUT_MS"
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        set_env("VOICE_CHAT_SESSION_URL", "http://localhost:8000/env-session/");
        set_env("VOICE_CHAT_MODEL", "gpt-4o-mini-realtime-preview");

        let yaml = YamlConfig::from_str(
            r#"
session:
  url: "https://tutor.example.com/yaml-session/"
interaction:
  hold_threshold_ms: 150
"#,
        )
        .unwrap();
        let config = VoiceChatConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.session_url, "https://tutor.example.com/yaml-session/");
        assert_eq!(config.model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.hold_threshold_ms, 150);
        clear_env();
    }
}
