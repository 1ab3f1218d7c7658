//! OpenAI Realtime API endpoint constants and model selection.
//!
//! The browser-style WebRTC flow posts an SDP offer over HTTPS rather than
//! opening a WebSocket, so the base URL here is the HTTPS realtime endpoint.

use serde::{Deserialize, Serialize};

/// OpenAI Realtime API WebRTC (SDP exchange) endpoint.
pub const OPENAI_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Label of the data channel carrying realtime protocol events.
pub const OPENAI_EVENTS_CHANNEL: &str = "oai-events";

/// Content type of the offer and answer bodies.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

// =============================================================================
// Models
// =============================================================================

/// Supported OpenAI Realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    /// GPT-4o Realtime Preview model
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Realtime Preview 2024-10-01
    #[serde(rename = "gpt-4o-realtime-preview-2024-10-01")]
    Gpt4oRealtimePreview20241001,
    /// GPT-4o Realtime Preview 2024-12-17
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
    /// GPT-4o Mini Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-mini-realtime-preview-2024-12-17")]
    Gpt4oMiniRealtimePreview20241217,
}

impl OpenAIRealtimeModel {
    /// Convert to the `model` query parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241001 => "gpt-4o-realtime-preview-2024-10-01",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
            Self::Gpt4oMiniRealtimePreview20241217 => "gpt-4o-mini-realtime-preview-2024-12-17",
        }
    }

    /// Parse a known model id. Unknown ids return `None`; callers may still
    /// pass them through since the endpoint is the authority on models.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Some(Self::Gpt4oRealtimePreview),
            "gpt-4o-realtime-preview-2024-10-01" => Some(Self::Gpt4oRealtimePreview20241001),
            "gpt-4o-realtime-preview-2024-12-17" => Some(Self::Gpt4oRealtimePreview20241217),
            "gpt-4o-mini-realtime-preview" => Some(Self::Gpt4oMiniRealtimePreview),
            "gpt-4o-mini-realtime-preview-2024-12-17" => {
                Some(Self::Gpt4oMiniRealtimePreview20241217)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the SDP exchange URL: `{base_url}?model={model}`.
pub fn sdp_exchange_url(base_url: &str, model: &str) -> String {
    format!("{}?model={}", base_url.trim_end_matches('/'), model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model() {
        assert_eq!(
            OpenAIRealtimeModel::default().as_str(),
            "gpt-4o-realtime-preview-2024-12-17"
        );
    }

    #[test]
    fn test_model_parse() {
        assert_eq!(
            OpenAIRealtimeModel::parse("GPT-4o-mini-realtime-preview"),
            Some(OpenAIRealtimeModel::Gpt4oMiniRealtimePreview)
        );
        assert_eq!(OpenAIRealtimeModel::parse("gpt-5-voice"), None);
    }

    #[test]
    fn test_sdp_exchange_url() {
        assert_eq!(
            sdp_exchange_url(OPENAI_REALTIME_URL, "gpt-4o-realtime-preview"),
            "https://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(
            sdp_exchange_url("http://localhost:9000/rt/", "m"),
            "http://localhost:9000/rt?model=m"
        );
    }
}
