//! OpenAI Realtime API data-channel message types.
//!
//! All events are JSON objects, one per data-channel message, discriminated by
//! their `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update tools or turn detection
//! - input_audio_buffer.commit - Commit audio buffer
//! - input_audio_buffer.clear - Clear audio buffer
//! - conversation.item.create - Add item to conversation (context injection)
//! - response.create - Generate a response
//!
//! Server events the client acts on:
//! - conversation.item.input_audio_transcription.completed - User transcript
//! - response.audio_transcript.delta - Assistant transcript chunk
//! - response.audio_transcript.done - Assistant transcript complete
//! - response.done - Response complete (function calls live in its output)
//! - response.function_call_arguments.done - Function call arguments complete
//! - error - Error occurred
//!
//! Every other server event type decodes to [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Partial session configuration carried by `session.update`.
///
/// Only the fields this client changes at runtime are modeled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Turn detection. `Some(None)` serializes as `null`, which disables
    /// server-side VAD; `None` leaves the server setting untouched.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "nullable_turn_detection"
    )]
    pub turn_detection: Option<Option<TurnDetection>>,
}

mod nullable_turn_detection {
    use super::TurnDetection;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Option<TurnDetection>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<TurnDetection>>, D::Error> {
        Option::<TurnDetection>::deserialize(deserializer).map(Some)
    }
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        threshold: f32,
        /// Audio prefix padding in ms
        prefix_padding_ms: u32,
        /// Silence duration in ms
        silence_duration_ms: u32,
        /// Whether to create response on turn end
        create_response: bool,
    },
}

/// Tool definition as announced to the remote agent.
///
/// The parameter schema is forwarded untouched; nothing validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl ToolDef {
    /// Create a function tool descriptor.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: default_tool_type(),
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call (JSON text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ConversationItem {
    /// A user message holding a single `input_text` part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    /// Whether this item is a function call the model has finished emitting.
    #[inline]
    pub fn is_completed_function_call(&self) -> bool {
        self.item_type == "function_call" && self.status.as_deref() == Some("completed")
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionUpdate,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Announce the full tool set with automatic tool choice.
    pub fn tools_update(tools: Vec<ToolDef>) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionUpdate {
                tools: Some(tools),
                tool_choice: Some("auto".to_string()),
                turn_detection: None,
            },
        }
    }

    /// Enable server-side VAD with the given parameters.
    pub fn enable_vad(turn_detection: TurnDetection) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionUpdate {
                turn_detection: Some(Some(turn_detection)),
                ..Default::default()
            },
        }
    }

    /// Disable server-side VAD (`turn_detection: null`).
    pub fn disable_vad() -> Self {
        ClientEvent::SessionUpdate {
            session: SessionUpdate {
                turn_detection: Some(None),
                ..Default::default()
            },
        }
    }

    /// Inject text context as a user message.
    pub fn user_context(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }

    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received over the data channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript text
        transcript: String,
    },

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Transcript delta
        delta: String,
    },

    /// Audio transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
        /// Full transcript
        transcript: String,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        #[serde(default)]
        response: Option<Response>,
    },

    /// Function call arguments done
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Call ID
        #[serde(default)]
        call_id: Option<String>,
        /// Response body, present only when the server attaches one
        #[serde(default)]
        response: Option<Response>,
    },

    /// Any event type this client does not act on
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Response information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
    /// Output items
    #[serde(default)]
    pub output: Vec<ConversationItem>,
}

/// Error body returned by the SDP exchange endpoint on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    /// Error details
    #[serde(default)]
    pub error: Option<ApiError>,
}

// =============================================================================
// Tests
// =============================================================================
