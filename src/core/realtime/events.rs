//! Typed publish/subscribe bus for voice-chat events.
//!
//! The session publishes semantic events (transcripts, function calls, status,
//! state changes) plus a verbatim copy of every decoded inbound message. Any
//! number of page-level consumers subscribe independently.
//!
//! Backed by `tokio::sync::broadcast`: publishing never blocks, and a subscriber
//! that falls behind by more than the configured capacity observes `Lagged`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::base::ConnectionState;
use super::interaction::InteractionState;

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Error,
}

/// A human-readable status line for the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub message: String,
    pub level: StatusLevel,
}

impl StatusUpdate {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: StatusLevel::Info,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: StatusLevel::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: StatusLevel::Error,
        }
    }
}

/// A completed function call requested by the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Tool name
    pub name: String,
    /// Parsed JSON arguments
    pub arguments: serde_json::Value,
    /// Call ID, echoed back when submitting a result
    #[serde(rename = "callId")]
    pub call_id: String,
}

/// Events published by a voice-chat session.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceChatEvent {
    /// Final transcript of the user's speech
    UserTranscript { transcript: String },
    /// Incremental fragment of the assistant's spoken transcript
    AiTranscriptDelta { delta: String },
    /// Final assistant transcript; closes the current delta stream
    AiTranscriptDone { transcript: String },
    /// A completed tool invocation
    FunctionCall(FunctionCall),
    /// Status line for the page
    Status(StatusUpdate),
    /// Visible connection state changed
    ConnectionChanged(ConnectionState),
    /// Gesture/audio mode changed
    InteractionChanged(InteractionState),
    /// Every decoded inbound message, verbatim
    Message(serde_json::Value),
}

impl VoiceChatEvent {
    /// Page-level event name.
    pub fn name(&self) -> &'static str {
        match self {
            VoiceChatEvent::UserTranscript { .. } => "voice-chat:user-transcript",
            VoiceChatEvent::AiTranscriptDelta { .. } => "voice-chat:ai-transcript-delta",
            VoiceChatEvent::AiTranscriptDone { .. } => "voice-chat:ai-transcript-done",
            VoiceChatEvent::FunctionCall(_) => "voice-chat:function-call",
            VoiceChatEvent::Status(_) => "voice-chat:status",
            VoiceChatEvent::ConnectionChanged(_) => "voice-chat:connection",
            VoiceChatEvent::InteractionChanged(_) => "voice-chat:interaction",
            VoiceChatEvent::Message(_) => "voice-chat-message",
        }
    }

    /// Event payload as JSON, in the shape page consumers expect.
    pub fn detail(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            VoiceChatEvent::UserTranscript { transcript }
            | VoiceChatEvent::AiTranscriptDone { transcript } => json!({ "transcript": transcript }),
            VoiceChatEvent::AiTranscriptDelta { delta } => json!({ "delta": delta }),
            VoiceChatEvent::FunctionCall(call) => {
                serde_json::to_value(call).unwrap_or(serde_json::Value::Null)
            }
            VoiceChatEvent::Status(status) => {
                serde_json::to_value(status).unwrap_or(serde_json::Value::Null)
            }
            VoiceChatEvent::ConnectionChanged(state) => json!({ "state": state.as_str() }),
            VoiceChatEvent::InteractionChanged(state) => json!({ "state": state.as_str() }),
            VoiceChatEvent::Message(message) => message.clone(),
        }
    }
}

/// Broadcast bus for [`VoiceChatEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VoiceChatEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceChatEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: VoiceChatEvent) {
        trace!("Publishing {}", event.name());
        let _ = self.sender.send(event);
    }

    /// Publish a status line.
    pub fn status(&self, status: StatusUpdate) {
        self.publish(VoiceChatEvent::Status(status));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
