//! Inbound data-channel frame decoding.
//!
//! Each frame is one JSON object discriminated by `type`. The translator turns
//! it into zero or more semantic [`VoiceChatEvent`]s, followed by the frame
//! itself as a verbatim [`VoiceChatEvent::Message`].
//!
//! A frame that is not valid JSON, or whose known `type` has the wrong shape,
//! yields `ProtocolDecodeError`; the caller drops it and carries on.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::base::{VoiceChatError, VoiceChatResult};
use super::events::{FunctionCall, StatusUpdate, VoiceChatEvent};
use super::openai::{Response, ServerEvent};

/// Stateful decoder for one connection's inbound stream.
#[derive(Debug, Default)]
pub struct EventTranslator {
    /// Assistant transcript accumulated from deltas since the last `done`
    pending: String,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assistant transcript streamed so far in the current response.
    pub fn pending_transcript(&self) -> &str {
        &self.pending
    }

    /// Decode one frame.
    pub fn translate(&mut self, raw: &str) -> VoiceChatResult<Vec<VoiceChatEvent>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| VoiceChatError::ProtocolDecodeError(format!("invalid JSON: {e}")))?;
        self.translate_value(value)
    }

    /// Decode one already-parsed frame.
    pub fn translate_value(&mut self, value: Value) -> VoiceChatResult<Vec<VoiceChatEvent>> {
        let Some(event_type) = value.get("type").and_then(Value::as_str) else {
            return Err(VoiceChatError::ProtocolDecodeError(
                "frame has no string `type` field".to_string(),
            ));
        };
        debug!("Received {event_type}");

        let event = ServerEvent::deserialize(&value).map_err(|e| {
            VoiceChatError::ProtocolDecodeError(format!("malformed {event_type}: {e}"))
        })?;

        let mut events = Vec::new();
        match event {
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                events.push(VoiceChatEvent::UserTranscript { transcript });
            }
            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.pending.push_str(&delta);
                events.push(VoiceChatEvent::AiTranscriptDelta { delta });
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                let streamed = std::mem::take(&mut self.pending);
                let transcript = if transcript.is_empty() {
                    streamed
                } else {
                    transcript
                };
                events.push(VoiceChatEvent::AiTranscriptDone { transcript });
            }
            ServerEvent::ResponseDone { response }
            | ServerEvent::FunctionCallArgumentsDone { response, .. } => {
                if let Some(response) = response {
                    collect_function_calls(&response, &mut events);
                }
            }
            ServerEvent::Error { error } => {
                let message = if error.message.is_empty() {
                    error.error_type
                } else {
                    error.message
                };
                warn!("Remote error: {message}");
                events.push(VoiceChatEvent::Status(StatusUpdate::error(format!(
                    "Error: {message}"
                ))));
            }
            ServerEvent::Unknown => {}
        }

        events.push(VoiceChatEvent::Message(value));
        Ok(events)
    }
}

/// Emit one `FunctionCall` per completed function-call item, in output order.
/// Items whose arguments are not valid JSON are reported and skipped.
fn collect_function_calls(response: &Response, events: &mut Vec<VoiceChatEvent>) {
    for item in response
        .output
        .iter()
        .filter(|item| item.is_completed_function_call())
    {
        let Some(name) = item.name.clone() else {
            warn!("Completed function call without a name, skipping");
            continue;
        };

        let raw_arguments = item.arguments.as_deref().unwrap_or("").trim();
        let arguments = if raw_arguments.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw_arguments) {
                Ok(arguments) => arguments,
                Err(e) => {
                    warn!("Invalid arguments for function call {name}: {e}");
                    events.push(VoiceChatEvent::Status(StatusUpdate::error(format!(
                        "Error: invalid arguments for {name}"
                    ))));
                    continue;
                }
            }
        };

        events.push(VoiceChatEvent::FunctionCall(FunctionCall {
            name,
            arguments,
            call_id: item.call_id.clone().unwrap_or_default(),
        }));
    }
}
