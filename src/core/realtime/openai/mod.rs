//! OpenAI Realtime API wire protocol.
//!
//! This module covers the two surfaces the voice-chat client talks to:
//!
//! - The SDP exchange endpoint: `POST {base_url}?model={model}` with the offer
//!   as `application/sdp` and the ephemeral secret as a bearer token.
//! - The `oai-events` data channel: JSON client and server events.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-10-01` - October 2024 version
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version (default)
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency

mod config;
mod messages;

pub use config::{
    OPENAI_EVENTS_CHANNEL, OPENAI_REALTIME_URL, OpenAIRealtimeModel, SDP_CONTENT_TYPE,
    sdp_exchange_url,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, ErrorEnvelope, Response, ServerEvent,
    SessionUpdate, ToolDef, TurnDetection,
};
