//! Base types shared by the voice-chat session components.
//!
//! This module defines the error taxonomy, the result alias, and the visible
//! connection state that every other realtime component reports through.
//!
//! # Error Propagation
//!
//! - Setup failures abort the connection attempt and leave the session in
//!   [`ConnectionState::Failed`] with every partial resource released.
//! - Steady-state failures (microphone loss, data channel error) force a
//!   teardown.
//! - Gesture handling never errors; acting before setup completes is a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running a voice-chat session.
#[derive(Debug, Error)]
pub enum VoiceChatError {
    /// Session credential issuance failed
    #[error("Session error: {0}")]
    SessionError(String),

    /// Microphone permission denied or no input device present
    #[error("Failed to access microphone: {0}")]
    MicrophoneUnavailable(String),

    /// The live microphone track disappeared or ended
    #[error("Microphone lost: {0}")]
    MicrophoneLost(String),

    /// Acquiring the requested input device failed; the prior device stays active
    #[error("Failed to switch microphone: {0}")]
    DeviceSwitchError(String),

    /// Offer/answer exchange with the realtime endpoint failed
    #[error("Failed to connect to realtime endpoint: {0}")]
    NegotiationError(String),

    /// The data channel did not open within the configured bound
    #[error("Timeout waiting for data channel after {0}ms")]
    DataChannelTimeout(u64),

    /// Setup finished without all of peer connection, open channel and microphone
    #[error("Connection incomplete: {0}")]
    ConnectionIncomplete(String),

    /// An inbound data-channel frame could not be decoded
    #[error("Protocol decode error: {0}")]
    ProtocolDecodeError(String),

    /// Operation requires a live connection
    #[error("Not connected")]
    NotConnected,

    /// A newer connect or close superseded this in-flight step
    #[error("Connection attempt superseded")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl VoiceChatError {
    /// Whether this error is the silent outcome of a superseded attempt.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, VoiceChatError::Cancelled)
    }
}

/// Result type for voice-chat operations.
pub type VoiceChatResult<T> = Result<T, VoiceChatError>;

/// Failure reported by an injected media or peer-connection primitive.
///
/// Managers translate these into the semantic [`VoiceChatError`] variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Visible connection state of a voice-chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session; nothing live
    #[default]
    Disconnected,
    /// Credential fetch, microphone acquisition or negotiation in progress
    Connecting,
    /// Peer connection, open data channel and microphone are all live
    Connected,
    /// The last attempt or the live session failed; retry is possible
    #[serde(rename = "error")]
    Failed,
}

impl ConnectionState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
