//! Realtime voice-chat session core.
//!
//! This module implements a push-to-talk / toggle-mute voice chat against a
//! hosted realtime speech API over WebRTC.
//!
//! # Components
//!
//! - [`SessionNegotiator`] - trades the host's session endpoint for an ephemeral secret
//! - [`MicrophoneManager`] - acquires, monitors and hot-swaps the input device
//! - [`PeerConnectionManager`] - offer/answer exchange and data channel lifecycle
//! - [`InteractionMachine`] - hold-to-talk vs tap-to-toggle disambiguation
//! - [`EventTranslator`] - inbound protocol frames to semantic events
//! - [`VoiceChat`] - the connection context wiring all of the above
//!
//! # Architecture
//!
//! Setup is sequential: negotiator, then microphone, then peer connection.
//! Once connected, gestures drive the interaction machine while a dispatch
//! task drains the data channel through the translator. Everything is
//! published on a typed [`EventBus`].
//!
//! Platform media and WebRTC are injected through the [`MediaDevices`],
//! [`PeerConnector`] and [`AudioPlayback`] traits.

mod base;
mod controller;
mod events;
mod interaction;
mod media;
pub mod openai;
mod peer;
mod session;
mod tools;
mod transcript;
mod translator;

pub use base::{ConnectionState, DriverError, VoiceChatError, VoiceChatResult};
pub use controller::{VoiceChat, VoiceChatDrivers};
pub use events::{EventBus, FunctionCall, StatusLevel, StatusUpdate, VoiceChatEvent};
pub use interaction::{
    Effect, FocusTarget, Gesture, InteractionMachine, InteractionState, PressEdge,
};
pub use media::{
    AudioConstraints, AudioTrack, DeviceKind, InputDevice, MediaDevices, MicrophoneManager,
    SharedTrack, TrackReadyState,
};
pub use peer::{
    AudioPlayback, DataChannel, DataChannelEvent, DataChannelEventSender, DataChannelState,
    PeerConnection, PeerConnectionManager, PeerConnector, PeerLink, PeerSettings, PeerState,
    Progress, RemoteAudioStream, RemoteTrackHandler, SdpType, SessionDescription,
};
pub use session::{SessionCredential, SessionNegotiator};
pub use tools::ToolRegistry;
pub use transcript::{Speaker, TranscriptEntry, TranscriptLog};
pub use translator::EventTranslator;
