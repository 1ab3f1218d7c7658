//! WebRTC peer connection and data channel lifecycle.
//!
//! Setup runs as a strictly sequential state machine:
//!
//! ```text
//! idle -> negotiating -> connected -> closed -> idle
//!              |             |
//!              +--> error <--+
//! ```
//!
//! 1. create the peer connection and route inbound audio to playback
//! 2. add the local (muted) track
//! 3. create the control data channel
//! 4. create and apply the local offer
//! 5. POST the offer to `{base_url}?model={model}`
//! 6. apply the answer
//! 7. wait for the data channel to open, bounded by a timeout
//! 8. verify connection, open channel and live microphone together
//!
//! `close()` bumps a generation counter. Every step that resumes after an
//! await checks it first; a stale step releases what it created and resolves
//! to [`VoiceChatError::Cancelled`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::base::{DriverError, VoiceChatError, VoiceChatResult};
use super::media::{SharedTrack, TrackReadyState};
use super::openai::{ClientEvent, ErrorEnvelope, SDP_CONTENT_TYPE, sdp_exchange_url};

// =============================================================================
// Peer Primitives
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events a data channel delivers, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelEvent {
    Open,
    /// One text frame
    Message(String),
    Error(String),
    Closed,
}

pub type DataChannelEventSender = mpsc::UnboundedSender<DataChannelEvent>;

/// Control-plane transport multiplexed over the peer connection.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn ready_state(&self) -> DataChannelState;
    fn send(&self, text: &str) -> Result<(), DriverError>;
    fn close(&self);
}

/// Inbound remote audio stream handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAudioStream {
    pub id: String,
}

/// Sink for the remote agent's audio.
pub trait AudioPlayback: Send + Sync {
    /// Attach a stream, or detach with `None`.
    fn set_source(&self, stream: Option<RemoteAudioStream>);
}

pub type RemoteTrackHandler = Box<dyn Fn(RemoteAudioStream) + Send + Sync>;

/// A single WebRTC peer connection. Never reused once closed.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Register the handler invoked for every inbound remote stream.
    fn on_track(&self, handler: RemoteTrackHandler);

    fn add_audio_track(&self, track: SharedTrack) -> Result<(), DriverError>;

    /// Create a data channel; its events are pushed into `events`.
    fn create_data_channel(
        &self,
        label: &str,
        events: DataChannelEventSender,
    ) -> Result<Arc<dyn DataChannel>, DriverError>;

    async fn create_offer(&self) -> Result<SessionDescription, DriverError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), DriverError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), DriverError>;

    /// Replace the outbound audio track in place, without renegotiation.
    async fn replace_audio_track(&self, track: SharedTrack) -> Result<(), DriverError>;

    fn close(&self);
}

/// Factory for peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>, DriverError>;
}

// =============================================================================
// Peer State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    #[default]
    Idle,
    Negotiating,
    Connected,
    Closed,
    Error,
}

impl PeerState {
    pub fn can_transition_to(&self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Error)
                | (Connected, Error)
                | (Negotiating | Connected | Error, Closed)
                | (Closed, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
            PeerState::Error => "error",
        }
    }
}

/// Settings for one [`PeerConnectionManager`].
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub base_url: String,
    pub model: String,
    pub data_channel_label: String,
    pub open_timeout: Duration,
}

/// Setup progress sink.
pub type Progress<'a> = dyn Fn(&'static str) + Send + Sync + 'a;

/// A connected link: inbound data-channel events for the caller to drain.
pub struct PeerLink {
    pub events: mpsc::UnboundedReceiver<DataChannelEvent>,
}

#[derive(Default)]
struct Live {
    connection: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn DataChannel>>,
}

// =============================================================================
// Peer Connection Manager
// =============================================================================

/// Owns the peer connection and data channel.
pub struct PeerConnectionManager {
    connector: Arc<dyn PeerConnector>,
    playback: Arc<dyn AudioPlayback>,
    http: reqwest::Client,
    settings: PeerSettings,
    state: Mutex<PeerState>,
    live: Mutex<Live>,
    generation: AtomicU64,
}

impl PeerConnectionManager {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        playback: Arc<dyn AudioPlayback>,
        http: reqwest::Client,
        settings: PeerSettings,
    ) -> Self {
        Self {
            connector,
            playback,
            http,
            settings,
            state: Mutex::new(PeerState::Idle),
            live: Mutex::new(Live::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub fn has_connection(&self) -> bool {
        self.live.lock().connection.is_some()
    }

    /// Connected with an open data channel.
    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected && self.channel_open()
    }

    fn channel_open(&self) -> bool {
        self.live
            .lock()
            .channel
            .as_ref()
            .is_some_and(|c| c.ready_state() == DataChannelState::Open)
    }

    fn transition(&self, next: PeerState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            warn!(
                "Unexpected peer transition {} -> {}",
                state.as_str(),
                next.as_str()
            );
        }
        debug!("Peer state {} -> {}", state.as_str(), next.as_str());
        *state = next;
    }

    fn ensure_current(&self, generation: u64) -> VoiceChatResult<()> {
        if self.generation.load(Ordering::Acquire) == generation {
            Ok(())
        } else {
            Err(VoiceChatError::Cancelled)
        }
    }

    /// Run the full setup sequence with `track` as the outbound audio.
    ///
    /// `progress` receives a status line as each network phase begins. Any
    /// prior connection is torn down first. On failure all partial state is
    /// released and the manager rests in `Error`.
    pub async fn connect(
        &self,
        secret: &Zeroizing<String>,
        track: SharedTrack,
        progress: &Progress<'_>,
    ) -> VoiceChatResult<PeerLink> {
        self.close();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.transition(PeerState::Negotiating);

        match self.negotiate(generation, secret, track, progress).await {
            Ok(link) => Ok(link),
            Err(VoiceChatError::Cancelled) => {
                debug!("Peer setup superseded");
                Err(VoiceChatError::Cancelled)
            }
            Err(e) => {
                if self.ensure_current(generation).is_ok() {
                    error!("Peer setup failed: {e}");
                    self.release_live();
                    self.transition(PeerState::Error);
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        generation: u64,
        secret: &Zeroizing<String>,
        track: SharedTrack,
        progress: &Progress<'_>,
    ) -> VoiceChatResult<PeerLink> {
        progress("Creating WebRTC connection...");
        let connection = self.create_connection(generation).await?;
        self.add_local_track(&connection, &track)?;
        let (channel, mut events) = self.open_data_channel(&connection)?;

        let offer = self.create_local_offer(generation, &connection).await?;
        progress("Connecting to OpenAI...");
        let answer = self.exchange_sdp(generation, secret, &offer).await?;
        self.apply_answer(generation, &connection, answer).await?;
        self.wait_for_open(generation, &channel, &mut events).await?;
        self.verify(generation, &track)?;

        self.transition(PeerState::Connected);
        info!("Peer connection established");
        Ok(PeerLink { events })
    }

    async fn create_connection(&self, generation: u64) -> VoiceChatResult<Arc<dyn PeerConnection>> {
        let connection = self
            .connector
            .create()
            .await
            .map_err(|e| VoiceChatError::NegotiationError(e.to_string()))?;

        if let Err(e) = self.ensure_current(generation) {
            connection.close();
            return Err(e);
        }

        let playback = self.playback.clone();
        connection.on_track(Box::new(move |stream| {
            debug!("Received remote audio stream {}", stream.id);
            playback.set_source(Some(stream));
        }));

        self.live.lock().connection = Some(connection.clone());
        Ok(connection)
    }

    fn add_local_track(
        &self,
        connection: &Arc<dyn PeerConnection>,
        track: &SharedTrack,
    ) -> VoiceChatResult<()> {
        connection
            .add_audio_track(track.clone())
            .map_err(|e| VoiceChatError::NegotiationError(format!("add track: {e}")))
    }

    fn open_data_channel(
        &self,
        connection: &Arc<dyn PeerConnection>,
    ) -> VoiceChatResult<(Arc<dyn DataChannel>, mpsc::UnboundedReceiver<DataChannelEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = connection
            .create_data_channel(&self.settings.data_channel_label, tx)
            .map_err(|e| VoiceChatError::NegotiationError(format!("data channel: {e}")))?;

        self.live.lock().channel = Some(channel.clone());
        Ok((channel, rx))
    }

    async fn create_local_offer(
        &self,
        generation: u64,
        connection: &Arc<dyn PeerConnection>,
    ) -> VoiceChatResult<SessionDescription> {
        let offer = connection
            .create_offer()
            .await
            .map_err(|e| VoiceChatError::NegotiationError(format!("create offer: {e}")))?;
        self.ensure_current(generation)?;

        connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| VoiceChatError::NegotiationError(format!("local description: {e}")))?;
        self.ensure_current(generation)?;

        Ok(offer)
    }

    async fn exchange_sdp(
        &self,
        generation: u64,
        secret: &Zeroizing<String>,
        offer: &SessionDescription,
    ) -> VoiceChatResult<SessionDescription> {
        let url = sdp_exchange_url(&self.settings.base_url, &self.settings.model);
        debug!("Posting SDP offer to {url}");

        let response = self
            .http
            .post(url.as_str())
            .bearer_auth(secret.as_str())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| VoiceChatError::NegotiationError(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VoiceChatError::NegotiationError(format!("Failed to read response: {e}")))?;
        self.ensure_current(generation)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error)
                .map(|error| error.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("Unknown error ({status})"));
            return Err(VoiceChatError::NegotiationError(message));
        }

        Ok(SessionDescription::answer(body))
    }

    async fn apply_answer(
        &self,
        generation: u64,
        connection: &Arc<dyn PeerConnection>,
        answer: SessionDescription,
    ) -> VoiceChatResult<()> {
        connection
            .set_remote_description(answer)
            .await
            .map_err(|e| VoiceChatError::NegotiationError(format!("remote description: {e}")))?;
        self.ensure_current(generation)
    }

    async fn wait_for_open(
        &self,
        generation: u64,
        channel: &Arc<dyn DataChannel>,
        events: &mut mpsc::UnboundedReceiver<DataChannelEvent>,
    ) -> VoiceChatResult<()> {
        if channel.ready_state() == DataChannelState::Open {
            return Ok(());
        }

        let timeout = self.settings.open_timeout;
        let opened = tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Some(DataChannelEvent::Open) => return Ok(()),
                    Some(DataChannelEvent::Message(_)) => continue,
                    Some(DataChannelEvent::Error(e)) => {
                        return Err(VoiceChatError::ConnectionIncomplete(format!(
                            "data channel error: {e}"
                        )));
                    }
                    Some(DataChannelEvent::Closed) | None => {
                        return Err(VoiceChatError::ConnectionIncomplete(
                            "data channel closed before opening".to_string(),
                        ));
                    }
                }
            }
        })
        .await;

        self.ensure_current(generation)?;
        match opened {
            Ok(result) => result,
            Err(_) => Err(VoiceChatError::DataChannelTimeout(timeout.as_millis() as u64)),
        }
    }

    fn verify(&self, generation: u64, track: &SharedTrack) -> VoiceChatResult<()> {
        self.ensure_current(generation)?;

        let live = self.live.lock();
        if live.connection.is_none() {
            return Err(VoiceChatError::ConnectionIncomplete(
                "No WebRTC connection available".to_string(),
            ));
        }
        match live.channel.as_ref() {
            None => {
                return Err(VoiceChatError::ConnectionIncomplete(
                    "No data channel available".to_string(),
                ));
            }
            Some(channel) if channel.ready_state() != DataChannelState::Open => {
                return Err(VoiceChatError::ConnectionIncomplete(
                    "Data channel not open".to_string(),
                ));
            }
            Some(_) => {}
        }
        if track.ready_state() != TrackReadyState::Live {
            return Err(VoiceChatError::ConnectionIncomplete(
                "No microphone stream available".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize and send a client event over the open data channel.
    pub fn send(&self, event: &ClientEvent) -> VoiceChatResult<()> {
        let channel = self
            .live
            .lock()
            .channel
            .clone()
            .filter(|c| c.ready_state() == DataChannelState::Open)
            .ok_or(VoiceChatError::NotConnected)?;

        let text = serde_json::to_string(event)
            .map_err(|e| VoiceChatError::ProtocolDecodeError(e.to_string()))?;
        debug!("Sending {}", event.event_type());

        channel
            .send(&text)
            .map_err(|e| VoiceChatError::ConnectionIncomplete(format!("send failed: {e}")))
    }

    /// Swap the outbound audio track on the live connection.
    pub async fn replace_audio_track(&self, track: SharedTrack) -> VoiceChatResult<()> {
        let generation = self.generation.load(Ordering::Acquire);
        let connection = self
            .live
            .lock()
            .connection
            .clone()
            .ok_or(VoiceChatError::NotConnected)?;

        connection
            .replace_audio_track(track)
            .await
            .map_err(|e| VoiceChatError::DeviceSwitchError(e.to_string()))?;
        self.ensure_current(generation)
    }

    /// Mark a live connection as failed without releasing it yet.
    pub fn fail(&self) {
        self.transition(PeerState::Error);
    }

    /// Tear down everything and return to `Idle`. Safe from any state and
    /// any number of times; in-flight setup steps become stale.
    pub fn close(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let had_live = self.release_live();

        let state = self.state();
        if state != PeerState::Idle {
            self.transition(PeerState::Closed);
            self.transition(PeerState::Idle);
        }
        if had_live {
            info!("Peer connection closed");
        }
    }

    fn release_live(&self) -> bool {
        let Live {
            connection,
            channel,
        } = std::mem::take(&mut *self.live.lock());

        let had_live = connection.is_some() || channel.is_some();
        if let Some(channel) = channel {
            channel.close();
        }
        if let Some(connection) = connection {
            connection.close();
        }
        self.playback.set_source(None);
        had_live
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.release_live();
    }
}
