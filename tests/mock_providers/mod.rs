//! In-process mock media and WebRTC primitives.
//!
//! - `MockMediaDevices` hands out `MockTrack`s and can be told to fail
//! - `MockConnector` creates `MockPeerConnection`s whose data channel opens
//!   when the remote answer is applied (unless `auto_open` is off)
//! - `MockPlayback` records the attached remote stream
//! - `mount_realtime` stands up the session and SDP endpoints on wiremock

// Allow dead code in test infrastructure - not every test uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use realtime_voice_client::core::realtime::{
    AudioConstraints, AudioPlayback, AudioTrack, DataChannel, DataChannelEvent,
    DataChannelEventSender, DataChannelState, DeviceKind, DriverError, InputDevice, MediaDevices,
    PeerConnection, PeerConnector, RemoteAudioStream, RemoteTrackHandler, SdpType,
    SessionDescription, SharedTrack, TrackReadyState, VoiceChatDrivers, VoiceChatEvent,
};
use realtime_voice_client::VoiceChatConfig;

pub const TEST_SECRET: &str = "ek_test_secret_0123456789";
pub const TEST_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const ANSWER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=answer\r\n";

// =============================================================================
// Media
// =============================================================================

#[derive(Debug)]
pub struct MockTrack {
    pub id: String,
    pub label: String,
    enabled: AtomicBool,
    ended: AtomicBool,
}

impl MockTrack {
    pub fn new(id: &str, label: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            label: label.to_string(),
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
        })
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Simulate the device being unplugged.
    pub fn unplug(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

impl AudioTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn ready_state(&self) -> TrackReadyState {
        if self.is_ended() {
            TrackReadyState::Ended
        } else {
            TrackReadyState::Live
        }
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockMediaDevices {
    pub deny: AtomicBool,
    /// Device id whose acquisition fails
    pub broken_device: Mutex<Option<String>>,
    pub opened: Mutex<Vec<Arc<MockTrack>>>,
    pub delay: Mutex<Option<Duration>>,
}

impl MockMediaDevices {
    pub fn track(&self, index: usize) -> Arc<MockTrack> {
        self.opened.lock()[index].clone()
    }

    pub fn last_track(&self) -> Option<Arc<MockTrack>> {
        self.opened.lock().last().cloned()
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn live_tracks(&self) -> usize {
        self.opened.lock().iter().filter(|t| !t.is_ended()).count()
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<SharedTrack, DriverError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(DriverError::new("Permission denied"));
        }

        let (id, label) = match constraints {
            AudioConstraints::Default => ("default".to_string(), "Built-in Microphone".to_string()),
            AudioConstraints::Device(id) => {
                if self.broken_device.lock().as_deref() == Some(id.as_str()) {
                    return Err(DriverError::new("Could not start audio source"));
                }
                (id.clone(), format!("Device {id}"))
            }
        };

        let track = MockTrack::new(&id, &label);
        self.opened.lock().push(track.clone());
        Ok(track)
    }

    async fn enumerate_devices(&self) -> Result<Vec<InputDevice>, DriverError> {
        Ok(vec![
            InputDevice::audio_input("default", "Built-in Microphone"),
            InputDevice::audio_input("usb-1", ""),
            InputDevice {
                device_id: "speakers".to_string(),
                label: "Speakers".to_string(),
                kind: DeviceKind::AudioOutput,
            },
        ])
    }
}

// =============================================================================
// Peer Connection
// =============================================================================

pub struct MockDataChannel {
    pub label: String,
    state: Mutex<DataChannelState>,
    pub sent: Mutex<Vec<String>>,
    events: DataChannelEventSender,
}

impl MockDataChannel {
    /// Remote side opened the channel.
    pub fn open(&self) {
        *self.state.lock() = DataChannelState::Open;
        let _ = self.events.send(DataChannelEvent::Open);
    }

    /// Deliver one inbound frame.
    pub fn deliver(&self, frame: &str) {
        let _ = self
            .events
            .send(DataChannelEvent::Message(frame.to_string()));
    }

    pub fn deliver_json(&self, frame: Value) {
        self.deliver(&frame.to_string());
    }

    pub fn remote_close(&self) {
        *self.state.lock() = DataChannelState::Closed;
        let _ = self.events.send(DataChannelEvent::Closed);
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .events
            .send(DataChannelEvent::Error(message.to_string()));
    }

    /// Outbound frames, parsed.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    /// Outbound frame types, in order.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn send(&self, text: &str) -> Result<(), DriverError> {
        if *self.state.lock() != DataChannelState::Open {
            return Err(DriverError::new("channel not open"));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if *state != DataChannelState::Closed {
            *state = DataChannelState::Closed;
            drop(state);
            let _ = self.events.send(DataChannelEvent::Closed);
        }
    }
}

pub struct MockPeerConnection {
    auto_open: bool,
    fail_replace: bool,
    replace_delay: Duration,
    pub channel: Mutex<Option<Arc<MockDataChannel>>>,
    pub tracks: Mutex<Vec<SharedTrack>>,
    pub replaced: Mutex<Vec<SharedTrack>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    on_track: Mutex<Option<RemoteTrackHandler>>,
    closed: AtomicBool,
}

impl MockPeerConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn data_channel(&self) -> Arc<MockDataChannel> {
        self.channel
            .lock()
            .clone()
            .expect("data channel should have been created")
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    fn on_track(&self, handler: RemoteTrackHandler) {
        *self.on_track.lock() = Some(handler);
    }

    fn add_audio_track(&self, track: SharedTrack) -> Result<(), DriverError> {
        self.tracks.lock().push(track);
        Ok(())
    }

    fn create_data_channel(
        &self,
        label: &str,
        events: DataChannelEventSender,
    ) -> Result<Arc<dyn DataChannel>, DriverError> {
        let channel = Arc::new(MockDataChannel {
            label: label.to_string(),
            state: Mutex::new(DataChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
            events,
        });
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, DriverError> {
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=offer\r\n".to_string(),
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), DriverError> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), DriverError> {
        if desc.sdp_type != SdpType::Answer {
            return Err(DriverError::new("expected an answer"));
        }
        *self.remote.lock() = Some(desc);

        if let Some(handler) = self.on_track.lock().as_ref() {
            handler(RemoteAudioStream {
                id: "remote-audio".to_string(),
            });
        }
        if self.auto_open {
            if let Some(channel) = self.channel.lock().clone() {
                channel.open();
            }
        }
        Ok(())
    }

    async fn replace_audio_track(&self, track: SharedTrack) -> Result<(), DriverError> {
        if !self.replace_delay.is_zero() {
            tokio::time::sleep(self.replace_delay).await;
        }
        if self.fail_replace {
            return Err(DriverError::new("sender rejected track"));
        }
        self.replaced.lock().push(track);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockConnector {
    pub auto_open: AtomicBool,
    pub fail_replace: AtomicBool,
    /// Delay applied to `replace_audio_track`, in milliseconds
    pub replace_delay_ms: AtomicU64,
    pub connections: Mutex<Vec<Arc<MockPeerConnection>>>,
    pub created: AtomicUsize,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            auto_open: AtomicBool::new(true),
            fail_replace: AtomicBool::new(false),
            replace_delay_ms: AtomicU64::new(0),
            connections: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }
}

impl MockConnector {
    pub fn last(&self) -> Arc<MockPeerConnection> {
        self.connections
            .lock()
            .last()
            .cloned()
            .expect("a peer connection should have been created")
    }

    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create(&self) -> Result<Arc<dyn PeerConnection>, DriverError> {
        let connection = Arc::new(MockPeerConnection {
            auto_open: self.auto_open.load(Ordering::SeqCst),
            fail_replace: self.fail_replace.load(Ordering::SeqCst),
            replace_delay: Duration::from_millis(self.replace_delay_ms.load(Ordering::SeqCst)),
            channel: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            on_track: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

#[derive(Default)]
pub struct MockPlayback {
    pub source: Mutex<Option<RemoteAudioStream>>,
}

impl MockPlayback {
    pub fn has_source(&self) -> bool {
        self.source.lock().is_some()
    }
}

impl AudioPlayback for MockPlayback {
    fn set_source(&self, stream: Option<RemoteAudioStream>) {
        *self.source.lock() = stream;
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct MockDrivers {
    pub media: Arc<MockMediaDevices>,
    pub connector: Arc<MockConnector>,
    pub playback: Arc<MockPlayback>,
}

impl MockDrivers {
    pub fn new() -> Self {
        Self {
            media: Arc::new(MockMediaDevices::default()),
            connector: Arc::new(MockConnector::default()),
            playback: Arc::new(MockPlayback::default()),
        }
    }

    pub fn drivers(&self) -> VoiceChatDrivers {
        VoiceChatDrivers {
            media: self.media.clone(),
            connector: self.connector.clone(),
            playback: self.playback.clone(),
        }
    }
}

/// Session endpoint at `/session`, SDP exchange at `/v1/realtime`.
pub async fn mount_realtime(server: &MockServer, session_body: Value) {
    mount_realtime_with_sdp_delay(server, session_body, Duration::ZERO).await;
}

/// As [`mount_realtime`], with the SDP answer held back for `delay`.
pub async fn mount_realtime_with_sdp_delay(
    server: &MockServer,
    session_body: Value,
    delay: Duration,
) {
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(query_param("model", TEST_MODEL))
        .and(header("authorization", format!("Bearer {TEST_SECRET}").as_str()))
        .and(header("content-type", "application/sdp"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_string(ANSWER_SDP)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

pub fn default_session_body() -> Value {
    json!({ "client_secret": TEST_SECRET })
}

/// Config pointing at the mock server with short timings.
pub fn test_config(server: &MockServer) -> VoiceChatConfig {
    VoiceChatConfig {
        base_url: format!("{}/v1/realtime", server.uri()),
        model: TEST_MODEL.to_string(),
        hold_threshold_ms: 50,
        track_check_interval_ms: 20,
        data_channel_timeout_ms: 200,
        ..VoiceChatConfig::new(format!("{}/session", server.uri()))
    }
}

/// Drain events already published, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<VoiceChatEvent>) -> Vec<VoiceChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Status messages among `events`.
pub fn statuses(events: &[VoiceChatEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            VoiceChatEvent::Status(s) => Some(s.message.clone()),
            _ => None,
        })
        .collect()
}

/// Wait until `condition` holds, polling every 5ms, for at most one second.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
