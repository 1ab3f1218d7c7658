//! The voice-chat session: one connection-context object owning the
//! negotiator, microphone, peer connection, interaction machine and
//! event translator.
//!
//! # Lifecycle
//!
//! `connect()` tears down any prior connection, then runs credential fetch,
//! microphone acquisition and peer setup in sequence. `close()` is synchronous
//! and idempotent. Both bump an epoch counter; work that resumes after an
//! await under a stale epoch is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime_voice_client::{VoiceChat, VoiceChatConfig, VoiceChatDrivers};
//!
//! let chat = VoiceChat::new(VoiceChatConfig::new("https://app.example/session"), drivers)?;
//! let mut events = chat.subscribe();
//! chat.connect().await?;
//!
//! chat.press();
//! tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//! chat.release(); // commits the buffer and requests a reply
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::base::{ConnectionState, VoiceChatError, VoiceChatResult};
use super::events::{EventBus, StatusUpdate, VoiceChatEvent};
use super::interaction::{Effect, Gesture, InteractionMachine, InteractionState, PressEdge};
use super::media::{InputDevice, MediaDevices, MicrophoneManager, SharedTrack};
use super::openai::{ClientEvent, ToolDef};
use super::peer::{
    AudioPlayback, DataChannelEvent, PeerConnectionManager, PeerConnector, PeerSettings,
};
use super::session::{SessionCredential, SessionNegotiator};
use super::tools::ToolRegistry;
use super::translator::EventTranslator;
use crate::config::VoiceChatConfig;

/// Platform primitives the session drives.
#[derive(Clone)]
pub struct VoiceChatDrivers {
    pub media: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
    pub playback: Arc<dyn AudioPlayback>,
}

/// A voice-chat session. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct VoiceChat {
    inner: Arc<Inner>,
}

struct Inner {
    negotiator: SessionNegotiator,
    microphone: MicrophoneManager,
    peer: PeerConnectionManager,
    bus: EventBus,
    tools: Mutex<ToolRegistry>,
    interaction: Mutex<InteractionMachine>,
    connection: Mutex<ConnectionState>,
    credential: Mutex<Option<SessionCredential>>,
    hold_timer: Mutex<Option<JoinHandle<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    epoch: AtomicU64,
}

impl VoiceChat {
    pub fn new(config: VoiceChatConfig, drivers: VoiceChatDrivers) -> VoiceChatResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceChatError::InvalidConfiguration(format!("HTTP client: {e}")))?;
        Self::with_http_client(config, drivers, http)
    }

    /// Build with a caller-supplied HTTP client (proxies, timeouts, test servers).
    pub fn with_http_client(
        config: VoiceChatConfig,
        drivers: VoiceChatDrivers,
        http: reqwest::Client,
    ) -> VoiceChatResult<Self> {
        config
            .validate()
            .map_err(|e| VoiceChatError::InvalidConfiguration(e.to_string()))?;

        let negotiator = SessionNegotiator::new(http.clone(), config.session_url.clone())
            .with_cookie(config.session_cookie.clone());
        let microphone = MicrophoneManager::new(drivers.media, config.track_check_interval());
        let peer = PeerConnectionManager::new(
            drivers.connector,
            drivers.playback,
            http,
            PeerSettings {
                base_url: config.base_url.clone(),
                model: config.model.clone(),
                data_channel_label: config.data_channel_label.clone(),
                open_timeout: config.data_channel_timeout(),
            },
        );

        let chat = Self {
            inner: Arc::new(Inner {
                negotiator,
                microphone,
                peer,
                bus: EventBus::new(config.event_capacity),
                tools: Mutex::new(ToolRegistry::new()),
                interaction: Mutex::new(InteractionMachine::new(
                    config.hold_threshold(),
                    config.vad.turn_detection(),
                )),
                connection: Mutex::new(ConnectionState::Disconnected),
                credential: Mutex::new(None),
                hold_timer: Mutex::new(None),
                dispatch: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        };

        if config.auto_connect {
            if tokio::runtime::Handle::try_current().is_ok() {
                chat.inner.drive(|_| vec![Effect::Connect]);
            } else {
                warn!("auto_connect requested outside a Tokio runtime, skipping");
            }
        }

        Ok(chat)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceChatEvent> {
        self.inner.bus.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.lock()
    }

    pub fn interaction_state(&self) -> InteractionState {
        self.inner.interaction.lock().state()
    }

    /// Connected with an open data channel and a live microphone.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
            && self.inner.peer.is_connected()
            && self.inner.microphone.check_health().is_ok()
    }

    /// Current local microphone track, if any.
    pub fn microphone_track(&self) -> Option<SharedTrack> {
        self.inner.microphone.current_track()
    }

    /// Prompt material returned with the current session credential.
    pub fn session_prompts(&self) -> Option<serde_json::Value> {
        self.inner
            .credential
            .lock()
            .as_ref()
            .and_then(|c| c.prompts.clone())
    }

    /// Establish a connection, replacing any existing one.
    ///
    /// Resolves to `Cancelled` when a `close()` or newer `connect()`
    /// supersedes this attempt.
    pub async fn connect(&self) -> VoiceChatResult<()> {
        self.inner.begin_connecting();
        Inner::connect(&self.inner).await
    }

    /// Tear everything down. Safe to call any number of times.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Pointer-down / spacebar-down.
    pub fn press(&self) {
        self.inner.drive(|m| m.press(Instant::now()));
    }

    /// Pointer-up / spacebar-up.
    pub fn release(&self) {
        self.inner.drive(|m| m.release(Instant::now()));
    }

    /// Route a raw gesture. Returns `true` when it was consumed and its
    /// default action (page scroll on space) should be suppressed.
    pub fn handle_gesture(&self, gesture: &Gesture) -> bool {
        match gesture.edge() {
            Some(PressEdge::Down) => self.press(),
            Some(PressEdge::Up) => self.release(),
            None => return false,
        }
        true
    }

    /// Offer a tool to the remote agent. Every registration while connected
    /// re-announces the full set.
    pub fn register_tool(&self, tool: ToolDef) {
        let announcement = {
            let mut tools = self.inner.tools.lock();
            tools.register(tool);
            tools.announcement()
        };

        if self.connection_state() == ConnectionState::Connected {
            self.inner.send(&announcement);
        }
    }

    pub fn registered_tools(&self) -> Vec<ToolDef> {
        self.inner.tools.lock().tools().to_vec()
    }

    /// Inject text context as a user message. Empty text is ignored.
    pub fn add_context(&self, text: &str) -> VoiceChatResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.inner.peer.send(&ClientEvent::user_context(text))
    }

    /// Ask the remote agent to respond now.
    pub fn please_respond(&self) -> VoiceChatResult<()> {
        self.inner.peer.send(&ClientEvent::ResponseCreate)
    }

    /// Hot-swap the input device. On failure the previous device stays active.
    pub async fn switch_microphone(&self, device_id: &str) -> VoiceChatResult<()> {
        let inner = &self.inner;
        match inner.microphone.switch_device(device_id, &inner.peer).await {
            Ok(track) => {
                // A gesture during the swap toggled the old track
                {
                    let machine = inner.interaction.lock();
                    let is_current = inner
                        .microphone
                        .current_track()
                        .is_some_and(|t| Arc::ptr_eq(&t, &track));
                    if is_current {
                        track.set_enabled(machine.state().transmits());
                    }
                }
                inner
                    .bus
                    .status(StatusUpdate::success("Microphone switched successfully"));
                Ok(())
            }
            Err(VoiceChatError::Cancelled) => Err(VoiceChatError::Cancelled),
            Err(e) => {
                let reason = match &e {
                    VoiceChatError::DeviceSwitchError(m) => m.clone(),
                    other => other.to_string(),
                };
                warn!("Microphone switch failed: {reason}");
                inner.bus.status(StatusUpdate::error(format!(
                    "Failed to switch microphone: {reason}"
                )));
                Err(e)
            }
        }
    }

    /// Audio input devices, for a selector.
    pub async fn list_microphones(&self) -> VoiceChatResult<Vec<InputDevice>> {
        self.inner.microphone.list_devices().await
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn ensure_current(&self, epoch: u64) -> VoiceChatResult<()> {
        if self.current_epoch() == epoch {
            Ok(())
        } else {
            Err(VoiceChatError::Cancelled)
        }
    }

    fn set_connection(&self, state: ConnectionState) {
        let mut current = self.connection.lock();
        self.write_connection(&mut current, state);
    }

    /// Write `state` only if `epoch` is still current. The check and the
    /// write happen under the connection lock that `close()` bumps under.
    fn set_connection_if_current(&self, epoch: u64, state: ConnectionState) -> VoiceChatResult<()> {
        let mut current = self.connection.lock();
        self.ensure_current(epoch)?;
        self.write_connection(&mut current, state);
        Ok(())
    }

    fn write_connection(&self, current: &mut ConnectionState, state: ConnectionState) {
        if *current != state {
            *current = state;
            info!("Voice chat {}", state);
            self.bus.publish(VoiceChatEvent::ConnectionChanged(state));
        }
    }

    fn bump_epoch(&self) {
        let _connection = self.connection.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn begin_connecting(&self) {
        self.set_connection(ConnectionState::Connecting);
        let (before, after) = {
            let mut machine = self.interaction.lock();
            let before = machine.state();
            machine.connecting();
            (before, machine.state())
        };
        if before != after {
            self.bus.publish(VoiceChatEvent::InteractionChanged(after));
        }
    }

    async fn connect(self: &Arc<Self>) -> VoiceChatResult<()> {
        self.teardown();
        let epoch = {
            let _connection = self.connection.lock();
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };

        match self.setup(epoch).await {
            Ok(()) => Ok(()),
            Err(VoiceChatError::Cancelled) => {
                debug!("Connection attempt {epoch} superseded");
                Err(VoiceChatError::Cancelled)
            }
            Err(e) => {
                if self.ensure_current(epoch).is_ok() {
                    error!("Connection setup failed: {e}");
                    self.teardown();
                    if self
                        .set_connection_if_current(epoch, ConnectionState::Failed)
                        .is_ok()
                        && self.drive_guarded(Some(epoch), |m| m.disconnected(true))
                    {
                        self.bus
                            .status(StatusUpdate::error(format!("Error: {e}. Click to retry.")));
                    }
                }
                Err(e)
            }
        }
    }

    async fn setup(self: &Arc<Self>, epoch: u64) -> VoiceChatResult<()> {
        // Session credential
        self.bus.status(StatusUpdate::info("Getting session token..."));
        let credential = self.negotiator.fetch().await?;
        self.ensure_current(epoch)?;
        self.bus.status(StatusUpdate::success("Session token received"));

        if !credential.tools.is_empty() {
            self.tools.lock().extend(credential.tools.iter().cloned());
        }

        // Microphone
        self.bus.status(StatusUpdate::info("Setting up microphone..."));
        let track = self.microphone.acquire().await?;
        if let Err(e) = self.ensure_current(epoch) {
            self.microphone.release_track(&track);
            return Err(e);
        }
        let label = track.label();
        let label = if label.is_empty() {
            "default device".to_string()
        } else {
            label
        };
        self.bus
            .status(StatusUpdate::success(format!("Using microphone: {label}")));

        self.microphone.suspend_monitoring(true);
        let weak = Arc::downgrade(self);
        self.microphone.monitor(move |e| {
            if let Some(inner) = weak.upgrade() {
                inner.on_microphone_lost(epoch, e);
            }
        });

        // Peer connection
        let bus = self.bus.clone();
        let progress = move |message: &'static str| bus.status(StatusUpdate::info(message));
        let negotiated = self
            .peer
            .connect(&credential.secret, track.clone(), &progress)
            .await;
        self.microphone.suspend_monitoring(false);
        let link = negotiated?;
        self.ensure_current(epoch)?;

        let still_ours = self
            .microphone
            .current_track()
            .is_some_and(|t| Arc::ptr_eq(&t, &track));
        if !still_ours {
            return Err(VoiceChatError::ConnectionIncomplete(
                "No microphone stream available".to_string(),
            ));
        }

        // Connected
        *self.credential.lock() = Some(credential);
        self.spawn_dispatch(epoch, link.events)?;
        self.set_connection_if_current(epoch, ConnectionState::Connected)?;
        if !self.drive_guarded(Some(epoch), |m| m.connected()) {
            return Err(VoiceChatError::Cancelled);
        }
        self.bus
            .status(StatusUpdate::success("Connection established!"));

        let announcement = {
            let tools = self.tools.lock();
            (!tools.is_empty()).then(|| tools.announcement())
        };
        if let Some(announcement) = announcement {
            self.send(&announcement);
        }

        Ok(())
    }

    fn spawn_dispatch(
        self: &Arc<Self>,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<DataChannelEvent>,
    ) -> VoiceChatResult<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut translator = EventTranslator::new();
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.ensure_current(epoch).is_err() {
                    break;
                }

                match event {
                    DataChannelEvent::Open => {
                        inner.bus.status(StatusUpdate::success("Data channel ready"));
                    }
                    DataChannelEvent::Message(text) => match translator.translate(&text) {
                        Ok(events) => {
                            for event in events {
                                inner.bus.publish(event);
                            }
                        }
                        Err(e) => {
                            warn!("Dropping inbound frame: {e}");
                            inner.bus.status(StatusUpdate::error(format!("Error: {e}")));
                        }
                    },
                    DataChannelEvent::Error(e) => {
                        error!("Data channel error: {e}");
                        inner.fail(epoch, "Connection error");
                        break;
                    }
                    DataChannelEvent::Closed => {
                        info!("Data channel closed by remote");
                        inner.close();
                        break;
                    }
                }
            }
        });

        // Teardown takes this slot after bumping the epoch
        let mut slot = self.dispatch.lock();
        if let Err(e) = self.ensure_current(epoch) {
            handle.abort();
            return Err(e);
        }
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn on_microphone_lost(self: &Arc<Self>, epoch: u64, e: VoiceChatError) {
        warn!("{e}");
        self.fail(epoch, "Microphone disconnected");
    }

    /// Steady-state failure: tear down and invite a reconnect.
    fn fail(self: &Arc<Self>, epoch: u64, reason: &str) {
        let failed_epoch = {
            let _connection = self.connection.lock();
            if self.ensure_current(epoch).is_err() {
                return;
            }
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.peer.fail();
        self.teardown();
        if self
            .set_connection_if_current(failed_epoch, ConnectionState::Failed)
            .is_err()
            || !self.drive_guarded(Some(failed_epoch), |m| m.disconnected(true))
        {
            return;
        }
        self.bus
            .status(StatusUpdate::error(format!("{reason}. Click to reconnect.")));
    }

    fn close(&self) {
        self.bump_epoch();
        let was_live = self.teardown();
        let was_disconnected = *self.connection.lock() == ConnectionState::Disconnected;

        self.set_connection(ConnectionState::Disconnected);
        let (before, after) = {
            let mut machine = self.interaction.lock();
            let before = machine.state();
            machine.disconnected(false);
            (before, machine.state())
        };
        if before != after {
            self.bus.publish(VoiceChatEvent::InteractionChanged(after));
        }

        if was_live || !was_disconnected {
            self.bus.status(StatusUpdate::info("Connection closed"));
        }
    }

    /// Release every live resource. Returns whether anything was live.
    fn teardown(&self) -> bool {
        if let Some(timer) = self.hold_timer.lock().take() {
            timer.abort();
        }
        let had_dispatch = match self.dispatch.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        };
        let had_peer = self.peer.has_connection();
        let had_track = self.microphone.current_track().is_some();

        self.peer.close();
        self.microphone.release();
        self.credential.lock().take();

        had_dispatch || had_peer || had_track
    }

    fn send(&self, event: &ClientEvent) {
        if let Err(e) = self.peer.send(event) {
            warn!("Could not send {}: {e}", event.event_type());
        }
    }

    /// Run one interaction transition and carry out its effects.
    fn drive(self: &Arc<Self>, step: impl FnOnce(&mut InteractionMachine) -> Vec<Effect>) {
        self.drive_guarded(None, step);
    }

    /// Like `drive`, but skipped when `epoch` is given and no longer current.
    ///
    /// Effects are applied while the interaction lock is still held, so two
    /// transitions racing on different threads cannot reorder their track
    /// flips or outbound frames. `Connect` re-enters the machine and runs
    /// after the lock is released.
    fn drive_guarded(
        self: &Arc<Self>,
        epoch: Option<u64>,
        step: impl FnOnce(&mut InteractionMachine) -> Vec<Effect>,
    ) -> bool {
        let deferred = {
            let mut machine = self.interaction.lock();
            if epoch.is_some_and(|epoch| self.ensure_current(epoch).is_err()) {
                return false;
            }
            let before = machine.state();
            let effects = step(&mut machine);
            let after = machine.state();

            let mut deferred = Vec::new();
            for effect in effects {
                match effect {
                    Effect::Connect => deferred.push(effect),
                    other => self.apply(other),
                }
            }

            if before != after {
                debug!("Interaction {} -> {}", before.as_str(), after.as_str());
                self.bus.publish(VoiceChatEvent::InteractionChanged(after));
            }
            deferred
        };

        for effect in deferred {
            self.apply(effect);
        }
        true
    }

    fn apply(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::Connect => {
                if *self.connection.lock() == ConnectionState::Connecting {
                    return;
                }
                self.begin_connecting();
                let inner = self.clone();
                tokio::spawn(async move {
                    match Inner::connect(&inner).await {
                        Err(e) if !e.is_cancelled() => {
                            debug!("Gesture-triggered connect failed: {e}");
                        }
                        _ => {}
                    }
                });
            }
            Effect::ArmHoldTimer { press_id, after } => {
                let weak = Arc::downgrade(self);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.drive(|m| m.hold_elapsed(press_id));
                    }
                });
                if let Some(previous) = self.hold_timer.lock().replace(timer) {
                    previous.abort();
                }
            }
            Effect::CancelHoldTimer => {
                if let Some(timer) = self.hold_timer.lock().take() {
                    timer.abort();
                }
            }
            Effect::SetTrackEnabled(enabled) => {
                if let Some(track) = self.microphone.current_track() {
                    track.set_enabled(enabled);
                }
            }
            Effect::Send(event) => self.send(&event),
            Effect::Status(status) => self.bus.status(status),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.teardown();
    }
}
