//! Microphone acquisition, health monitoring and hot-swap.
//!
//! Platform media access is injected through [`MediaDevices`], so the manager
//! runs the same against a browser bridge, a native audio stack or a test mock.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::base::{DriverError, VoiceChatError, VoiceChatResult};
use super::peer::PeerConnectionManager;

// =============================================================================
// Media Primitives
// =============================================================================

/// Ready state of a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackReadyState {
    Live,
    Ended,
}

/// A live local audio input track.
pub trait AudioTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    /// Human-readable device label; empty until permission has been granted
    fn label(&self) -> String;

    fn is_enabled(&self) -> bool;

    /// Enable or disable transmission without releasing the device
    fn set_enabled(&self, enabled: bool);

    fn ready_state(&self) -> TrackReadyState;

    /// Release the device. The track reports `Ended` afterwards.
    fn stop(&self);
}

pub type SharedTrack = Arc<dyn AudioTrack>;

/// Which input device to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AudioConstraints {
    /// The platform's default input
    #[default]
    Default,
    /// Exactly this device id
    Device(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

/// An entry from device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    pub device_id: String,
    #[serde(default)]
    pub label: String,
    pub kind: DeviceKind,
}

impl InputDevice {
    pub fn audio_input(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind: DeviceKind::AudioInput,
        }
    }

    /// Label for a device selector; `index` is the zero-based list position.
    pub fn display_label(&self, index: usize) -> String {
        if self.label.is_empty() {
            format!("Microphone {}", index + 1)
        } else {
            self.label.clone()
        }
    }
}

/// Platform media access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open an audio input stream and return its track.
    async fn get_user_media(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<SharedTrack, DriverError>;

    /// List media devices of every kind.
    async fn enumerate_devices(&self) -> Result<Vec<InputDevice>, DriverError>;
}

// =============================================================================
// Microphone Manager
// =============================================================================

/// Owns the local microphone track.
pub struct MicrophoneManager {
    devices: Arc<dyn MediaDevices>,
    track: Arc<Mutex<Option<SharedTrack>>>,
    check_interval: Duration,
    suspended: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MicrophoneManager {
    pub fn new(devices: Arc<dyn MediaDevices>, check_interval: Duration) -> Self {
        Self {
            devices,
            track: Arc::new(Mutex::new(None)),
            check_interval,
            suspended: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
        }
    }

    /// Open the default input device. The returned track starts disabled.
    pub async fn acquire(&self) -> VoiceChatResult<SharedTrack> {
        let track = self
            .devices
            .get_user_media(&AudioConstraints::Default)
            .await
            .map_err(|e| VoiceChatError::MicrophoneUnavailable(e.to_string()))?;

        if track.ready_state() == TrackReadyState::Ended {
            track.stop();
            return Err(VoiceChatError::MicrophoneUnavailable(
                "no live input device".to_string(),
            ));
        }

        track.set_enabled(false);
        info!("Acquired microphone '{}' ({})", track.label(), track.id());

        if let Some(previous) = self.track.lock().replace(track.clone()) {
            previous.stop();
        }
        Ok(track)
    }

    pub fn current_track(&self) -> Option<SharedTrack> {
        self.track.lock().clone()
    }

    /// Fails with `MicrophoneLost` when the track is absent or has ended.
    pub fn check_health(&self) -> VoiceChatResult<()> {
        check_track(&self.track)
    }

    /// Start polling track health. `on_lost` runs once, on the first failed
    /// check, and the monitor then stops.
    pub fn monitor<F>(&self, on_lost: F)
    where
        F: FnOnce(VoiceChatError) + Send + 'static,
    {
        let track = self.track.clone();
        let suspended = self.suspended.clone();
        let period = self.check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if suspended.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(e) = check_track(&track) {
                    warn!("Microphone health check failed: {e}");
                    on_lost(e);
                    break;
                }
            }
        });

        if let Some(previous) = self.monitor.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_monitor(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
    }

    /// Skip health checks while negotiation churns the media pipeline.
    pub fn suspend_monitoring(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }

    /// Swap to another input device without renegotiating.
    ///
    /// The new track inherits the old track's enabled flag. On failure the
    /// prior track stays in place, untouched.
    pub async fn switch_device(
        &self,
        device_id: &str,
        peer: &PeerConnectionManager,
    ) -> VoiceChatResult<SharedTrack> {
        let old = self.current_track().ok_or(VoiceChatError::NotConnected)?;

        let new = self
            .devices
            .get_user_media(&AudioConstraints::Device(device_id.to_string()))
            .await
            .map_err(|e| VoiceChatError::DeviceSwitchError(e.to_string()))?;
        new.set_enabled(old.is_enabled());

        if peer.has_connection() {
            if let Err(e) = peer.replace_audio_track(new.clone()).await {
                new.stop();
                return Err(match e {
                    VoiceChatError::Cancelled => e,
                    other => VoiceChatError::DeviceSwitchError(other.to_string()),
                });
            }
        }

        {
            let mut slot = self.track.lock();
            let still_current = slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, &old));
            if !still_current {
                // Torn down or switched again while acquiring
                drop(slot);
                new.stop();
                return Err(VoiceChatError::Cancelled);
            }
            *slot = Some(new.clone());
        }

        old.stop();
        info!("Switched microphone to '{}' ({})", new.label(), device_id);
        Ok(new)
    }

    /// Enumerate audio input devices.
    pub async fn list_devices(&self) -> VoiceChatResult<Vec<InputDevice>> {
        let devices = self
            .devices
            .enumerate_devices()
            .await
            .map_err(|e| VoiceChatError::MicrophoneUnavailable(e.to_string()))?;

        Ok(devices
            .into_iter()
            .filter(|d| d.kind == DeviceKind::AudioInput)
            .collect())
    }

    /// Stop monitoring and release the track. Safe to call repeatedly.
    pub fn release(&self) {
        self.stop_monitor();
        self.suspended.store(false, Ordering::Release);
        if let Some(track) = self.track.lock().take() {
            debug!("Releasing microphone track {}", track.id());
            track.stop();
        }
    }

    /// Release `track` only if it is still the current one.
    pub fn release_track(&self, track: &SharedTrack) {
        let mut slot = self.track.lock();
        if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, track)) {
            *slot = None;
        }
        drop(slot);
        track.stop();
    }
}

impl Drop for MicrophoneManager {
    fn drop(&mut self) {
        self.release();
    }
}

fn check_track(slot: &Mutex<Option<SharedTrack>>) -> VoiceChatResult<()> {
    match slot.lock().as_ref() {
        None => Err(VoiceChatError::MicrophoneLost("no active track".to_string())),
        Some(track) if track.ready_state() == TrackReadyState::Ended => Err(
            VoiceChatError::MicrophoneLost(format!("track '{}' ended", track.label())),
        ),
        Some(_) => Ok(()),
    }
}
