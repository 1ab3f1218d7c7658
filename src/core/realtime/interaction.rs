//! Push-to-talk / toggle-mute interaction state machine.
//!
//! A single physical input (pointer or spacebar) drives two modes:
//!
//! - **Hold** past the threshold: push-to-talk. The track is enabled and server
//!   VAD suspended while held; release commits the buffer and asks for a reply.
//! - **Tap** (release before the threshold): toggle between `muted` and
//!   `toggled-open`. Open clears buffered audio and enables server VAD.
//!
//! The machine is pure: every input returns the [`Effect`]s the session must
//! carry out (arm a timer, enable the track, send a protocol event). It reads
//! no clock of its own, so callers pass the press/release instants in.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::events::StatusUpdate;
use super::openai::{ClientEvent, TurnDetection};

const STATUS_LISTENING: &str = "Listening...";
const STATUS_CHANNEL_OPEN: &str = "Channel open (tap to mute)";
const STATUS_MUTED: &str = "Hold to talk or tap to toggle";

/// Current gesture/audio mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionState {
    /// No usable connection; gestures only trigger setup
    #[default]
    Idle,
    /// Push-to-talk held past the threshold
    Holding,
    /// Channel open until the user taps again
    ToggledOpen,
    /// Connected, track disabled
    Muted,
    /// Setup or the live session failed
    Error,
}

impl InteractionState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::Holding => "holding",
            InteractionState::ToggledOpen => "toggled-open",
            InteractionState::Muted => "muted",
            InteractionState::Error => "error",
        }
    }

    /// Whether the microphone track must be enabled in this state.
    #[inline]
    pub fn transmits(&self) -> bool {
        matches!(self, InteractionState::Holding | InteractionState::ToggledOpen)
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start connection setup (fire-and-continue)
    Connect,
    /// Arm the hold timer; deliver `hold_elapsed(press_id)` after `after`
    ArmHoldTimer { press_id: u64, after: Duration },
    /// Cancel any armed hold timer
    CancelHoldTimer,
    /// Enable or disable the outbound microphone track
    SetTrackEnabled(bool),
    /// Send a protocol event over the data channel
    Send(ClientEvent),
    /// Publish a status line
    Status(StatusUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Down,
    Connecting,
    Up,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Press {
    id: u64,
    started: Instant,
}

/// The interaction state machine.
#[derive(Debug, Clone)]
pub struct InteractionMachine {
    hold_threshold: Duration,
    vad: TurnDetection,
    link: Link,
    /// Toggled open by a tap; survives push-to-talk
    channel_open: bool,
    holding: bool,
    press: Option<Press>,
    next_press_id: u64,
}

impl InteractionMachine {
    pub fn new(hold_threshold: Duration, vad: TurnDetection) -> Self {
        Self {
            hold_threshold,
            vad,
            link: Link::Down,
            channel_open: false,
            holding: false,
            press: None,
            next_press_id: 0,
        }
    }

    pub fn state(&self) -> InteractionState {
        match self.link {
            Link::Failed => InteractionState::Error,
            Link::Down | Link::Connecting => InteractionState::Idle,
            Link::Up if self.holding => InteractionState::Holding,
            Link::Up if self.channel_open => InteractionState::ToggledOpen,
            Link::Up => InteractionState::Muted,
        }
    }

    #[inline]
    pub fn hold_threshold(&self) -> Duration {
        self.hold_threshold
    }

    /// Pointer-down or spacebar-down.
    pub fn press(&mut self, now: Instant) -> Vec<Effect> {
        match self.link {
            Link::Down | Link::Failed => return vec![Effect::Connect],
            // No track yet; the gesture has nothing to act on
            Link::Connecting => return Vec::new(),
            Link::Up => {}
        }

        self.next_press_id += 1;
        let id = self.next_press_id;
        self.press = Some(Press { id, started: now });

        vec![
            Effect::CancelHoldTimer,
            Effect::ArmHoldTimer {
                press_id: id,
                after: self.hold_threshold,
            },
        ]
    }

    /// The hold timer armed for `press_id` fired.
    pub fn hold_elapsed(&mut self, press_id: u64) -> Vec<Effect> {
        let current = self.press.is_some_and(|p| p.id == press_id);
        if !current || self.link != Link::Up || self.holding {
            return Vec::new();
        }

        self.holding = true;
        vec![
            Effect::SetTrackEnabled(true),
            Effect::Send(ClientEvent::disable_vad()),
            Effect::Status(StatusUpdate::info(STATUS_LISTENING)),
        ]
    }

    /// Pointer-up or spacebar-up.
    pub fn release(&mut self, now: Instant) -> Vec<Effect> {
        let Some(press) = self.press.take() else {
            return Vec::new();
        };

        let mut effects = vec![Effect::CancelHoldTimer];
        if self.link != Link::Up {
            self.holding = false;
            return effects;
        }

        if self.holding {
            self.holding = false;
            effects.push(Effect::Send(ClientEvent::InputAudioBufferCommit));
            effects.push(Effect::Send(ClientEvent::ResponseCreate));
            if self.channel_open {
                effects.push(Effect::SetTrackEnabled(true));
                effects.push(Effect::Send(ClientEvent::enable_vad(self.vad.clone())));
                effects.push(Effect::Status(StatusUpdate::info(STATUS_CHANNEL_OPEN)));
            } else {
                effects.push(Effect::SetTrackEnabled(false));
                effects.push(Effect::Status(StatusUpdate::info(STATUS_MUTED)));
            }
        } else if now.saturating_duration_since(press.started) < self.hold_threshold {
            effects.extend(self.toggle());
        }
        // A release at or past the threshold whose timer has not fired yet is dropped

        effects
    }

    fn toggle(&mut self) -> Vec<Effect> {
        self.channel_open = !self.channel_open;
        if self.channel_open {
            vec![
                Effect::SetTrackEnabled(true),
                Effect::Send(ClientEvent::InputAudioBufferClear),
                Effect::Send(ClientEvent::enable_vad(self.vad.clone())),
                Effect::Status(StatusUpdate::info(STATUS_CHANNEL_OPEN)),
            ]
        } else {
            vec![
                Effect::SetTrackEnabled(false),
                Effect::Send(ClientEvent::disable_vad()),
                Effect::Status(StatusUpdate::info(STATUS_MUTED)),
            ]
        }
    }

    /// Connection setup started.
    pub fn connecting(&mut self) {
        self.link = Link::Connecting;
        self.reset_gesture();
    }

    /// Connection established; audio starts muted.
    pub fn connected(&mut self) -> Vec<Effect> {
        self.link = Link::Up;
        self.reset_gesture();
        vec![Effect::SetTrackEnabled(false)]
    }

    /// Connection torn down, either cleanly or after a failure.
    pub fn disconnected(&mut self, failed: bool) -> Vec<Effect> {
        self.link = if failed { Link::Failed } else { Link::Down };
        self.reset_gesture();
        vec![Effect::CancelHoldTimer]
    }

    fn reset_gesture(&mut self) {
        self.channel_open = false;
        self.holding = false;
        self.press = None;
    }
}

// =============================================================================
// Gesture Input
// =============================================================================

/// Where keyboard focus sits when a key event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusTarget {
    /// Anything that does not consume typed text
    #[default]
    Document,
    /// input, textarea or contenteditable element
    TextEntry,
}

/// Raw gesture input from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    PointerDown,
    PointerUp,
    KeyDown {
        code: String,
        repeat: bool,
        focus: FocusTarget,
    },
    KeyUp {
        code: String,
        focus: FocusTarget,
    },
}

/// Press edge a gesture maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressEdge {
    Down,
    Up,
}

impl Gesture {
    /// Map to a press edge, or `None` when the gesture must pass through
    /// untouched (other keys, key repeat, typing into a text field).
    pub fn edge(&self) -> Option<PressEdge> {
        match self {
            Gesture::PointerDown => Some(PressEdge::Down),
            Gesture::PointerUp => Some(PressEdge::Up),
            Gesture::KeyDown {
                code,
                repeat,
                focus,
            } => (code == "Space" && !repeat && *focus != FocusTarget::TextEntry)
                .then_some(PressEdge::Down),
            Gesture::KeyUp { code, focus } => {
                (code == "Space" && *focus != FocusTarget::TextEntry).then_some(PressEdge::Up)
            }
        }
    }
}
