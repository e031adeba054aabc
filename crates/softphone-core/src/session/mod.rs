//! Call sessions and their phase lattice
//!
//! A session is created when the engine first reports `IncomingReceived` or
//! `OutgoingInit` for a call id, and destroyed when it reaches `Released`.
//! [`SessionStateMachine`] owns the table of live sessions and turns engine
//! call-state events into [`Directive`]s for the other components.

pub mod machine;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SoftphoneError;
use crate::navigation::NavigationEvent;

pub use machine::{CallStateEvent, PolicyInputs, SessionStateMachine};

/// Call identifier as reported by the engine
pub type CallId = String;

/// Signaling phase of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPhase {
    Idle,
    IncomingReceived,
    IncomingEarlyMedia,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    Connected,
    UpdatedByRemote,
    Ended,
    Error,
    Released,
}

impl CallPhase {
    /// Phases that create a new session for an unknown call id
    pub fn creates_session(self) -> bool {
        matches!(self, CallPhase::IncomingReceived | CallPhase::OutgoingInit)
    }

    /// Ended, Error and Released
    pub fn is_terminal(self) -> bool {
        matches!(self, CallPhase::Ended | CallPhase::Error | CallPhase::Released)
    }

    /// Incoming call not yet answered
    pub fn is_incoming_ringing(self) -> bool {
        matches!(self, CallPhase::IncomingReceived | CallPhase::IncomingEarlyMedia)
    }

    /// Outgoing call not yet answered
    pub fn is_outgoing_pending(self) -> bool {
        matches!(
            self,
            CallPhase::OutgoingInit | CallPhase::OutgoingProgress | CallPhase::OutgoingRinging
        )
    }

    /// Connected, including a pending remote update
    pub fn is_established(self) -> bool {
        matches!(self, CallPhase::Connected | CallPhase::UpdatedByRemote)
    }

    /// Whether the lattice allows moving from `self` to `next`.
    ///
    /// Transitions only move forward, except the Connected/UpdatedByRemote
    /// loop. Ended and Error are reachable from any live phase, Released from
    /// any phase but itself. Forward skips inside the outgoing chain are
    /// accepted because engines omit `OutgoingRinging` when no provisional
    /// ringing response arrives.
    pub fn can_transition_to(self, next: CallPhase) -> bool {
        use CallPhase::*;
        match next {
            Released => self != Released,
            Ended | Error => !self.is_terminal(),
            _ => match (self, next) {
                (Idle, IncomingReceived) | (Idle, OutgoingInit) => true,
                (IncomingReceived, IncomingEarlyMedia) | (IncomingReceived, Connected) => true,
                (IncomingEarlyMedia, Connected) => true,
                (OutgoingInit, OutgoingProgress) | (OutgoingInit, OutgoingRinging) => true,
                (OutgoingProgress, OutgoingRinging) | (OutgoingProgress, Connected) => true,
                (OutgoingRinging, Connected) => true,
                (Connected, UpdatedByRemote) | (UpdatedByRemote, Connected) => true,
                _ => false,
            },
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPhase::Idle => "Idle",
            CallPhase::IncomingReceived => "IncomingReceived",
            CallPhase::IncomingEarlyMedia => "IncomingEarlyMedia",
            CallPhase::OutgoingInit => "OutgoingInit",
            CallPhase::OutgoingProgress => "OutgoingProgress",
            CallPhase::OutgoingRinging => "OutgoingRinging",
            CallPhase::Connected => "Connected",
            CallPhase::UpdatedByRemote => "UpdatedByRemote",
            CallPhase::Ended => "Ended",
            CallPhase::Error => "Error",
            CallPhase::Released => "Released",
        };
        f.write_str(name)
    }
}

impl FromStr for CallPhase {
    type Err = SoftphoneError;

    /// Parse an engine phase name.
    ///
    /// Matching is case-insensitive and accepts the legacy `Call`-prefixed
    /// spellings (`CallIncomingEarlyMedia`, `CallUpdatedByRemote`, `CallEnd`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let name = normalized.strip_prefix("call").unwrap_or(&normalized);
        let phase = match name {
            "idle" => CallPhase::Idle,
            "incomingreceived" => CallPhase::IncomingReceived,
            "incomingearlymedia" => CallPhase::IncomingEarlyMedia,
            "outgoinginit" => CallPhase::OutgoingInit,
            "outgoingprogress" => CallPhase::OutgoingProgress,
            "outgoingringing" => CallPhase::OutgoingRinging,
            "connected" => CallPhase::Connected,
            "updatedbyremote" => CallPhase::UpdatedByRemote,
            "ended" | "end" => CallPhase::Ended,
            "error" => CallPhase::Error,
            "released" => CallPhase::Released,
            _ => return Err(SoftphoneError::InvalidPhase(s.to_string())),
        };
        Ok(phase)
    }
}

/// Direction of a call relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Video flags carried by a call-state event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFlags {
    /// Remote party requests or sends video
    #[serde(default)]
    pub remote: bool,
    /// Local video currently enabled
    #[serde(default)]
    pub local: bool,
}

/// Reason passed with `declineCall`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclineReason {
    /// Another (cellular) call occupies the user
    Busy,
    /// The user explicitly refused the call
    Declined,
}

/// Tracked state of one call
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Engine call id, unique among tracked sessions
    pub call_id: CallId,
    /// Current signaling phase
    pub phase: CallPhase,
    /// Incoming or outgoing
    pub direction: CallDirection,
    /// Remote side asked for video in the last event
    pub is_video_requested: bool,
    /// Local video is enabled
    pub is_video_local: bool,
    /// Call this one replaces (attended transfer)
    pub replaces_call_id: Option<CallId>,
    /// Reached Connected at least once
    pub was_connected: bool,
    /// This client declined the call (busy or user refusal)
    pub declined_locally: bool,
    /// A remote update is deferred until the user decides
    pub update_deferred: bool,
    /// When the session was first seen
    pub created_at: DateTime<Utc>,
    /// When the session first reached Connected
    pub connected_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Create a session in `Idle` for a freshly reported call id
    pub fn new(call_id: CallId, direction: CallDirection) -> Self {
        Self {
            call_id,
            phase: CallPhase::Idle,
            direction,
            is_video_requested: false,
            is_video_local: false,
            replaces_call_id: None,
            was_connected: false,
            declined_locally: false,
            update_deferred: false,
            created_at: Utc::now(),
            connected_at: None,
        }
    }

    /// Incoming, never connected and not refused by this client
    pub fn is_missed(&self) -> bool {
        self.direction == CallDirection::Incoming && !self.was_connected && !self.declined_locally
    }
}

/// Action requested by the state machine, executed on the engine context
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Refuse an incoming call
    DeclineCall { call_id: CallId, reason: DeclineReason },
    /// Arm the auto-answer timer for a call
    ScheduleAutoAnswer { call_id: CallId, delay: Duration },
    /// Disarm the auto-answer timer (no-op when none exists)
    CancelAutoAnswer { call_id: CallId },
    /// Hold a remote update until the user decides
    DeferCallUpdate { call_id: CallId },
    /// Start the ringer for an incoming call
    StartRinging { call_id: CallId },
    /// Stop the ringer
    StopRinging,
    /// Number of sessions not in Idle/Released changed
    ActiveSessionsChanged { count: usize },
    /// Last session released; drop every call-scoped resource
    ReleaseCallResources,
    /// Feed the navigation router
    Navigate(NavigationEvent),
    /// Ask the notifier to show an incoming call
    NotifyIncomingCall { call_id: CallId },
    /// Ask the notifier to show a missed call
    NotifyMissedCall { call_id: CallId },
    /// Ask the user whether to accept a remote video request
    NotifyVideoUpdateRequested { call_id: CallId },
}
