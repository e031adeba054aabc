//! Inbound user and platform events, outbound notices
//!
//! Everything in this module crosses a context boundary as an immutable
//! message: user actions and platform events travel from the presentation
//! side onto the engine context queue, notices and service status travel to
//! the notification presenter.

use serde::{Deserialize, Serialize};

use crate::navigation::Screen;
use crate::registration::AccountId;
use crate::session::CallId;

/// Action raised by the user on the presentation side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    /// Answer an incoming call
    Accept { call_id: CallId },
    /// Refuse an incoming call
    Decline { call_id: CallId },
    /// Terminate one call
    HangUp { call_id: CallId },
    /// Terminate every call
    HangUpAll,
    /// Answer a deferred remote update
    VideoUpdateDecision { call_id: CallId, accept_video: bool },
    /// Open a screen from the menu
    SelectMenu { screen: Screen },
    /// Hardware or toolbar back
    Back,
    /// The user looked at the missed calls
    ResetMissedCalls,
    /// An account was created or edited through the assistant
    AccountProvisioned { account_id: AccountId },
    AppForegrounded,
    AppBackgrounded,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::Accept { .. } => "accept",
            UserAction::Decline { .. } => "decline",
            UserAction::HangUp { .. } => "hang_up",
            UserAction::HangUpAll => "hang_up_all",
            UserAction::VideoUpdateDecision { .. } => "video_update_decision",
            UserAction::SelectMenu { .. } => "select_menu",
            UserAction::Back => "back",
            UserAction::ResetMissedCalls => "reset_missed_calls",
            UserAction::AccountProvisioned { .. } => "account_provisioned",
            UserAction::AppForegrounded => "app_foregrounded",
            UserAction::AppBackgrounded => "app_backgrounded",
        }
    }
}

/// Event raised by the device platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// Proximity sensor reading
    ProximitySample {
        /// Measured distance in centimeters
        distance_cm: f32,
        /// Sensor timestamp; zero means the reading is not valid
        timestamp: u64,
    },
    /// A cellular call started or ended
    CellularCallStateChanged { active: bool },
    /// Network connectivity changed
    NetworkReachable { reachable: bool },
    /// Display rotation in degrees (0, 90, 180, 270)
    Rotation { degrees: i32 },
    /// The push service delivered a new token (`None` when revoked)
    PushTokenRefreshed { token: Option<String> },
}

/// Non-blocking notice shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserNotice {
    /// Credentials rejected for a recently provisioned account
    RegistrationUnauthorized { account_id: AccountId },
    /// Network failure registering a recently provisioned account
    RegistrationNetworkError { account_id: AccountId },
    /// Remote side asks to add video to the call
    VideoUpdateRequested { call_id: CallId },
}

/// Background service status shown in the persistent notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Started,
    Registered,
    RegistrationFailure,
}
