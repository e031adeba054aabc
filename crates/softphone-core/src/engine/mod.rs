//! Native telephony engine surface
//!
//! The engine itself (signaling, media, encryption) lives outside this crate.
//! [`TelephonyEngine`] is the synchronous command surface it exposes, and
//! [`EngineEvent`] the notifications it emits. Events are not delivered
//! through callbacks: the engine pushes them into the [`EngineEventSink`]
//! registered with [`TelephonyEngine::add_listener`], and the engine context
//! drains that channel after every `iterate()`.
//!
//! All methods are called from the engine context only.

pub mod proxy;
pub mod simulated;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::error::SoftphoneResult;
use crate::registration::{AccountId, RegistrationErrorKind, RegistrationPhase};
use crate::session::{CallStateEvent, DeclineReason};

pub use proxy::{EngineHandle, EngineProxy};
pub use simulated::{EngineCall, SimulatedEngine, SimulatedEngineFactory};

/// Channel the engine pushes its notifications into
pub type EngineEventSink = mpsc::UnboundedSender<EngineEvent>;

/// Global engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalState {
    Off,
    Startup,
    On,
    Shutdown,
    Configuring,
}

/// Outcome of remote provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfiguringStatus {
    Successful,
    Failed,
    Skipped,
}

/// Notification emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    GlobalStateChanged {
        state: GlobalState,
        #[serde(default)]
        message: Option<String>,
    },
    RegistrationStateChanged {
        account_id: AccountId,
        phase: RegistrationPhase,
        #[serde(default)]
        error: Option<RegistrationErrorKind>,
    },
    CallStateChanged(CallStateEvent),
    ConfiguringStatusChanged {
        status: ConfiguringStatus,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Command surface of the native engine
pub trait TelephonyEngine: Send {
    fn start(&mut self) -> SoftphoneResult<()>;
    fn stop(&mut self) -> SoftphoneResult<()>;

    /// Run one cycle of the engine's internal event pump
    fn iterate(&mut self) -> SoftphoneResult<()>;

    fn accept_call(&mut self, call_id: &str) -> SoftphoneResult<()>;
    fn decline_call(&mut self, call_id: &str, reason: DeclineReason) -> SoftphoneResult<()>;
    fn terminate_call(&mut self, call_id: &str) -> SoftphoneResult<()>;
    fn terminate_all(&mut self) -> SoftphoneResult<()>;

    /// Hold a remote update unanswered
    fn defer_call_update(&mut self, call_id: &str) -> SoftphoneResult<()>;
    /// Answer a deferred remote update
    fn accept_call_update(&mut self, call_id: &str, with_video: bool) -> SoftphoneResult<()>;

    /// Re-send REGISTER for every account
    fn refresh_registers(&mut self) -> SoftphoneResult<()>;
    /// Set (or clear with `None`) the contact URI parameters of an account
    fn set_contact_parameters(&mut self, account_id: &str, params: Option<&str>) -> SoftphoneResult<()>;

    fn set_network_reachable(&mut self, reachable: bool) -> SoftphoneResult<()>;
    fn set_device_rotation(&mut self, degrees: i32) -> SoftphoneResult<()>;
    fn enter_background(&mut self) -> SoftphoneResult<()>;
    fn enter_foreground(&mut self) -> SoftphoneResult<()>;
    fn is_in_conference(&self) -> bool;

    fn add_listener(&mut self, sink: EngineEventSink);
    fn remove_listeners(&mut self);
}

/// Creates engine instances from configuration
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> SoftphoneResult<Box<dyn TelephonyEngine>>;
}
