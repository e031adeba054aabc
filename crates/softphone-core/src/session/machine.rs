//! Session state machine
//!
//! [`SessionStateMachine::apply`] consumes one engine call-state event and
//! returns the [`Directive`]s the engine context must execute. It never talks
//! to the engine or the platform itself, which keeps every policy decision
//! testable without a runtime.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_softphone_core::session::{CallStateEvent, Directive, PolicyInputs, SessionStateMachine};
//! use rvoip_softphone_core::session::DeclineReason;
//!
//! let mut machine = SessionStateMachine::new();
//! let policy = PolicyInputs { cellular_call_active: true, ..Default::default() };
//!
//! let directives = machine
//!     .apply(&CallStateEvent::new("c1", "IncomingReceived"), &policy)
//!     .unwrap();
//! assert!(directives.contains(&Directive::DeclineCall {
//!     call_id: "c1".into(),
//!     reason: DeclineReason::Busy,
//! }));
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CallDirection, CallId, CallPhase, DeclineReason, Directive, SessionState, VideoFlags};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::navigation::NavigationEvent;

/// Call-state notification as delivered by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStateEvent {
    /// Engine call id
    pub call_id: CallId,
    /// Raw phase name, parsed by the state machine
    pub phase: String,
    /// Video flags at the time of the event
    #[serde(default)]
    pub video: VideoFlags,
    /// Call replaced by this one (attended transfer)
    #[serde(default)]
    pub replaces_call_id: Option<CallId>,
    /// The engine reports this call as its current call
    #[serde(default)]
    pub is_current_call: bool,
    /// Optional engine message
    #[serde(default)]
    pub message: Option<String>,
}

impl CallStateEvent {
    /// Event without video flags or replacement
    pub fn new(call_id: impl Into<CallId>, phase: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            phase: phase.into(),
            video: VideoFlags::default(),
            replaces_call_id: None,
            is_current_call: false,
            message: None,
        }
    }

    /// Set the video flags
    pub fn with_video(mut self, remote: bool, local: bool) -> Self {
        self.video = VideoFlags { remote, local };
        self
    }

    /// Mark the event as replacing another call
    pub fn replacing(mut self, call_id: impl Into<CallId>) -> Self {
        self.replaces_call_id = Some(call_id.into());
        self
    }

    /// Mark the call as the engine's current call
    pub fn as_current(mut self) -> Self {
        self.is_current_call = true;
        self
    }
}

/// Configuration and platform state read by the transition policy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyInputs {
    /// A cellular call currently occupies the user
    pub cellular_call_active: bool,
    /// Auto-answer delay, `None` when auto-answer is disabled
    pub auto_answer_delay: Option<Duration>,
    /// Accept remote video requests without asking
    pub auto_accept_video: bool,
    /// The engine reports an active conference
    pub in_conference: bool,
    /// Keep the ringer running during incoming early media
    pub ring_during_early_media: bool,
}

impl PolicyInputs {
    fn keeps_ringing(&self, phase: CallPhase) -> bool {
        phase == CallPhase::IncomingReceived
            || (phase == CallPhase::IncomingEarlyMedia && self.ring_during_early_media)
    }
}

/// Table of tracked sessions and the ringer owner
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    sessions: HashMap<CallId, SessionState>,
    ringing_call: Option<CallId>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked session for a call id
    pub fn session(&self, call_id: &str) -> Option<&SessionState> {
        self.sessions.get(call_id)
    }

    /// Current phase for a call id
    pub fn phase(&self, call_id: &str) -> Option<CallPhase> {
        self.sessions.get(call_id).map(|s| s.phase)
    }

    /// Number of sessions not in Idle/Released
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.phase != CallPhase::Idle).count()
    }

    /// All tracked sessions, in no particular order
    pub fn sessions(&self) -> impl Iterator<Item = &SessionState> {
        self.sessions.values()
    }

    /// Call currently owning the ringer
    pub fn ringing_call(&self) -> Option<&str> {
        self.ringing_call.as_deref()
    }

    /// Apply one call-state event.
    ///
    /// Errors are recoverable: the event is dropped and the table is left
    /// untouched.
    pub fn apply(&mut self, event: &CallStateEvent, policy: &PolicyInputs) -> SoftphoneResult<Vec<Directive>> {
        let phase: CallPhase = event.phase.parse()?;
        let call_id = &event.call_id;
        let mut directives = Vec::new();

        let previous = match self.sessions.get(call_id) {
            Some(session) => session.phase,
            None if phase.creates_session() => CallPhase::Idle,
            None => return Err(SoftphoneError::unknown_call_id(call_id.clone())),
        };

        if previous == phase {
            debug!(call_id = %call_id, phase = %phase, "Duplicate call state ignored");
            return Ok(directives);
        }
        if !previous.can_transition_to(phase) {
            return Err(SoftphoneError::InvalidTransition {
                call_id: call_id.clone(),
                from: previous.to_string(),
                to: phase.to_string(),
            });
        }

        if previous == CallPhase::Idle {
            let direction = if phase == CallPhase::IncomingReceived {
                CallDirection::Incoming
            } else {
                CallDirection::Outgoing
            };
            let mut session = SessionState::new(call_id.clone(), direction);
            session.replaces_call_id = event.replaces_call_id.clone();
            self.sessions.insert(call_id.clone(), session);
        }

        if let Some(session) = self.sessions.get_mut(call_id) {
            session.phase = phase;
            session.is_video_requested = event.video.remote;
            session.is_video_local = event.video.local;
        }
        if previous == CallPhase::Idle {
            directives.push(Directive::ActiveSessionsChanged { count: self.active_count() });
        }
        debug!(call_id = %call_id, from = %previous, to = %phase, "Call state transition");

        if previous == CallPhase::IncomingReceived {
            directives.push(Directive::CancelAutoAnswer { call_id: call_id.clone() });
        }
        if self.ringing_call.as_deref() == Some(call_id.as_str()) && !policy.keeps_ringing(phase) {
            self.ringing_call = None;
            directives.push(Directive::StopRinging);
        }

        match phase {
            CallPhase::IncomingReceived => self.on_incoming(event, policy, &mut directives),
            CallPhase::IncomingEarlyMedia => {
                let eligible = self
                    .sessions
                    .get(call_id)
                    .is_some_and(|s| s.replaces_call_id.is_none() && !s.declined_locally);
                if eligible
                    && policy.ring_during_early_media
                    && self.ringing_call.is_none()
                    && self.active_count() == 1
                {
                    self.ringing_call = Some(call_id.clone());
                    directives.push(Directive::StartRinging { call_id: call_id.clone() });
                }
            }
            CallPhase::OutgoingInit | CallPhase::OutgoingProgress => {
                directives.push(Directive::Navigate(NavigationEvent::SessionOutgoing {
                    call_id: call_id.clone(),
                }));
            }
            CallPhase::Connected => {
                if let Some(session) = self.sessions.get_mut(call_id) {
                    if !session.was_connected {
                        session.was_connected = true;
                        session.connected_at = Some(Utc::now());
                    }
                    session.update_deferred = false;
                }
                directives.push(Directive::Navigate(NavigationEvent::SessionConnected {
                    call_id: call_id.clone(),
                }));
            }
            CallPhase::UpdatedByRemote => {
                let defer = event.video.remote
                    && !event.video.local
                    && !policy.auto_accept_video
                    && !policy.in_conference;
                if defer {
                    if let Some(session) = self.sessions.get_mut(call_id) {
                        session.update_deferred = true;
                    }
                    info!(call_id = %call_id, "Remote video request deferred until user decides");
                    directives.push(Directive::DeferCallUpdate { call_id: call_id.clone() });
                    directives.push(Directive::NotifyVideoUpdateRequested { call_id: call_id.clone() });
                }
            }
            CallPhase::Released => self.on_released(call_id, &mut directives),
            CallPhase::OutgoingRinging | CallPhase::Ended | CallPhase::Error | CallPhase::Idle => {}
        }

        Ok(directives)
    }

    fn on_incoming(&mut self, event: &CallStateEvent, policy: &PolicyInputs, directives: &mut Vec<Directive>) {
        let call_id = &event.call_id;
        if event.replaces_call_id.is_some() && !event.is_current_call {
            info!(call_id = %call_id, "Incoming call replaces an existing one, engine accepts it");
            return;
        }
        if policy.cellular_call_active {
            if let Some(session) = self.sessions.get_mut(call_id) {
                session.declined_locally = true;
            }
            info!(call_id = %call_id, "Cellular call active, declining as busy");
            directives.push(Directive::DeclineCall {
                call_id: call_id.clone(),
                reason: DeclineReason::Busy,
            });
            return;
        }

        directives.push(Directive::NotifyIncomingCall { call_id: call_id.clone() });
        directives.push(Directive::Navigate(NavigationEvent::SessionIncoming {
            call_id: call_id.clone(),
        }));

        if let Some(delay) = policy.auto_answer_delay {
            directives.push(Directive::ScheduleAutoAnswer {
                call_id: call_id.clone(),
                delay,
            });
        } else if self.active_count() == 1 && self.ringing_call.is_none() {
            self.ringing_call = Some(call_id.clone());
            directives.push(Directive::StartRinging { call_id: call_id.clone() });
        }
    }

    fn on_released(&mut self, call_id: &CallId, directives: &mut Vec<Directive>) {
        let Some(session) = self.sessions.remove(call_id) else {
            return;
        };
        if session.is_missed() {
            directives.push(Directive::NotifyMissedCall { call_id: call_id.clone() });
        }

        let remaining = self.active_count();
        directives.push(Directive::ActiveSessionsChanged { count: remaining });

        if remaining == 0 {
            directives.push(Directive::ReleaseCallResources);
            directives.push(Directive::Navigate(NavigationEvent::AllSessionsEnded));
        } else if let Some(next) = self.most_recent_live_session() {
            let call_id = next.call_id.clone();
            let event = if next.phase.is_incoming_ringing() {
                NavigationEvent::SessionIncoming { call_id }
            } else if next.phase.is_outgoing_pending() {
                NavigationEvent::SessionOutgoing { call_id }
            } else {
                NavigationEvent::SessionConnected { call_id }
            };
            directives.push(Directive::Navigate(event));
        }
    }

    /// Most recently created session that has not ended yet
    fn most_recent_live_session(&self) -> Option<&SessionState> {
        self.sessions
            .values()
            .filter(|s| !s.phase.is_terminal())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.call_id.cmp(&a.call_id)))
    }

    /// Record that this client refused the call, so its release is not missed
    pub fn mark_declined_locally(&mut self, call_id: &str) -> SoftphoneResult<()> {
        let session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| SoftphoneError::unknown_call_id(call_id))?;
        session.declined_locally = true;
        Ok(())
    }

    /// Consume a deferred remote update. Returns `false` when none was pending.
    pub fn resolve_deferred_update(&mut self, call_id: &str) -> SoftphoneResult<bool> {
        let session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| SoftphoneError::unknown_call_id(call_id))?;
        Ok(std::mem::replace(&mut session.update_deferred, false))
    }

    /// Forget every session; used only when the process shuts down
    pub fn abandon_all(&mut self) -> usize {
        self.ringing_call = None;
        let count = self.sessions.len();
        self.sessions.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(machine: &mut SessionStateMachine, event: CallStateEvent, policy: &PolicyInputs) -> Vec<Directive> {
        machine.apply(&event, policy).unwrap()
    }

    #[test]
    fn incoming_call_rings_and_navigates() {
        let mut machine = SessionStateMachine::new();
        let directives = apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &PolicyInputs::default());

        assert_eq!(
            directives,
            vec![
                Directive::ActiveSessionsChanged { count: 1 },
                Directive::NotifyIncomingCall { call_id: "c1".into() },
                Directive::Navigate(NavigationEvent::SessionIncoming { call_id: "c1".into() }),
                Directive::StartRinging { call_id: "c1".into() },
            ]
        );
        assert_eq!(machine.ringing_call(), Some("c1"));
        assert_eq!(machine.session("c1").unwrap().direction, CallDirection::Incoming);
    }

    #[test]
    fn busy_wins_over_auto_answer() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs {
            cellular_call_active: true,
            auto_answer_delay: Some(Duration::from_millis(2000)),
            ..Default::default()
        };
        let directives = apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);

        assert!(directives.contains(&Directive::DeclineCall {
            call_id: "c1".into(),
            reason: DeclineReason::Busy
        }));
        assert!(!directives.iter().any(|d| matches!(d, Directive::ScheduleAutoAnswer { .. })));
        assert!(!directives.iter().any(|d| matches!(d, Directive::StartRinging { .. })));
        assert!(machine.session("c1").unwrap().declined_locally);
    }

    #[test]
    fn auto_answer_replaces_ringing_and_cancels_on_connect() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs {
            auto_answer_delay: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let directives = apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        assert!(directives.contains(&Directive::ScheduleAutoAnswer {
            call_id: "c1".into(),
            delay: Duration::from_millis(500)
        }));
        assert!(machine.ringing_call().is_none());

        let directives = apply(&mut machine, CallStateEvent::new("c1", "Connected"), &policy);
        assert!(directives.contains(&Directive::CancelAutoAnswer { call_id: "c1".into() }));
        assert!(machine.session("c1").unwrap().was_connected);
    }

    #[test]
    fn attended_transfer_skips_incoming_policy() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs {
            cellular_call_active: true,
            ..Default::default()
        };
        let directives = apply(
            &mut machine,
            CallStateEvent::new("c2", "IncomingReceived").replacing("c1"),
            &policy,
        );
        assert_eq!(directives, vec![Directive::ActiveSessionsChanged { count: 1 }]);
        assert_eq!(machine.session("c2").unwrap().replaces_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn replacing_call_that_is_current_gets_incoming_policy() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs {
            cellular_call_active: true,
            ..Default::default()
        };
        let directives = apply(
            &mut machine,
            CallStateEvent::new("c2", "IncomingReceived").replacing("c1").as_current(),
            &policy,
        );
        assert!(directives.contains(&Directive::DeclineCall {
            call_id: "c2".into(),
            reason: DeclineReason::Busy,
        }));
        assert!(machine.session("c2").unwrap().declined_locally);

        let mut machine = SessionStateMachine::new();
        let directives = apply(
            &mut machine,
            CallStateEvent::new("c3", "IncomingReceived").replacing("c1").as_current(),
            &PolicyInputs::default(),
        );
        assert!(directives.contains(&Directive::NotifyIncomingCall { call_id: "c3".into() }));
        assert!(directives.contains(&Directive::Navigate(NavigationEvent::SessionIncoming {
            call_id: "c3".into()
        })));
    }

    #[test]
    fn ringer_stops_when_call_leaves_incoming() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);

        let directives = apply(&mut machine, CallStateEvent::new("c1", "IncomingEarlyMedia"), &policy);
        assert!(directives.contains(&Directive::StopRinging));
        assert!(machine.ringing_call().is_none());
    }

    #[test]
    fn early_media_keeps_ringing_when_configured() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs {
            ring_during_early_media: true,
            ..Default::default()
        };
        apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        let directives = apply(&mut machine, CallStateEvent::new("c1", "IncomingEarlyMedia"), &policy);
        assert!(!directives.contains(&Directive::StopRinging));
        assert_eq!(machine.ringing_call(), Some("c1"));
    }

    #[test]
    fn second_incoming_call_does_not_ring() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingInit"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingProgress"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "Connected"), &policy);

        let directives = apply(&mut machine, CallStateEvent::new("c2", "IncomingReceived"), &policy);
        assert!(!directives.iter().any(|d| matches!(d, Directive::StartRinging { .. })));
        assert_eq!(machine.active_count(), 2);
    }

    #[test]
    fn video_update_deferred_only_when_all_conditions_hold() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingInit"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingProgress"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "Connected"), &policy);

        let directives = apply(
            &mut machine,
            CallStateEvent::new("c1", "UpdatedByRemote").with_video(true, false),
            &policy,
        );
        assert!(directives.contains(&Directive::DeferCallUpdate { call_id: "c1".into() }));
        assert!(directives.contains(&Directive::NotifyVideoUpdateRequested { call_id: "c1".into() }));
        assert_eq!(machine.phase("c1"), Some(CallPhase::UpdatedByRemote));
        assert!(machine.resolve_deferred_update("c1").unwrap());
        assert!(!machine.resolve_deferred_update("c1").unwrap());

        apply(&mut machine, CallStateEvent::new("c1", "Connected"), &policy);
        let conference = PolicyInputs {
            in_conference: true,
            ..Default::default()
        };
        let directives = apply(
            &mut machine,
            CallStateEvent::new("c1", "UpdatedByRemote").with_video(true, false),
            &conference,
        );
        assert!(directives.is_empty());
    }

    #[test]
    fn release_of_last_session_frees_resources() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "Ended"), &policy);
        let directives = apply(&mut machine, CallStateEvent::new("c1", "Released"), &policy);

        assert_eq!(
            directives,
            vec![
                Directive::NotifyMissedCall { call_id: "c1".into() },
                Directive::ActiveSessionsChanged { count: 0 },
                Directive::ReleaseCallResources,
                Directive::Navigate(NavigationEvent::AllSessionsEnded),
            ]
        );
        assert!(machine.session("c1").is_none());
    }

    #[test]
    fn release_with_remaining_session_returns_to_call() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingInit"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingProgress"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "Connected"), &policy);
        apply(&mut machine, CallStateEvent::new("c2", "IncomingReceived"), &policy);

        apply(&mut machine, CallStateEvent::new("c1", "Ended"), &policy);
        let directives = apply(&mut machine, CallStateEvent::new("c1", "Released"), &policy);
        assert!(directives.contains(&Directive::ActiveSessionsChanged { count: 1 }));
        assert!(!directives.contains(&Directive::ReleaseCallResources));
        assert!(directives.contains(&Directive::Navigate(NavigationEvent::SessionIncoming {
            call_id: "c2".into()
        })));
    }

    #[test]
    fn release_navigation_follows_remaining_call_phase() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "Connected"), &policy);
        apply(&mut machine, CallStateEvent::new("c2", "OutgoingInit"), &policy);

        let directives = apply(&mut machine, CallStateEvent::new("c1", "Released"), &policy);
        assert!(directives.contains(&Directive::Navigate(NavigationEvent::SessionOutgoing {
            call_id: "c2".into()
        })));

        apply(&mut machine, CallStateEvent::new("c2", "OutgoingProgress"), &policy);
        apply(&mut machine, CallStateEvent::new("c2", "Connected"), &policy);
        apply(&mut machine, CallStateEvent::new("c3", "OutgoingInit"), &policy);
        apply(&mut machine, CallStateEvent::new("c4", "IncomingReceived"), &policy);
        apply(&mut machine, CallStateEvent::new("c4", "Ended"), &policy);

        let directives = apply(&mut machine, CallStateEvent::new("c3", "Released"), &policy);
        assert!(
            directives.contains(&Directive::Navigate(NavigationEvent::SessionConnected {
                call_id: "c2".into()
            })),
            "ended sessions are skipped: {directives:?}"
        );
    }

    #[test]
    fn lone_call_reports_one_active_session() {
        for phase in ["IncomingReceived", "OutgoingInit"] {
            let mut machine = SessionStateMachine::new();
            let directives = apply(&mut machine, CallStateEvent::new("c1", phase), &PolicyInputs::default());
            assert_eq!(directives[0], Directive::ActiveSessionsChanged { count: 1 });
            assert_eq!(machine.active_count(), 1);
        }
    }

    #[test]
    fn locally_declined_call_is_not_missed() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        machine.mark_declined_locally("c1").unwrap();
        let directives = apply(&mut machine, CallStateEvent::new("c1", "Released"), &policy);
        assert!(!directives.iter().any(|d| matches!(d, Directive::NotifyMissedCall { .. })));
    }

    #[test]
    fn unknown_call_and_bad_phase_are_dropped() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();

        let err = machine.apply(&CallStateEvent::new("ghost", "Connected"), &policy).unwrap_err();
        assert_eq!(err, SoftphoneError::UnknownCallId("ghost".into()));

        let err = machine.apply(&CallStateEvent::new("c1", "Pausing"), &policy).unwrap_err();
        assert!(matches!(err, SoftphoneError::InvalidPhase(_)));
        assert_eq!(machine.active_count(), 0);
    }

    #[test]
    fn backwards_transition_rejected() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingInit"), &policy);
        apply(&mut machine, CallStateEvent::new("c1", "OutgoingRinging"), &policy);

        let err = machine.apply(&CallStateEvent::new("c1", "OutgoingProgress"), &policy).unwrap_err();
        assert!(matches!(err, SoftphoneError::InvalidTransition { .. }));
        assert_eq!(machine.phase("c1"), Some(CallPhase::OutgoingRinging));
    }

    #[test]
    fn duplicate_creation_keeps_single_session() {
        let mut machine = SessionStateMachine::new();
        let policy = PolicyInputs::default();
        apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        let directives = apply(&mut machine, CallStateEvent::new("c1", "IncomingReceived"), &policy);
        assert!(directives.is_empty());
        assert_eq!(machine.active_count(), 1);
    }
}
