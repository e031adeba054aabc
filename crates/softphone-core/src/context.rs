//! Engine execution context
//!
//! [`EngineContext`] is the single owner of the engine proxy and every piece
//! of session-scoped state: the session table, the resource lease, scheduled
//! tasks, registration state and the mirror of presented screens. It runs as
//! one tokio task draining the [`EngineCommand`] queue; engine notifications
//! are drained from their own channel after every iterate. Nothing here is
//! shared: other contexts talk to it only by sending commands, and only
//! [`NavigationIntent`]s leave it towards the presentation side.
//!
//! # Shutdown
//!
//! Shutdown runs in a strict order tracked by [`ShutdownSequence`]:
//!
//! 1. ticker stopped (the [`TickerStopped`] proof arrives with the command)
//! 2. scheduled tasks cancelled
//! 3. resource leases released
//! 4. engine listeners unregistered
//! 5. engine destroyed
//!
//! A step taken out of order asserts in debug builds and is logged and
//! skipped in release builds.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSource, SoftphoneConfig};
use crate::engine::{EngineEvent, EngineProxy, GlobalState, ConfiguringStatus};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{PlatformEvent, UserAction, UserNotice};
use crate::navigation::{route, NavigationEvent, NavigationIntent, PresentedScreens};
use crate::platform::Platform;
use crate::registration::{ReconcilePlan, RegistrationCoordinator};
use crate::resources::ResourceArbiter;
use crate::scheduler::{AutoAnswerScheduler, TaskId};
use crate::session::{CallStateEvent, DeclineReason, Directive, PolicyInputs, SessionStateMachine};
use crate::ticker::{IterateGate, TickerStopped};

/// Message processed on the engine context
#[derive(Debug)]
pub enum EngineCommand {
    /// Run one engine iterate cycle, then drain engine events
    Iterate,
    User(UserAction),
    Platform(PlatformEvent),
    /// A scheduled task's timer elapsed
    TimerFired { task_id: TaskId },
    /// The persistent configuration changed; reload it
    ConfigChanged,
    /// Tear everything down; the ticker has already stopped
    Shutdown {
        ticker: TickerStopped,
        done: oneshot::Sender<ShutdownReport>,
    },
}

/// What shutdown found and released
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cancelled_tasks: usize,
    pub abandoned_sessions: usize,
    pub completed: bool,
}

/// Ordered shutdown stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownStage {
    Running,
    TickerStopped,
    TasksCancelled,
    LeasesReleased,
    ListenersUnregistered,
    Destroyed,
}

impl ShutdownStage {
    fn next(self) -> Option<ShutdownStage> {
        use ShutdownStage::*;
        match self {
            Running => Some(TickerStopped),
            TickerStopped => Some(TasksCancelled),
            TasksCancelled => Some(LeasesReleased),
            LeasesReleased => Some(ListenersUnregistered),
            ListenersUnregistered => Some(Destroyed),
            Destroyed => None,
        }
    }
}

/// Tracks shutdown progress and rejects out-of-order steps
#[derive(Debug)]
pub struct ShutdownSequence {
    stage: ShutdownStage,
}

impl Default for ShutdownSequence {
    fn default() -> Self {
        Self {
            stage: ShutdownStage::Running,
        }
    }
}

impl ShutdownSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> ShutdownStage {
        self.stage
    }

    /// Move to `stage`, which must directly follow the current one
    pub fn advance(&mut self, stage: ShutdownStage) -> SoftphoneResult<()> {
        if self.stage.next() != Some(stage) {
            let err = SoftphoneError::invariant(format!(
                "shutdown step {stage:?} out of order (current {:?})",
                self.stage
            ));
            error!(error = %err, "Shutdown order violated");
            debug_assert!(false, "{err}");
            return Err(err);
        }
        debug!(?stage, "Shutdown step");
        self.stage = stage;
        Ok(())
    }
}

/// Channels and collaborators handed to [`EngineContext::new`]
pub struct ContextParts {
    pub proxy: EngineProxy,
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    pub commands: mpsc::UnboundedReceiver<EngineCommand>,
    /// Sender side of `commands`, used for timer fires
    pub command_sender: mpsc::UnboundedSender<EngineCommand>,
    pub intents: mpsc::UnboundedSender<NavigationIntent>,
    pub gate: IterateGate,
    pub config_source: Arc<dyn ConfigSource>,
    pub config: SoftphoneConfig,
    pub platform: Platform,
}

/// Owner of all engine-side state
pub struct EngineContext {
    proxy: EngineProxy,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    intents: mpsc::UnboundedSender<NavigationIntent>,
    gate: IterateGate,
    config_source: Arc<dyn ConfigSource>,
    config: SoftphoneConfig,
    platform: Platform,
    sessions: SessionStateMachine,
    arbiter: ResourceArbiter,
    auto_answer: AutoAnswerScheduler,
    registration: RegistrationCoordinator,
    presented: PresentedScreens,
    cellular_call_active: bool,
    missed_calls: u32,
    shutdown: ShutdownSequence,
}

impl EngineContext {
    pub fn new(parts: ContextParts) -> Self {
        let registration = RegistrationCoordinator::new(&parts.config);
        Self {
            proxy: parts.proxy,
            engine_events: parts.engine_events,
            commands: parts.commands,
            intents: parts.intents,
            gate: parts.gate,
            config_source: parts.config_source,
            auto_answer: AutoAnswerScheduler::new(parts.command_sender),
            config: parts.config,
            platform: parts.platform,
            sessions: SessionStateMachine::new(),
            arbiter: ResourceArbiter::new(),
            registration,
            presented: PresentedScreens::default(),
            cellular_call_active: false,
            missed_calls: 0,
            shutdown: ShutdownSequence::new(),
        }
    }

    /// Drain commands until shutdown
    pub async fn run(mut self) {
        info!("Engine context running");
        while let Some(command) = self.commands.recv().await {
            match command {
                EngineCommand::Iterate => self.iterate(),
                EngineCommand::User(action) => self.on_user_action(action),
                EngineCommand::Platform(event) => self.on_platform_event(event),
                EngineCommand::TimerFired { task_id } => self.on_timer_fired(task_id),
                EngineCommand::ConfigChanged => self.reload_config(),
                EngineCommand::Shutdown { ticker, done } => {
                    let report = self.shutdown(ticker);
                    let _ = done.send(report);
                    return;
                }
            }
        }
        warn!("Command queue closed without shutdown");
    }

    fn iterate(&mut self) {
        let proxy = &mut self.proxy;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| proxy.iterate()));
        self.gate.release();

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Engine iterate failed"),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %message, "Engine iterate panicked, continuing on next tick");
            }
        }

        while let Ok(event) = self.engine_events.try_recv() {
            self.on_engine_event(event);
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::GlobalStateChanged { state, message } => {
                debug!(?state, ?message, "Global state changed");
                if state == GlobalState::On {
                    if let Some(status) = self.registration.on_engine_started() {
                        self.platform.notifier.display_service_status(status);
                    }
                }
            }
            EngineEvent::RegistrationStateChanged { account_id, phase, error } => {
                debug!(account_id = %account_id, ?phase, ?error, "Registration state changed");
                let outcome = self.registration.on_registration_state(&account_id, phase, error);
                if let Some(notice) = outcome.notice {
                    self.platform.notifier.display_notice(&notice);
                }
                if let Some(status) = outcome.status {
                    self.platform.notifier.display_service_status(status);
                }
            }
            EngineEvent::CallStateChanged(event) => self.on_call_state(event),
            EngineEvent::ConfiguringStatusChanged { status, message } => {
                info!(?status, ?message, "Remote provisioning finished");
                if status == ConfiguringStatus::Successful {
                    self.registration.mark_all_provisioned();
                }
            }
        }
    }

    fn policy(&mut self) -> PolicyInputs {
        PolicyInputs {
            cellular_call_active: self.cellular_call_active,
            auto_answer_delay: self.config.auto_answer_delay(),
            auto_accept_video: self.config.auto_accept_video,
            in_conference: self.proxy.is_in_conference().unwrap_or(false),
            ring_during_early_media: self.config.ring_during_early_media,
        }
    }

    fn on_call_state(&mut self, event: CallStateEvent) {
        let policy = self.policy();
        match self.sessions.apply(&event, &policy) {
            Ok(directives) => {
                for directive in directives {
                    self.execute(directive);
                }
            }
            Err(e) => warn!(call_id = %event.call_id, phase = %event.phase, error = %e, "Call state event dropped"),
        }
    }

    fn execute(&mut self, directive: Directive) {
        match directive {
            Directive::DeclineCall { call_id, reason } => {
                let result = self.proxy.decline_call(&call_id, reason);
                log_command("decline_call", result);
            }
            Directive::ScheduleAutoAnswer { call_id, delay } => {
                if let Err(e) = self.auto_answer.schedule(&call_id, delay) {
                    debug!(call_id = %call_id, error = %e, "Auto-answer not scheduled");
                }
            }
            Directive::CancelAutoAnswer { call_id } => {
                self.auto_answer.cancel(&call_id);
            }
            Directive::DeferCallUpdate { call_id } => {
                let result = self.proxy.defer_call_update(&call_id);
                log_command("defer_call_update", result);
            }
            Directive::StartRinging { call_id } => self.platform.audio.start_ringing(&call_id),
            Directive::StopRinging => self.platform.audio.stop_ringing(),
            Directive::ActiveSessionsChanged { count } => self.arbiter.sync(count, &mut self.platform),
            Directive::ReleaseCallResources => {
                self.arbiter.release_all(&mut self.platform);
                self.platform.audio.stop_ringing();
                self.platform.audio.route_to_receiver();
            }
            Directive::Navigate(event) => self.navigate(event),
            Directive::NotifyIncomingCall { call_id } => self.platform.notifier.display_incoming_call(&call_id),
            Directive::NotifyMissedCall { call_id } => {
                self.missed_calls += 1;
                self.platform.notifier.display_missed_call(&call_id, self.missed_calls);
            }
            Directive::NotifyVideoUpdateRequested { call_id } => {
                self.platform
                    .notifier
                    .display_notice(&UserNotice::VideoUpdateRequested { call_id });
            }
        }
    }

    fn navigate(&mut self, event: NavigationEvent) {
        let Some(intent) = route(&self.presented, &event, self.config.layout_mode) else {
            debug!(?event, "Navigation suppressed");
            return;
        };
        self.presented.apply(&intent);
        debug!(screen = %intent.target_screen, slot = ?intent.layout_slot, "Navigation intent");
        if self.intents.send(intent).is_err() {
            debug!("Presentation side gone, intent dropped");
        }
    }

    fn on_user_action(&mut self, action: UserAction) {
        debug!(action = action.name(), "User action");
        match action {
            UserAction::Accept { call_id } => {
                self.auto_answer.cancel(&call_id);
                let result = self.proxy.accept_call(&call_id);
                log_command("accept_call", result);
            }
            UserAction::Decline { call_id } => {
                self.auto_answer.cancel(&call_id);
                if let Err(e) = self.sessions.mark_declined_locally(&call_id) {
                    warn!(error = %e, "Decline for untracked call");
                }
                let result = self.proxy.decline_call(&call_id, DeclineReason::Declined);
                log_command("decline_call", result);
            }
            UserAction::HangUp { call_id } => {
                self.auto_answer.cancel(&call_id);
                let result = self.proxy.terminate_call(&call_id);
                log_command("terminate_call", result);
            }
            UserAction::HangUpAll => {
                self.auto_answer.cancel_all();
                let result = self.proxy.terminate_all();
                log_command("terminate_all", result);
            }
            UserAction::VideoUpdateDecision { call_id, accept_video } => {
                match self.sessions.resolve_deferred_update(&call_id) {
                    Ok(true) => {
                        let result = self.proxy.accept_call_update(&call_id, accept_video);
                        log_command("accept_call_update", result);
                    }
                    Ok(false) => debug!(call_id = %call_id, "No deferred update pending"),
                    Err(e) => warn!(error = %e, "Video decision for untracked call"),
                }
            }
            UserAction::SelectMenu { screen } => self.navigate(NavigationEvent::MenuSelected(screen)),
            UserAction::Back => self.navigate(NavigationEvent::Back),
            UserAction::ResetMissedCalls => self.missed_calls = 0,
            UserAction::AccountProvisioned { account_id } => self.registration.mark_provisioned(&account_id),
            UserAction::AppForegrounded => log_command("enter_foreground", self.proxy.enter_foreground()),
            UserAction::AppBackgrounded => log_command("enter_background", self.proxy.enter_background()),
        }
    }

    fn on_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::ProximitySample { distance_cm, timestamp } => {
                self.arbiter.on_proximity_sample(distance_cm, timestamp, &mut self.platform);
            }
            PlatformEvent::CellularCallStateChanged { active } => {
                info!(active, "Cellular call state changed");
                self.cellular_call_active = active;
            }
            PlatformEvent::NetworkReachable { reachable } => {
                log_command("set_network_reachable", self.proxy.set_network_reachable(reachable));
            }
            PlatformEvent::Rotation { degrees } => {
                log_command("set_device_rotation", self.proxy.set_device_rotation(degrees));
            }
            PlatformEvent::PushTokenRefreshed { token } => {
                let plan = self.registration.on_push_token(token);
                self.apply_plan(plan);
            }
        }
    }

    fn apply_plan(&mut self, plan: ReconcilePlan) {
        for update in plan.updates {
            let result = self
                .proxy
                .set_contact_parameters(&update.account_id, update.params.as_deref());
            log_command("set_contact_parameters", result);
        }
        if plan.refresh {
            log_command("refresh_registers", self.proxy.refresh_registers());
        }
    }

    fn on_timer_fired(&mut self, task_id: TaskId) {
        match self.auto_answer.on_fired(task_id, &self.sessions) {
            None => debug!(task_id, "Stale timer fire ignored"),
            Some(Ok(call_id)) => {
                info!(call_id = %call_id, "Auto-answering call");
                let result = self.proxy.accept_call(&call_id);
                log_command("accept_call", result);
                self.platform.audio.route_to_receiver();
            }
            Some(Err(e)) => debug!(error = %e, "Auto-answer skipped"),
        }
    }

    fn reload_config(&mut self) {
        match self.config_source.load() {
            Ok(config) => {
                info!("Configuration reloaded");
                let plan = self.registration.reconfigure(&config);
                self.config = config;
                self.apply_plan(plan);
            }
            Err(e) => warn!(error = %e, "Configuration reload failed, keeping previous values"),
        }
    }

    fn shutdown(&mut self, ticker: TickerStopped) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        if self.shutdown.advance(ShutdownStage::TickerStopped).is_err() {
            return report;
        }

        report.cancelled_tasks = self.auto_answer.cancel_all();
        if self.shutdown.advance(ShutdownStage::TasksCancelled).is_err() {
            return report;
        }

        self.arbiter.release_all(&mut self.platform);
        self.platform.audio.stop_ringing();
        if self.shutdown.advance(ShutdownStage::LeasesReleased).is_err() {
            return report;
        }

        log_command("remove_listeners", self.proxy.remove_listeners());
        if self.shutdown.advance(ShutdownStage::ListenersUnregistered).is_err() {
            return report;
        }

        self.proxy.destroy(&ticker);
        if self.shutdown.advance(ShutdownStage::Destroyed).is_err() {
            return report;
        }

        report.abandoned_sessions = self.sessions.abandon_all();
        report.completed = true;
        info!(
            cancelled_tasks = report.cancelled_tasks,
            abandoned_sessions = report.abandoned_sessions,
            "Engine context shut down"
        );
        report
    }
}

fn log_command(command: &'static str, result: SoftphoneResult<()>) {
    match result {
        Ok(()) => {}
        Err(e @ SoftphoneError::EngineDestroyed { .. }) => warn!(command, error = %e, "Command dropped"),
        Err(e) => warn!(command, error = %e, "Engine command failed"),
    }
}
