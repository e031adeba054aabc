//! Recording engine
//!
//! [`SimulatedEngine`] stands in for the native engine in tests and in the
//! `softphone-sim` binary. It records every command it receives and queues
//! injected [`EngineEvent`]s until the next `iterate()`, which is when a real
//! engine would run its callbacks. Clones share state, so the test keeps one
//! clone as a controller while the proxy owns another.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{EngineEvent, EngineEventSink, EngineFactory, TelephonyEngine};
use crate::config::EngineConfig;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::session::{CallId, DeclineReason};

/// One recorded engine command (iterate is only counted)
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Start,
    Stop,
    AcceptCall(CallId),
    DeclineCall(CallId, DeclineReason),
    TerminateCall(CallId),
    TerminateAll,
    DeferCallUpdate(CallId),
    AcceptCallUpdate { call_id: CallId, with_video: bool },
    RefreshRegisters,
    SetContactParameters { account_id: String, params: Option<String> },
    SetNetworkReachable(bool),
    SetDeviceRotation(i32),
    EnterBackground,
    EnterForeground,
    AddListener,
    RemoveListeners,
}

#[derive(Debug, Default)]
struct SimulatedState {
    calls: Vec<EngineCall>,
    pending: VecDeque<EngineEvent>,
    listeners: Vec<EngineEventSink>,
    iterations: u64,
    in_conference: bool,
    fail_next_start: bool,
    panic_next_iterate: bool,
}

/// Recording engine; clones share state
#[derive(Debug, Clone, Default)]
pub struct SimulatedEngine {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event, delivered to listeners on the next iterate
    pub fn inject(&self, event: EngineEvent) {
        self.state.lock().pending.push_back(event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of completed iterate cycles
    pub fn iterations(&self) -> u64 {
        self.state.lock().iterations
    }

    pub fn set_in_conference(&self, in_conference: bool) {
        self.state.lock().in_conference = in_conference;
    }

    pub fn has_listeners(&self) -> bool {
        !self.state.lock().listeners.is_empty()
    }

    /// Make the next `start()` fail with an engine error
    pub fn fail_next_start(&self) {
        self.state.lock().fail_next_start = true;
    }

    /// Make the next `iterate()` panic, as a faulty native callback would
    pub fn panic_next_iterate(&self) {
        self.state.lock().panic_next_iterate = true;
    }

    fn record(&self, call: EngineCall) -> SoftphoneResult<()> {
        trace!(?call, "Simulated engine command");
        self.state.lock().calls.push(call);
        Ok(())
    }
}

impl TelephonyEngine for SimulatedEngine {
    fn start(&mut self) -> SoftphoneResult<()> {
        if std::mem::take(&mut self.state.lock().fail_next_start) {
            return Err(SoftphoneError::engine("simulated start failure"));
        }
        self.record(EngineCall::Start)
    }

    fn stop(&mut self) -> SoftphoneResult<()> {
        self.record(EngineCall::Stop)
    }

    fn iterate(&mut self) -> SoftphoneResult<()> {
        let (events, listeners, fault) = {
            let mut state = self.state.lock();
            let fault = std::mem::take(&mut state.panic_next_iterate);
            if !fault {
                state.iterations += 1;
            }
            let events: Vec<_> = if fault { Vec::new() } else { state.pending.drain(..).collect() };
            (events, state.listeners.clone(), fault)
        };
        if fault {
            panic!("simulated engine fault during iterate");
        }
        for event in events {
            for listener in &listeners {
                let _ = listener.send(event.clone());
            }
        }
        Ok(())
    }

    fn accept_call(&mut self, call_id: &str) -> SoftphoneResult<()> {
        self.record(EngineCall::AcceptCall(call_id.to_string()))
    }

    fn decline_call(&mut self, call_id: &str, reason: DeclineReason) -> SoftphoneResult<()> {
        self.record(EngineCall::DeclineCall(call_id.to_string(), reason))
    }

    fn terminate_call(&mut self, call_id: &str) -> SoftphoneResult<()> {
        self.record(EngineCall::TerminateCall(call_id.to_string()))
    }

    fn terminate_all(&mut self) -> SoftphoneResult<()> {
        self.record(EngineCall::TerminateAll)
    }

    fn defer_call_update(&mut self, call_id: &str) -> SoftphoneResult<()> {
        self.record(EngineCall::DeferCallUpdate(call_id.to_string()))
    }

    fn accept_call_update(&mut self, call_id: &str, with_video: bool) -> SoftphoneResult<()> {
        self.record(EngineCall::AcceptCallUpdate {
            call_id: call_id.to_string(),
            with_video,
        })
    }

    fn refresh_registers(&mut self) -> SoftphoneResult<()> {
        self.record(EngineCall::RefreshRegisters)
    }

    fn set_contact_parameters(&mut self, account_id: &str, params: Option<&str>) -> SoftphoneResult<()> {
        self.record(EngineCall::SetContactParameters {
            account_id: account_id.to_string(),
            params: params.map(str::to_string),
        })
    }

    fn set_network_reachable(&mut self, reachable: bool) -> SoftphoneResult<()> {
        self.record(EngineCall::SetNetworkReachable(reachable))
    }

    fn set_device_rotation(&mut self, degrees: i32) -> SoftphoneResult<()> {
        self.record(EngineCall::SetDeviceRotation(degrees))
    }

    fn enter_background(&mut self) -> SoftphoneResult<()> {
        self.record(EngineCall::EnterBackground)
    }

    fn enter_foreground(&mut self) -> SoftphoneResult<()> {
        self.record(EngineCall::EnterForeground)
    }

    fn is_in_conference(&self) -> bool {
        self.state.lock().in_conference
    }

    fn add_listener(&mut self, sink: EngineEventSink) {
        let mut state = self.state.lock();
        state.listeners.push(sink);
        state.calls.push(EngineCall::AddListener);
    }

    fn remove_listeners(&mut self) {
        let mut state = self.state.lock();
        state.listeners.clear();
        state.calls.push(EngineCall::RemoveListeners);
    }
}

/// Factory handing out clones of one [`SimulatedEngine`]
#[derive(Debug, Clone)]
pub struct SimulatedEngineFactory {
    engine: SimulatedEngine,
}

impl SimulatedEngineFactory {
    pub fn new(engine: SimulatedEngine) -> Self {
        Self { engine }
    }
}

impl EngineFactory for SimulatedEngineFactory {
    fn create(&self, _config: &EngineConfig) -> SoftphoneResult<Box<dyn TelephonyEngine>> {
        Ok(Box::new(self.engine.clone()))
    }
}
