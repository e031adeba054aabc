//! Device platform collaborators
//!
//! The engine context drives the device through four narrow traits. Real
//! frontends implement them over the OS APIs; [`SimulatedPlatform`] records
//! every call for tests and the simulator binary.
//!
//! All trait methods run on the engine context and must not block.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SoftphoneResult;
use crate::events::{ServiceStatus, UserNotice};

/// Proximity sensor listener registration
pub trait ProximitySensor: Send {
    /// Start delivering samples as `PlatformEvent::ProximitySample`
    fn register(&mut self) -> SoftphoneResult<()>;

    /// Stop delivering samples
    fn unregister(&mut self);

    /// Maximum range the sensor reports, in centimeters
    fn max_range_cm(&self) -> f32;
}

/// Screen-off wake lock used while the phone is held to the ear
pub trait WakeLock: Send {
    fn acquire(&mut self);
    fn release(&mut self);
    fn is_held(&self) -> bool;
}

/// Audio output routing and ringer
pub trait AudioRouting: Send {
    /// Route call audio to the private earpiece
    fn route_to_receiver(&mut self);
    fn start_ringing(&mut self, call_id: &str);
    fn stop_ringing(&mut self);
}

/// System notification surface
pub trait NotificationPresenter: Send {
    fn display_incoming_call(&mut self, call_id: &str);
    /// `missed_count` is the number of missed calls since the last reset
    fn display_missed_call(&mut self, call_id: &str, missed_count: u32);
    fn display_notice(&mut self, notice: &UserNotice);
    fn display_service_status(&mut self, status: ServiceStatus);
}

/// Platform collaborators handed to the engine context
pub struct Platform {
    pub proximity: Box<dyn ProximitySensor>,
    pub wake_lock: Box<dyn WakeLock>,
    pub audio: Box<dyn AudioRouting>,
    pub notifier: Box<dyn NotificationPresenter>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

/// One recorded platform interaction
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    SensorRegistered,
    SensorUnregistered,
    WakeLockAcquired,
    WakeLockReleased,
    RoutedToReceiver,
    RingingStarted(String),
    RingingStopped,
    IncomingCallShown(String),
    MissedCallShown { call_id: String, missed_count: u32 },
    Notice(UserNotice),
    Status(ServiceStatus),
}

#[derive(Debug, Default)]
struct PlatformLog {
    calls: Vec<PlatformCall>,
    sensor_registered: bool,
    wake_lock_held: bool,
    ringing: bool,
}

/// Shared view of what the simulated platform was asked to do
#[derive(Debug, Clone, Default)]
pub struct PlatformRecorder {
    log: Arc<Mutex<PlatformLog>>,
}

impl PlatformRecorder {
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.log.lock().calls.clone()
    }

    pub fn sensor_registered(&self) -> bool {
        self.log.lock().sensor_registered
    }

    pub fn wake_lock_held(&self) -> bool {
        self.log.lock().wake_lock_held
    }

    pub fn is_ringing(&self) -> bool {
        self.log.lock().ringing
    }

    pub fn notices(&self) -> Vec<UserNotice> {
        self.log
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Notice(notice) => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &PlatformCall) -> usize {
        self.log.lock().calls.iter().filter(|call| *call == wanted).count()
    }

    fn record(&self, call: PlatformCall) {
        let mut log = self.log.lock();
        match &call {
            PlatformCall::SensorRegistered => log.sensor_registered = true,
            PlatformCall::SensorUnregistered => log.sensor_registered = false,
            PlatformCall::WakeLockAcquired => log.wake_lock_held = true,
            PlatformCall::WakeLockReleased => log.wake_lock_held = false,
            PlatformCall::RingingStarted(_) => log.ringing = true,
            PlatformCall::RingingStopped => log.ringing = false,
            _ => {}
        }
        log.calls.push(call);
    }
}

/// Recording implementation of every platform trait
#[derive(Debug, Clone)]
pub struct SimulatedPlatform {
    recorder: PlatformRecorder,
    max_range_cm: f32,
}

impl SimulatedPlatform {
    /// Sensor with a 5 cm range, like most handsets
    pub fn new() -> Self {
        Self::with_max_range(5.0)
    }

    pub fn with_max_range(max_range_cm: f32) -> Self {
        Self {
            recorder: PlatformRecorder::default(),
            max_range_cm,
        }
    }

    pub fn recorder(&self) -> PlatformRecorder {
        self.recorder.clone()
    }

    /// Box every collaborator for the engine context
    pub fn into_platform(self) -> Platform {
        Platform {
            proximity: Box::new(self.clone()),
            wake_lock: Box::new(self.clone()),
            audio: Box::new(self.clone()),
            notifier: Box::new(self),
        }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximitySensor for SimulatedPlatform {
    fn register(&mut self) -> SoftphoneResult<()> {
        self.recorder.record(PlatformCall::SensorRegistered);
        Ok(())
    }

    fn unregister(&mut self) {
        self.recorder.record(PlatformCall::SensorUnregistered);
    }

    fn max_range_cm(&self) -> f32 {
        self.max_range_cm
    }
}

impl WakeLock for SimulatedPlatform {
    fn acquire(&mut self) {
        self.recorder.record(PlatformCall::WakeLockAcquired);
    }

    fn release(&mut self) {
        self.recorder.record(PlatformCall::WakeLockReleased);
    }

    fn is_held(&self) -> bool {
        self.recorder.wake_lock_held()
    }
}

impl AudioRouting for SimulatedPlatform {
    fn route_to_receiver(&mut self) {
        self.recorder.record(PlatformCall::RoutedToReceiver);
    }

    fn start_ringing(&mut self, call_id: &str) {
        self.recorder.record(PlatformCall::RingingStarted(call_id.to_string()));
    }

    fn stop_ringing(&mut self) {
        self.recorder.record(PlatformCall::RingingStopped);
    }
}

impl NotificationPresenter for SimulatedPlatform {
    fn display_incoming_call(&mut self, call_id: &str) {
        self.recorder.record(PlatformCall::IncomingCallShown(call_id.to_string()));
    }

    fn display_missed_call(&mut self, call_id: &str, missed_count: u32) {
        self.recorder.record(PlatformCall::MissedCallShown {
            call_id: call_id.to_string(),
            missed_count,
        });
    }

    fn display_notice(&mut self, notice: &UserNotice) {
        self.recorder.record(PlatformCall::Notice(notice.clone()));
    }

    fn display_service_status(&mut self, status: ServiceStatus) {
        self.recorder.record(PlatformCall::Status(status));
    }
}
