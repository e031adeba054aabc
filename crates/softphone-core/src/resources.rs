//! Resource arbiter
//!
//! Holds the proximity-sensor listener and the screen-off wake lock while at
//! least one call is active. The lease follows the active session count, not
//! the identity of any call: the first session registers the sensor, the last
//! one to leave unregisters it and forcibly drops the wake lock.

use tracing::{debug, info, warn};

use crate::platform::Platform;

/// Near/far boundary for proximity samples, in centimeters
pub const NEAR_THRESHOLD_CM: f32 = 4.001;

/// Active-call resource lease
#[derive(Debug, Default)]
pub struct ResourceArbiter {
    lease_count: usize,
    sensor_registered: bool,
    wake_lock_held: bool,
}

impl ResourceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active sessions the lease accounts for
    pub fn lease_count(&self) -> usize {
        self.lease_count
    }

    pub fn is_sensing(&self) -> bool {
        self.sensor_registered
    }

    pub fn wake_lock_held(&self) -> bool {
        self.wake_lock_held
    }

    /// Align the lease with the current active session count
    pub fn sync(&mut self, active_sessions: usize, platform: &mut Platform) {
        let previous = self.lease_count;
        self.lease_count = active_sessions;

        if previous == 0 && active_sessions > 0 {
            match platform.proximity.register() {
                Ok(()) => {
                    self.sensor_registered = true;
                    info!(active_sessions, "Proximity sensing started");
                }
                Err(e) => warn!(error = %e, "Failed to register proximity sensor"),
            }
        } else if previous > 0 && active_sessions == 0 {
            self.release_all(platform);
        } else {
            debug!(previous, active_sessions, "Resource lease count updated");
        }
    }

    /// Apply one proximity reading
    pub fn on_proximity_sample(&mut self, distance_cm: f32, timestamp: u64, platform: &mut Platform) {
        if timestamp == 0 || !self.sensor_registered {
            return;
        }
        let threshold = NEAR_THRESHOLD_CM.min(platform.proximity.max_range_cm());
        let near = distance_cm < threshold;

        if near && !self.wake_lock_held {
            platform.wake_lock.acquire();
            self.wake_lock_held = true;
            debug!(distance_cm, "Proximity near, screen off");
        } else if !near && self.wake_lock_held {
            platform.wake_lock.release();
            self.wake_lock_held = false;
            debug!(distance_cm, "Proximity far, screen on");
        }
    }

    /// Unregister the sensor and drop the wake lock regardless of the count
    pub fn release_all(&mut self, platform: &mut Platform) {
        self.lease_count = 0;
        if self.sensor_registered {
            platform.proximity.unregister();
            self.sensor_registered = false;
            info!("Proximity sensing stopped");
        }
        if self.wake_lock_held || platform.wake_lock.is_held() {
            platform.wake_lock.release();
            self.wake_lock_held = false;
        }
    }
}
