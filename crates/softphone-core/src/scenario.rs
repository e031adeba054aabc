//! Timed scenarios for the simulator
//!
//! A scenario is a JSON list of steps, each fired at an offset from the start
//! of playback. Engine events are injected into a [`SimulatedEngine`] and
//! surface on its next iterate; user actions and platform events go through
//! the [`SoftphoneHandle`] like a real frontend would send them.
//!
//! ```json
//! {
//!   "settle_ms": 200,
//!   "steps": [
//!     { "at_ms": 0, "engine": { "type": "CallStateChanged", "call_id": "c1", "phase": "IncomingReceived" } },
//!     { "at_ms": 500, "user": { "action": "accept", "call_id": "c1" } }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::engine::{EngineEvent, SimulatedEngine};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{PlatformEvent, UserAction};
use crate::runtime::SoftphoneHandle;

/// Longest playback a scenario may describe, settle period included
pub const MAX_SCENARIO_MS: u64 = 24 * 60 * 60 * 1000;

fn default_settle_ms() -> u64 {
    100
}

/// One timed step; exactly one of the payload fields must be set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// Offset from the start of playback
    pub at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformEvent>,
    /// Ask the runtime to reload its configuration
    #[serde(default)]
    pub config_changed: bool,
}

/// Ordered list of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub steps: Vec<ScenarioStep>,
    /// Time left for the runtime to settle after the last step
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Scenario {
    pub fn from_json_str(input: &str) -> SoftphoneResult<Self> {
        let mut scenario: Scenario = serde_json::from_str(input)?;
        for (index, step) in scenario.steps.iter().enumerate() {
            let payloads = usize::from(step.engine.is_some())
                + usize::from(step.user.is_some())
                + usize::from(step.platform.is_some())
                + usize::from(step.config_changed);
            if payloads != 1 {
                return Err(SoftphoneError::config(format!(
                    "Scenario step {index} must carry exactly one payload, found {payloads}"
                )));
            }
        }
        scenario.steps.sort_by_key(|step| step.at_ms);
        let last = scenario.steps.last().map_or(0, |step| step.at_ms);
        if last.saturating_add(scenario.settle_ms) > MAX_SCENARIO_MS {
            return Err(SoftphoneError::config(format!(
                "Scenario runs past {MAX_SCENARIO_MS} ms (last step at {last} ms, settle {} ms)",
                scenario.settle_ms
            )));
        }
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> SoftphoneResult<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json_str(&input)
    }

    /// Total playback time including the settle period
    pub fn duration(&self) -> Duration {
        let last = self.steps.last().map_or(0, |step| step.at_ms);
        Duration::from_millis(last.saturating_add(self.settle_ms))
    }

    /// Fire every step at its offset, then wait for the settle period
    pub async fn play(&self, handle: &SoftphoneHandle, engine: &SimulatedEngine) -> SoftphoneResult<()> {
        let start = Instant::now();
        let deadline = |offset: Duration| {
            start
                .checked_add(offset)
                .ok_or_else(|| SoftphoneError::config(format!("Scenario offset {offset:?} is out of range")))
        };
        for (index, step) in self.steps.iter().enumerate() {
            tokio::time::sleep_until(deadline(Duration::from_millis(step.at_ms))?).await;
            debug!(index, at_ms = step.at_ms, "Scenario step");

            if let Some(event) = &step.engine {
                engine.inject(event.clone());
            } else if let Some(action) = &step.user {
                handle.user_action(action.clone())?;
            } else if let Some(event) = &step.platform {
                handle.platform_event(event.clone())?;
            } else if step.config_changed {
                handle.config_changed()?;
            }
        }
        tokio::time::sleep_until(deadline(self.duration())?).await;
        Ok(())
    }
}
