//! Cancellable scheduled tasks
//!
//! [`TaskScheduler`] keeps at most one live task per key. Each task owns a
//! tokio sleep that posts [`EngineCommand::TimerFired`] onto the engine
//! context queue. A fire is honoured only while its task id is still in the
//! table, so [`TaskScheduler::cancel`] takes effect immediately even when the
//! timer already fired and its message is sitting in the queue.
//!
//! [`AutoAnswerScheduler`] is the delayed-accept policy built on top of it.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::EngineCommand;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::session::{CallId, CallPhase, SessionStateMachine};

/// Identifier of a scheduled task
pub type TaskId = u64;

/// A live scheduled task
#[derive(Debug)]
pub struct ScheduledTask<K> {
    pub task_id: TaskId,
    pub key: K,
    pub fire_at: Instant,
    timer: JoinHandle<()>,
}

/// Keyed table of cancellable timers
#[derive(Debug)]
pub struct TaskScheduler<K> {
    next_id: TaskId,
    tasks: HashMap<TaskId, ScheduledTask<K>>,
    by_key: HashMap<K, TaskId>,
    fired: mpsc::UnboundedSender<EngineCommand>,
}

impl<K> TaskScheduler<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(fired: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self {
            next_id: 1,
            tasks: HashMap::new(),
            by_key: HashMap::new(),
            fired,
        }
    }

    /// Schedule a task for `key`; `None` when one is already live
    pub fn schedule(&mut self, key: K, delay: Duration) -> Option<TaskId> {
        if self.by_key.contains_key(&key) {
            return None;
        }

        let task_id = self.next_id;
        self.next_id += 1;
        let fire_at = Instant::now() + delay;

        let fired = self.fired.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            let _ = fired.send(EngineCommand::TimerFired { task_id });
        });

        self.by_key.insert(key.clone(), task_id);
        self.tasks.insert(
            task_id,
            ScheduledTask {
                task_id,
                key,
                fire_at,
                timer,
            },
        );
        Some(task_id)
    }

    /// Cancel the live task for `key`. Returns `false` when there was none.
    pub fn cancel(&mut self, key: &K) -> bool {
        let Some(task_id) = self.by_key.remove(key) else {
            return false;
        };
        if let Some(task) = self.tasks.remove(&task_id) {
            task.timer.abort();
        }
        true
    }

    /// Claim a fired task. `None` when it was cancelled in the meantime.
    pub fn take_fired(&mut self, task_id: TaskId) -> Option<K> {
        let task = self.tasks.remove(&task_id)?;
        self.by_key.remove(&task.key);
        Some(task.key)
    }

    /// Cancel every live task, returning how many there were
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tasks.len();
        for (_, task) in self.tasks.drain() {
            task.timer.abort();
        }
        self.by_key.clear();
        count
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&ScheduledTask<K>> {
        self.by_key.get(key).and_then(|id| self.tasks.get(id))
    }

    pub fn live_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Delayed accept of incoming calls, at most one per call
#[derive(Debug)]
pub struct AutoAnswerScheduler {
    tasks: TaskScheduler<CallId>,
}

impl AutoAnswerScheduler {
    pub fn new(fired: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self {
            tasks: TaskScheduler::new(fired),
        }
    }

    /// Arm the timer for a call
    pub fn schedule(&mut self, call_id: &str, delay: Duration) -> SoftphoneResult<TaskId> {
        let task_id = self
            .tasks
            .schedule(call_id.to_string(), delay)
            .ok_or_else(|| SoftphoneError::AlreadyScheduled(call_id.to_string()))?;
        info!(call_id, task_id, delay_ms = delay.as_millis() as u64, "Auto-answer scheduled");
        Ok(task_id)
    }

    /// Disarm the timer for a call; safe when none exists
    pub fn cancel(&mut self, call_id: &str) -> bool {
        let cancelled = self.tasks.cancel(&call_id.to_string());
        if cancelled {
            debug!(call_id, "Auto-answer cancelled");
        }
        cancelled
    }

    /// Resolve a fired timer against the live session table.
    ///
    /// Returns `None` for a stale fire (task already cancelled),
    /// `Some(Ok(call_id))` when the call must be accepted now, and
    /// `Some(Err(RaceResolved))` when the call left `IncomingReceived` first.
    pub fn on_fired(&mut self, task_id: TaskId, sessions: &SessionStateMachine) -> Option<SoftphoneResult<CallId>> {
        let call_id = self.tasks.take_fired(task_id)?;
        match sessions.phase(&call_id) {
            Some(CallPhase::IncomingReceived) => Some(Ok(call_id)),
            phase => {
                let phase = phase.map_or_else(|| CallPhase::Released.to_string(), |p| p.to_string());
                Some(Err(SoftphoneError::RaceResolved { call_id, phase }))
            }
        }
    }

    pub fn cancel_all(&mut self) -> usize {
        self.tasks.cancel_all()
    }

    pub fn is_scheduled(&self, call_id: &str) -> bool {
        self.tasks.is_scheduled(&call_id.to_string())
    }

    pub fn live_count(&self) -> usize {
        self.tasks.live_count()
    }
}
