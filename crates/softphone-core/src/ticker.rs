//! Engine iterate ticker
//!
//! The ticker never calls the engine itself. Every period it posts
//! [`EngineCommand::Iterate`] onto the engine context queue, provided the
//! previous iterate has been consumed; the [`IterateGate`] shared with the
//! context makes `iterate()` single-flight. Missed ticks are delayed rather
//! than replayed in a burst.
//!
//! Stopping is the first step of shutdown. [`Ticker::stop`] consumes the
//! ticker, joins its task and returns the [`TickerStopped`] proof that
//! [`EngineProxy::destroy`](crate::engine::EngineProxy::destroy) requires.
//!
//! # Examples
//!
//! ```rust,no_run
//! # async fn example() {
//! use std::time::Duration;
//! use rvoip_softphone_core::context::EngineCommand;
//! use rvoip_softphone_core::ticker::{IterateGate, Ticker};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<EngineCommand>();
//! let gate = IterateGate::new();
//! let ticker = Ticker::start(Duration::from_millis(20), tx, gate.clone());
//!
//! let _ = rx.recv().await;
//! gate.release();
//!
//! let _proof = ticker.stop().await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::EngineCommand;

/// Proof that the ticker has stopped and its task has been joined.
///
/// Only [`Ticker::stop`] can produce one outside this crate.
#[derive(Debug)]
pub struct TickerStopped {
    _private: (),
}

impl TickerStopped {
    /// Proof for a ticker that was never started (partial init)
    pub(crate) fn not_started() -> Self {
        Self { _private: () }
    }
}

/// Single-flight flag between the ticker and the engine context
#[derive(Debug, Clone, Default)]
pub struct IterateGate {
    in_flight: Arc<AtomicBool>,
}

impl IterateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate; `false` when an iterate is still pending
    pub fn try_claim(&self) -> bool {
        !self.in_flight.swap(true, Ordering::AcqRel)
    }

    /// Called by the engine context after an iterate completes
    pub fn release(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Periodic iterate dispatcher
#[derive(Debug)]
pub struct Ticker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    dispatched: Arc<AtomicU64>,
}

impl Ticker {
    /// Spawn the ticker task on the current tokio runtime
    pub fn start(period: Duration, commands: mpsc::UnboundedSender<EngineCommand>, gate: IterateGate) -> Self {
        let cancel = CancellationToken::new();
        let dispatched = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let dispatched = dispatched.clone();
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            if !gate.try_claim() {
                                continue;
                            }
                            if commands.send(EngineCommand::Iterate).is_err() {
                                gate.release();
                                warn!("Engine context gone, ticker exiting");
                                break;
                            }
                            dispatched.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                debug!("Ticker loop exited");
            }
        });

        info!(period_ms = period.as_millis() as u64, "Ticker started");
        Self {
            cancel,
            task,
            dispatched,
        }
    }

    /// Number of iterate commands posted so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Stop the ticker and wait for its task to finish
    pub async fn stop(self) -> TickerStopped {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Ticker task ended abnormally");
        }
        info!(dispatched = self.dispatched.load(Ordering::Relaxed), "Ticker stopped");
        TickerStopped { _private: () }
    }
}
