//! # RVOIP Softphone Core
//!
//! Session coordination for a softphone built on a native telephony engine.
//! This crate does not do signaling or media. It consumes the engine's
//! asynchronous notifications and decides which screen to present, which
//! hardware resources to hold, which delayed actions to schedule and how to
//! recover from partial failures.
//!
//! ## Architecture
//!
//! ```text
//!   presentation context                      engine context (one tokio task)
//!  ┌──────────────────────┐  EngineCommand   ┌──────────────────────────────────┐
//!  │ SoftphoneHandle      │ ───────────────▶ │ EngineContext                    │
//!  │  user actions        │                  │  ├─ EngineProxy ── engine         │
//!  │  platform events     │                  │  ├─ SessionStateMachine           │
//!  │                      │ NavigationIntent │  ├─ ResourceArbiter               │
//!  │ intent receiver      │ ◀─────────────── │  ├─ AutoAnswerScheduler           │
//!  └──────────────────────┘                  │  ├─ RegistrationCoordinator       │
//!            ▲                               │  └─ navigation::route             │
//!            │ Iterate every 20 ms           └──────────────────────────────────┘
//!        Ticker ──────────────────────────────────────────▲
//! ```
//!
//! Every component is owned by the engine context; cross-context traffic is
//! message passing only. Shutdown is ordered: the ticker is stopped first and
//! its [`ticker::TickerStopped`] proof is required to destroy the engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_softphone_core::prelude::*;
//!
//! # async fn example() -> SoftphoneResult<()> {
//! let engine = SimulatedEngine::new();
//! let (runtime, mut intents) = SoftphoneRuntime::start(
//!     Arc::new(FileConfigSource::new("softphone.toml")),
//!     &SimulatedEngineFactory::new(engine.clone()),
//!     SimulatedPlatform::new().into_platform(),
//!     RuntimeOptions::default(),
//! )?;
//!
//! engine.inject(EngineEvent::CallStateChanged(CallStateEvent::new("c1", "IncomingReceived")));
//! if let Some(intent) = intents.recv().await {
//!     println!("present {:?}", intent.target_screen);
//! }
//!
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod navigation;
pub mod platform;
pub mod registration;
pub mod resources;
pub mod runtime;
pub mod scenario;
pub mod scheduler;
pub mod session;
pub mod ticker;

pub use error::{SoftphoneError, SoftphoneResult};

/// Commonly used types
pub mod prelude {
    pub use crate::config::{ConfigSource, FileConfigSource, SoftphoneConfig, StaticConfigSource};
    pub use crate::engine::{EngineEvent, EngineFactory, SimulatedEngine, SimulatedEngineFactory, TelephonyEngine};
    pub use crate::error::{SoftphoneError, SoftphoneResult};
    pub use crate::events::{PlatformEvent, ServiceStatus, UserAction, UserNotice};
    pub use crate::navigation::{LayoutMode, NavigationIntent, Screen};
    pub use crate::platform::{Platform, SimulatedPlatform};
    pub use crate::runtime::{RuntimeOptions, SoftphoneHandle, SoftphoneRuntime};
    pub use crate::session::{CallId, CallPhase, CallStateEvent};
}
