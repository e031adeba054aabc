//! Softphone runtime
//!
//! [`SoftphoneRuntime::start`] loads the configuration, initializes and starts
//! the engine, spawns the [`EngineContext`] and the [`Ticker`], and hands back
//! the receiver of [`NavigationIntent`]s for the presentation side.
//! [`SoftphoneRuntime::shutdown`] stops the ticker first and passes its proof
//! to the context, which completes the ordered teardown.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_softphone_core::config::FileConfigSource;
//! use rvoip_softphone_core::engine::{SimulatedEngine, SimulatedEngineFactory};
//! use rvoip_softphone_core::events::UserAction;
//! use rvoip_softphone_core::platform::SimulatedPlatform;
//! use rvoip_softphone_core::runtime::{RuntimeOptions, SoftphoneRuntime};
//!
//! # async fn example() -> rvoip_softphone_core::SoftphoneResult<()> {
//! let factory = SimulatedEngineFactory::new(SimulatedEngine::new());
//! let (runtime, _intents) = SoftphoneRuntime::start(
//!     Arc::new(FileConfigSource::new("softphone.toml")),
//!     &factory,
//!     SimulatedPlatform::new().into_platform(),
//!     RuntimeOptions::default(),
//! )?;
//!
//! runtime.handle().user_action(UserAction::HangUpAll)?;
//! let report = runtime.shutdown().await?;
//! assert!(report.completed);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ConfigSource;
use crate::context::{ContextParts, EngineCommand, EngineContext, ShutdownReport};
use crate::engine::{EngineFactory, EngineProxy};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{PlatformEvent, UserAction};
use crate::navigation::NavigationIntent;
use crate::platform::Platform;
use crate::ticker::{IterateGate, Ticker, TickerStopped};

/// Startup options
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// The process was started by a push notification
    pub recovered_from_push: bool,
}

/// Cloneable sender into the engine context
#[derive(Debug, Clone)]
pub struct SoftphoneHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl SoftphoneHandle {
    fn send(&self, command: EngineCommand, name: &'static str) -> SoftphoneResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SoftphoneError::EngineDestroyed { command: name })
    }

    pub fn user_action(&self, action: UserAction) -> SoftphoneResult<()> {
        let name = action.name();
        self.send(EngineCommand::User(action), name)
    }

    pub fn platform_event(&self, event: PlatformEvent) -> SoftphoneResult<()> {
        self.send(EngineCommand::Platform(event), "platform_event")
    }

    /// Ask the context to reload the configuration source
    pub fn config_changed(&self) -> SoftphoneResult<()> {
        self.send(EngineCommand::ConfigChanged, "config_changed")
    }
}

/// Running softphone core
#[derive(Debug)]
pub struct SoftphoneRuntime {
    commands: mpsc::UnboundedSender<EngineCommand>,
    ticker: Ticker,
    context: JoinHandle<()>,
}

impl SoftphoneRuntime {
    /// Start everything on the current tokio runtime.
    ///
    /// Fails with a configuration error when the configuration or the engine
    /// files are missing; a partially initialized engine is destroyed first.
    pub fn start(
        source: Arc<dyn ConfigSource>,
        factory: &dyn EngineFactory,
        platform: Platform,
        options: RuntimeOptions,
    ) -> SoftphoneResult<(Self, mpsc::UnboundedReceiver<NavigationIntent>)> {
        let config = source.load()?;
        let mut proxy = EngineProxy::init(&config.engine, factory)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let started = proxy
            .add_listener(event_tx)
            .and_then(|()| proxy.start(options.recovered_from_push));
        if let Err(e) = started {
            error!(error = %e, "Engine failed to start");
            proxy.destroy(&TickerStopped::not_started());
            return Err(e);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let gate = IterateGate::new();
        let period = config.ticker_period();

        let context = EngineContext::new(ContextParts {
            proxy,
            engine_events: event_rx,
            commands: command_rx,
            command_sender: command_tx.clone(),
            intents: intent_tx,
            gate: gate.clone(),
            config_source: source,
            config,
            platform,
        });
        let context = tokio::spawn(context.run());
        let ticker = Ticker::start(period, command_tx.clone(), gate);

        info!("Softphone runtime started");
        Ok((
            Self {
                commands: command_tx,
                ticker,
                context,
            },
            intent_rx,
        ))
    }

    pub fn handle(&self) -> SoftphoneHandle {
        SoftphoneHandle {
            commands: self.commands.clone(),
        }
    }

    /// Stop the ticker, then let the engine context tear down in order
    pub async fn shutdown(self) -> SoftphoneResult<ShutdownReport> {
        let ticker = self.ticker.stop().await;

        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Shutdown { ticker, done: done_tx })
            .map_err(|_| SoftphoneError::invariant("engine context exited before shutdown"))?;

        let report = done_rx
            .await
            .map_err(|_| SoftphoneError::invariant("engine context dropped the shutdown reply"))?;
        if let Err(e) = self.context.await {
            error!(error = %e, "Engine context task failed");
        }
        info!(completed = report.completed, "Softphone runtime stopped");
        Ok(report)
    }
}
