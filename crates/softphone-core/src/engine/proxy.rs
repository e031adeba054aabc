//! Engine proxy
//!
//! [`EngineProxy`] owns the one [`EngineHandle`] of the process. Commands are
//! forwarded 1:1; the proxy only adds the destroyed-handle guard, so a command
//! issued after [`EngineProxy::destroy`] fails fast with
//! [`SoftphoneError::EngineDestroyed`] instead of reaching a dead engine.

use std::fs::File;
use std::path::Path;

use tracing::{debug, error, info, warn};

use super::{EngineEventSink, EngineFactory, TelephonyEngine};
use crate::config::EngineConfig;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::session::DeclineReason;
use crate::ticker::TickerStopped;

/// Exclusive handle to a live engine
pub struct EngineHandle {
    engine: Box<dyn TelephonyEngine>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// Guarded access to the engine
#[derive(Debug)]
pub struct EngineProxy {
    /// `None` once destroyed
    handle: Option<EngineHandle>,
    started: bool,
}

fn check_readable(path: &Path, what: &str) -> SoftphoneResult<()> {
    File::open(path)
        .map(|_| ())
        .map_err(|e| SoftphoneError::config(format!("{what} {} is not readable: {e}", path.display())))
}

impl EngineProxy {
    /// Validate the engine configuration and create the engine
    pub fn init(config: &EngineConfig, factory: &dyn EngineFactory) -> SoftphoneResult<Self> {
        let config_path = config
            .config_path
            .as_deref()
            .ok_or_else(|| SoftphoneError::config("engine.config_path is required"))?;
        check_readable(config_path, "engine config")?;
        if let Some(factory_path) = config.factory_config_path.as_deref() {
            check_readable(factory_path, "factory config")?;
        }

        let engine = factory.create(config)?;
        info!(config_path = %config_path.display(), "Engine created");
        Ok(Self {
            handle: Some(EngineHandle { engine }),
            started: false,
        })
    }

    fn engine(&mut self, command: &'static str) -> SoftphoneResult<&mut dyn TelephonyEngine> {
        match self.handle.as_mut() {
            Some(handle) => Ok(handle.engine.as_mut()),
            None => Err(SoftphoneError::EngineDestroyed { command }),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Start the engine. After a push wake-up the engine first enters
    /// background mode so nothing is presented before the payload is parsed.
    pub fn start(&mut self, recovered_from_push: bool) -> SoftphoneResult<()> {
        let engine = self.engine("start")?;
        if recovered_from_push {
            debug!("Recovered from push, entering background before start");
            engine.enter_background()?;
        }
        engine.start()?;
        self.started = true;
        info!(recovered_from_push, "Engine started");
        Ok(())
    }

    pub fn stop(&mut self) -> SoftphoneResult<()> {
        self.engine("stop")?.stop()?;
        self.started = false;
        Ok(())
    }

    pub fn iterate(&mut self) -> SoftphoneResult<()> {
        self.engine("iterate")?.iterate()
    }

    pub fn accept_call(&mut self, call_id: &str) -> SoftphoneResult<()> {
        self.engine("accept_call")?.accept_call(call_id)
    }

    pub fn decline_call(&mut self, call_id: &str, reason: DeclineReason) -> SoftphoneResult<()> {
        self.engine("decline_call")?.decline_call(call_id, reason)
    }

    pub fn terminate_call(&mut self, call_id: &str) -> SoftphoneResult<()> {
        self.engine("terminate_call")?.terminate_call(call_id)
    }

    pub fn terminate_all(&mut self) -> SoftphoneResult<()> {
        self.engine("terminate_all")?.terminate_all()
    }

    pub fn defer_call_update(&mut self, call_id: &str) -> SoftphoneResult<()> {
        self.engine("defer_call_update")?.defer_call_update(call_id)
    }

    pub fn accept_call_update(&mut self, call_id: &str, with_video: bool) -> SoftphoneResult<()> {
        self.engine("accept_call_update")?.accept_call_update(call_id, with_video)
    }

    pub fn refresh_registers(&mut self) -> SoftphoneResult<()> {
        self.engine("refresh_registers")?.refresh_registers()
    }

    pub fn set_contact_parameters(&mut self, account_id: &str, params: Option<&str>) -> SoftphoneResult<()> {
        self.engine("set_contact_parameters")?.set_contact_parameters(account_id, params)
    }

    pub fn set_network_reachable(&mut self, reachable: bool) -> SoftphoneResult<()> {
        self.engine("set_network_reachable")?.set_network_reachable(reachable)
    }

    pub fn set_device_rotation(&mut self, degrees: i32) -> SoftphoneResult<()> {
        self.engine("set_device_rotation")?.set_device_rotation(degrees)
    }

    pub fn enter_background(&mut self) -> SoftphoneResult<()> {
        self.engine("enter_background")?.enter_background()
    }

    pub fn enter_foreground(&mut self) -> SoftphoneResult<()> {
        self.engine("enter_foreground")?.enter_foreground()
    }

    pub fn is_in_conference(&mut self) -> SoftphoneResult<bool> {
        Ok(self.engine("is_in_conference")?.is_in_conference())
    }

    pub fn add_listener(&mut self, sink: EngineEventSink) -> SoftphoneResult<()> {
        self.engine("add_listener")?.add_listener(sink);
        Ok(())
    }

    pub fn remove_listeners(&mut self) -> SoftphoneResult<()> {
        self.engine("remove_listeners")?.remove_listeners();
        Ok(())
    }

    /// Tear the engine down: unregister listeners, stop it, release the
    /// handle. Must run once; a second call asserts in debug builds and is a
    /// logged no-op in release builds.
    pub fn destroy(&mut self, _ticker: &TickerStopped) {
        let Some(mut handle) = self.handle.take() else {
            error!("Engine destroyed twice");
            debug_assert!(false, "engine destroyed twice");
            return;
        };
        handle.engine.remove_listeners();
        if self.started {
            if let Err(e) = handle.engine.stop() {
                warn!(error = %e, "Engine stop failed during destroy");
            }
        }
        self.started = false;
        drop(handle);
        info!("Engine destroyed");
    }
}
