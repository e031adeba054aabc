//! Shared harness for runtime integration tests

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use rvoip_softphone_core::config::{AccountConfig, ConfigSource, PushConfig, SoftphoneConfig, StaticConfigSource};
use rvoip_softphone_core::context::ShutdownReport;
use rvoip_softphone_core::engine::{EngineEvent, SimulatedEngine, SimulatedEngineFactory};
use rvoip_softphone_core::navigation::NavigationIntent;
use rvoip_softphone_core::platform::{PlatformRecorder, SimulatedPlatform};
use rvoip_softphone_core::runtime::{RuntimeOptions, SoftphoneHandle, SoftphoneRuntime};
use rvoip_softphone_core::session::CallStateEvent;

/// Engine configuration file that lives as long as the harness
pub fn engine_rc() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp engine config");
    writeln!(file, "[sip]\nsip_port=5060").expect("write engine config");
    file
}

/// Configuration with three accounts, push enabled for the first two
pub fn base_config(engine_rc: &NamedTempFile) -> SoftphoneConfig {
    let mut config = SoftphoneConfig::default();
    config.engine.config_path = Some(engine_rc.path().to_path_buf());
    config.push = PushConfig {
        enabled: true,
        app_id: Some("org.example.softphone".into()),
        push_type: "firebase".into(),
    };
    config.accounts = vec![
        AccountConfig { id: "alice".into(), push_allowed: true },
        AccountConfig { id: "bob".into(), push_allowed: true },
        AccountConfig { id: "carol".into(), push_allowed: false },
    ];
    config.default_account = Some("alice".into());
    config
}

pub struct Harness {
    pub runtime: SoftphoneRuntime,
    pub handle: SoftphoneHandle,
    pub engine: SimulatedEngine,
    pub platform: PlatformRecorder,
    pub intents: mpsc::UnboundedReceiver<NavigationIntent>,
    _engine_rc: NamedTempFile,
}

impl Harness {
    /// Start a runtime with the base configuration adjusted by `adjust`
    pub fn start(adjust: impl FnOnce(&mut SoftphoneConfig)) -> Self {
        let engine_rc = engine_rc();
        let mut config = base_config(&engine_rc);
        adjust(&mut config);
        Self::start_with_source(Arc::new(StaticConfigSource::new(config)), engine_rc, RuntimeOptions::default())
    }

    pub fn start_with_source(source: Arc<dyn ConfigSource>, engine_rc: NamedTempFile, options: RuntimeOptions) -> Self {
        let engine = SimulatedEngine::new();
        let platform = SimulatedPlatform::new();
        let recorder = platform.recorder();
        let (runtime, intents) = SoftphoneRuntime::start(
            source,
            &SimulatedEngineFactory::new(engine.clone()),
            platform.into_platform(),
            options,
        )
        .expect("runtime starts");
        Self {
            handle: runtime.handle(),
            runtime,
            engine,
            platform: recorder,
            intents,
            _engine_rc: engine_rc,
        }
    }

    pub fn call_state(&self, call_id: &str, phase: &str) {
        self.engine
            .inject(EngineEvent::CallStateChanged(CallStateEvent::new(call_id, phase)));
    }

    pub fn inject(&self, event: CallStateEvent) {
        self.engine.inject(EngineEvent::CallStateChanged(event));
    }

    /// Intents emitted so far
    pub fn drain_intents(&mut self) -> Vec<NavigationIntent> {
        let mut intents = Vec::new();
        while let Ok(intent) = self.intents.try_recv() {
            intents.push(intent);
        }
        intents
    }

    pub async fn shutdown(self) -> ShutdownReport {
        self.runtime.shutdown().await.expect("clean shutdown")
    }
}

/// Let a few ticks run so injected events and commands are processed
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
