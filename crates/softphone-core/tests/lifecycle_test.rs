//! Startup, shutdown, reload and failure recovery of the runtime

mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::{base_config, engine_rc, settle, Harness};
use rvoip_softphone_core::config::{FileConfigSource, SoftphoneConfig, StaticConfigSource};
use rvoip_softphone_core::engine::{ConfiguringStatus, EngineCall, EngineEvent, SimulatedEngine, SimulatedEngineFactory};
use rvoip_softphone_core::events::{PlatformEvent, ServiceStatus, UserAction, UserNotice};
use rvoip_softphone_core::navigation::{LayoutMode, LayoutSlot, Screen, SecondaryPane};
use rvoip_softphone_core::platform::{PlatformCall, SimulatedPlatform};
use rvoip_softphone_core::registration::{RegistrationErrorKind, RegistrationPhase};
use rvoip_softphone_core::runtime::{RuntimeOptions, SoftphoneRuntime};
use rvoip_softphone_core::SoftphoneError;

#[tokio::test]
async fn test_missing_engine_config_is_fatal() {
    let config = SoftphoneConfig::default();
    let engine = SimulatedEngine::new();

    let err = SoftphoneRuntime::start(
        Arc::new(StaticConfigSource::new(config)),
        &SimulatedEngineFactory::new(engine.clone()),
        SimulatedPlatform::new().into_platform(),
        RuntimeOptions::default(),
    )
    .unwrap_err();

    assert!(err.is_fatal());
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_failed_engine_start_releases_listeners() {
    let rc = engine_rc();
    let config = base_config(&rc);
    let engine = SimulatedEngine::new();
    engine.fail_next_start();

    let result = SoftphoneRuntime::start(
        Arc::new(StaticConfigSource::new(config)),
        &SimulatedEngineFactory::new(engine.clone()),
        SimulatedPlatform::new().into_platform(),
        RuntimeOptions::default(),
    );

    assert!(matches!(result, Err(SoftphoneError::Engine(_))));
    assert_eq!(engine.calls(), vec![EngineCall::AddListener, EngineCall::RemoveListeners]);
    assert!(!engine.has_listeners());
}

#[tokio::test(start_paused = true)]
async fn test_push_wakeup_starts_in_background() {
    let rc = engine_rc();
    let config = base_config(&rc);
    let h = Harness::start_with_source(
        Arc::new(StaticConfigSource::new(config)),
        rc,
        RuntimeOptions {
            recovered_from_push: true,
        },
    );

    let calls = h.engine.calls();
    assert_eq!(
        &calls[..3],
        &[EngineCall::AddListener, EngineCall::EnterBackground, EngineCall::Start]
    );
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_runs_in_order() {
    let h = Harness::start(|c| {
        c.auto_answer.enabled = true;
        c.auto_answer.delay_ms = 5000;
    });
    h.call_state("c1", "IncomingReceived");
    h.handle
        .platform_event(PlatformEvent::ProximitySample { distance_cm: 0.5, timestamp: 7 })
        .unwrap();
    settle().await;
    h.handle
        .platform_event(PlatformEvent::ProximitySample { distance_cm: 0.5, timestamp: 8 })
        .unwrap();
    settle().await;
    assert!(h.platform.wake_lock_held());

    let engine = h.engine.clone();
    let platform = h.platform.clone();
    let handle = h.handle.clone();
    let report = h.shutdown().await;

    assert!(report.completed);
    assert_eq!(report.cancelled_tasks, 1);
    assert_eq!(report.abandoned_sessions, 1);

    assert!(!platform.sensor_registered());
    assert!(!platform.wake_lock_held());

    let calls = engine.calls();
    assert_eq!(
        &calls[calls.len() - 3..],
        &[EngineCall::RemoveListeners, EngineCall::RemoveListeners, EngineCall::Stop]
    );
    assert!(!engine.has_listeners());

    let iterations = engine.iterations();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(engine.iterations(), iterations, "ticker stopped before destroy");
    assert_eq!(engine.count(&EngineCall::AcceptCall("c1".into())), 0);

    assert!(matches!(
        handle.user_action(UserAction::HangUpAll),
        Err(SoftphoneError::EngineDestroyed { command: "hang_up_all" })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_iterate_panic_does_not_stop_the_loop() {
    let mut h = Harness::start(|_| {});
    settle().await;

    h.engine.panic_next_iterate();
    h.call_state("c1", "IncomingReceived");
    settle().await;

    let screens: Vec<_> = h.drain_intents().into_iter().map(|i| i.target_screen).collect();
    assert_eq!(screens, vec![Screen::IncomingCall]);

    let iterations = h.engine.iterations();
    settle().await;
    assert!(h.engine.iterations() > iterations, "ticker keeps driving iterate");
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bad_events_are_dropped() {
    let mut h = Harness::start(|_| {});

    h.call_state("ghost", "Connected");
    h.call_state("c1", "Dancing");
    settle().await;
    assert!(!h.platform.sensor_registered());
    assert!(h.drain_intents().is_empty());

    h.call_state("c1", "IncomingReceived");
    settle().await;
    assert!(h.platform.sensor_registered());
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registration_notices_and_status() {
    let h = Harness::start(|_| {});

    h.engine.inject(EngineEvent::GlobalStateChanged {
        state: rvoip_softphone_core::engine::GlobalState::On,
        message: None,
    });
    h.engine.inject(EngineEvent::ConfiguringStatusChanged {
        status: ConfiguringStatus::Successful,
        message: None,
    });
    for _ in 0..2 {
        h.engine.inject(EngineEvent::RegistrationStateChanged {
            account_id: "alice".into(),
            phase: RegistrationPhase::Failed,
            error: Some(RegistrationErrorKind::Unauthorized),
        });
    }
    settle().await;

    assert_eq!(
        h.platform.notices(),
        vec![UserNotice::RegistrationUnauthorized { account_id: "alice".into() }]
    );
    assert_eq!(h.platform.count(&PlatformCall::Status(ServiceStatus::Started)), 1);
    assert_eq!(
        h.platform.count(&PlatformCall::Status(ServiceStatus::RegistrationFailure)),
        1
    );

    h.engine.inject(EngineEvent::RegistrationStateChanged {
        account_id: "alice".into(),
        phase: RegistrationPhase::Ok,
        error: None,
    });
    h.engine.inject(EngineEvent::RegistrationStateChanged {
        account_id: "alice".into(),
        phase: RegistrationPhase::Failed,
        error: Some(RegistrationErrorKind::IoError),
    });
    settle().await;

    assert_eq!(h.platform.notices().len(), 1, "no longer recently provisioned");
    assert_eq!(h.platform.count(&PlatformCall::Status(ServiceStatus::Registered)), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_config_reload_clears_push_parameters() {
    let rc = engine_rc();
    let mut config = base_config(&rc);
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(toml::to_string(&config).unwrap().as_bytes()).unwrap();

    let h = Harness::start_with_source(
        Arc::new(FileConfigSource::new(file.path())),
        rc,
        RuntimeOptions::default(),
    );
    h.handle
        .platform_event(PlatformEvent::PushTokenRefreshed { token: Some("tok".into()) })
        .unwrap();
    settle().await;
    assert_eq!(h.engine.count(&EngineCall::RefreshRegisters), 1);

    config.push.enabled = false;
    std::fs::write(file.path(), toml::to_string(&config).unwrap()).unwrap();
    h.handle.config_changed().unwrap();
    settle().await;

    for account in ["alice", "bob"] {
        assert_eq!(
            h.engine.count(&EngineCall::SetContactParameters {
                account_id: account.into(),
                params: None
            }),
            1
        );
    }
    assert_eq!(h.engine.count(&EngineCall::RefreshRegisters), 2);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_expanded_layout_navigation() {
    let mut h = Harness::start(|c| c.layout_mode = LayoutMode::Expanded);

    h.handle
        .user_action(UserAction::SelectMenu { screen: Screen::ChatList })
        .unwrap();
    h.handle.user_action(UserAction::SelectMenu { screen: Screen::Chat }).unwrap();
    h.handle.user_action(UserAction::Back).unwrap();
    settle().await;
    h.call_state("c1", "IncomingReceived");
    settle().await;
    h.call_state("c1", "Connected");
    h.call_state("c1", "Released");
    settle().await;

    let intents = h.drain_intents();
    let summary: Vec<_> = intents
        .iter()
        .map(|i| (i.target_screen, i.layout_slot, i.secondary_pane))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Screen::ChatList, LayoutSlot::Primary, Some(SecondaryPane::Placeholder)),
            (Screen::Chat, LayoutSlot::Secondary, None),
            (Screen::IncomingCall, LayoutSlot::Primary, Some(SecondaryPane::Hidden)),
            (Screen::InCall, LayoutSlot::Primary, Some(SecondaryPane::Hidden)),
            (Screen::Dialer, LayoutSlot::Primary, Some(SecondaryPane::Hidden)),
        ]
    );
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_engine_commands_forwarded() {
    let h = Harness::start(|_| {});

    h.handle
        .platform_event(PlatformEvent::NetworkReachable { reachable: false })
        .unwrap();
    h.handle.platform_event(PlatformEvent::Rotation { degrees: 90 }).unwrap();
    h.handle.user_action(UserAction::AppBackgrounded).unwrap();
    h.handle.user_action(UserAction::AppForegrounded).unwrap();
    h.handle.user_action(UserAction::HangUpAll).unwrap();
    settle().await;

    for call in [
        EngineCall::SetNetworkReachable(false),
        EngineCall::SetDeviceRotation(90),
        EngineCall::EnterBackground,
        EngineCall::EnterForeground,
        EngineCall::TerminateAll,
    ] {
        assert_eq!(h.engine.count(&call), 1, "{call:?}");
    }
    h.shutdown().await;
}
