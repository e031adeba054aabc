//! End-to-end call scenarios against the recording engine

mod common;

use std::time::Duration;

use common::{settle, Harness};
use rvoip_softphone_core::engine::EngineCall;
use rvoip_softphone_core::events::{PlatformEvent, UserAction, UserNotice};
use rvoip_softphone_core::navigation::Screen;
use rvoip_softphone_core::platform::PlatformCall;
use rvoip_softphone_core::session::{CallStateEvent, DeclineReason};

#[tokio::test(start_paused = true)]
async fn test_scenario_a_auto_answer_accepts_exactly_once() {
    let h = Harness::start(|c| {
        c.auto_answer.enabled = true;
        c.auto_answer.delay_ms = 2000;
    });

    h.call_state("c1", "IncomingReceived");
    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert_eq!(h.engine.count(&EngineCall::AcceptCall("c1".into())), 0);
    assert!(!h.platform.is_ringing(), "auto-answered call does not ring");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.engine.count(&EngineCall::AcceptCall("c1".into())), 1);
    assert_eq!(h.platform.count(&PlatformCall::RoutedToReceiver), 1);

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(h.engine.count(&EngineCall::AcceptCall("c1".into())), 1);

    let report = h.shutdown().await;
    assert_eq!(report.cancelled_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_auto_answer_skipped_when_user_answers_first() {
    let h = Harness::start(|c| {
        c.auto_answer.enabled = true;
        c.auto_answer.delay_ms = 2000;
    });

    h.call_state("c1", "IncomingReceived");
    settle().await;
    h.handle.user_action(UserAction::Accept { call_id: "c1".into() }).unwrap();
    h.call_state("c1", "Connected");

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(h.engine.count(&EngineCall::AcceptCall("c1".into())), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_cellular_call_declines_busy() {
    let h = Harness::start(|c| {
        c.auto_answer.enabled = true;
        c.auto_answer.delay_ms = 2000;
    });

    h.handle
        .platform_event(PlatformEvent::CellularCallStateChanged { active: true })
        .unwrap();
    settle().await;
    h.call_state("c1", "IncomingReceived");
    settle().await;

    assert_eq!(
        h.engine.count(&EngineCall::DeclineCall("c1".into(), DeclineReason::Busy)),
        1
    );
    assert_eq!(h.platform.count(&PlatformCall::IncomingCallShown("c1".into())), 0);

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(h.engine.count(&EngineCall::AcceptCall("c1".into())), 0);

    let report = h.shutdown().await;
    assert_eq!(report.cancelled_tasks, 0, "busy decline never schedules");
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_overlapping_calls_keep_sensor() {
    let mut h = Harness::start(|_| {});

    h.call_state("c1", "OutgoingInit");
    h.call_state("c1", "OutgoingRinging");
    h.call_state("c1", "Connected");
    h.call_state("c2", "IncomingReceived");
    settle().await;
    assert!(h.platform.sensor_registered());

    h.call_state("c1", "Ended");
    h.call_state("c1", "Released");
    settle().await;
    assert!(h.platform.sensor_registered(), "one call still active");
    let screens: Vec<_> = h.drain_intents().into_iter().map(|i| i.target_screen).collect();
    assert_eq!(
        screens.last(),
        Some(&Screen::IncomingCall),
        "back to the call that is still ringing: {screens:?}"
    );
    assert_eq!(h.platform.count(&PlatformCall::SensorUnregistered), 0);
    assert_eq!(h.platform.count(&PlatformCall::SensorRegistered), 1);

    h.call_state("c2", "Released");
    settle().await;
    assert!(!h.platform.sensor_registered());
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_push_token_coalesces_registration() {
    let h = Harness::start(|_| {});

    h.handle
        .platform_event(PlatformEvent::PushTokenRefreshed { token: Some("tok-1".into()) })
        .unwrap();
    settle().await;

    let updated: Vec<_> = h
        .engine
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EngineCall::SetContactParameters { account_id, params } => Some((account_id, params)),
            _ => None,
        })
        .collect();
    let expected = "app-id=org.example.softphone;pn-type=firebase;pn-tok=tok-1;pn-silent=1".to_string();
    assert_eq!(
        updated,
        vec![
            ("alice".to_string(), Some(expected.clone())),
            ("bob".to_string(), Some(expected)),
        ]
    );
    assert_eq!(h.engine.count(&EngineCall::RefreshRegisters), 1);

    h.handle
        .platform_event(PlatformEvent::PushTokenRefreshed { token: Some("tok-1".into()) })
        .unwrap();
    settle().await;
    assert_eq!(h.engine.count(&EngineCall::RefreshRegisters), 1, "unchanged token is a no-op");
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scenario_e_video_update_deferred_until_user_decides() {
    let mut h = Harness::start(|_| {});

    h.call_state("c1", "OutgoingInit");
    h.call_state("c1", "OutgoingProgress");
    h.call_state("c1", "Connected");
    h.inject(CallStateEvent::new("c1", "UpdatedByRemote").with_video(true, false));
    settle().await;

    assert_eq!(h.engine.count(&EngineCall::DeferCallUpdate("c1".into())), 1);
    assert!(!h
        .engine
        .calls()
        .iter()
        .any(|call| matches!(call, EngineCall::AcceptCallUpdate { .. })));
    assert_eq!(
        h.platform.notices(),
        vec![UserNotice::VideoUpdateRequested { call_id: "c1".into() }]
    );
    let screens: Vec<_> = h.drain_intents().into_iter().map(|i| i.target_screen).collect();
    assert_eq!(screens, vec![Screen::OutgoingCall, Screen::InCall]);

    h.handle
        .user_action(UserAction::VideoUpdateDecision {
            call_id: "c1".into(),
            accept_video: true,
        })
        .unwrap();
    settle().await;
    assert_eq!(
        h.engine.count(&EngineCall::AcceptCallUpdate {
            call_id: "c1".into(),
            with_video: true
        }),
        1
    );

    h.handle
        .user_action(UserAction::VideoUpdateDecision {
            call_id: "c1".into(),
            accept_video: true,
        })
        .unwrap();
    settle().await;
    assert_eq!(
        h.engine
            .calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::AcceptCallUpdate { .. }))
            .count(),
        1,
        "second decision has nothing to answer"
    );
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auto_accept_video_lets_engine_answer() {
    let h = Harness::start(|c| c.auto_accept_video = true);

    h.call_state("c1", "OutgoingInit");
    h.call_state("c1", "OutgoingProgress");
    h.call_state("c1", "Connected");
    h.inject(CallStateEvent::new("c1", "UpdatedByRemote").with_video(true, false));
    settle().await;

    assert_eq!(h.engine.count(&EngineCall::DeferCallUpdate("c1".into())), 0);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missed_calls_are_counted_until_reset() {
    let h = Harness::start(|_| {});

    for call_id in ["c1", "c2"] {
        h.call_state(call_id, "IncomingReceived");
        h.call_state(call_id, "Ended");
        h.call_state(call_id, "Released");
        settle().await;
    }
    h.handle.user_action(UserAction::ResetMissedCalls).unwrap();
    h.call_state("c3", "IncomingReceived");
    settle().await;
    h.handle.user_action(UserAction::Decline { call_id: "c3".into() }).unwrap();
    settle().await;
    h.call_state("c3", "Released");
    h.call_state("c4", "IncomingReceived");
    h.call_state("c4", "Released");
    settle().await;

    let missed: Vec<_> = h
        .platform
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            PlatformCall::MissedCallShown { call_id, missed_count } => Some((call_id, missed_count)),
            _ => None,
        })
        .collect();
    assert_eq!(
        missed,
        vec![("c1".to_string(), 1), ("c2".to_string(), 2), ("c4".to_string(), 1)]
    );
    assert_eq!(
        h.engine.count(&EngineCall::DeclineCall("c3".into(), DeclineReason::Declined)),
        1
    );
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_last_call_returns_audio_to_receiver() {
    let h = Harness::start(|_| {});

    h.call_state("c1", "IncomingReceived");
    settle().await;
    assert!(h.platform.is_ringing());

    h.call_state("c1", "Connected");
    h.handle
        .platform_event(PlatformEvent::ProximitySample { distance_cm: 1.0, timestamp: 42 })
        .unwrap();
    settle().await;
    assert!(!h.platform.is_ringing());
    assert!(h.platform.wake_lock_held());

    h.call_state("c1", "Ended");
    h.call_state("c1", "Released");
    settle().await;
    assert!(!h.platform.wake_lock_held());
    assert!(!h.platform.sensor_registered());
    assert_eq!(h.platform.count(&PlatformCall::RoutedToReceiver), 1);
    h.shutdown().await;
}
