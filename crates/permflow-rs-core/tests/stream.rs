//! Result stream and event delivery tests.

use futures_util::StreamExt;
use permflow_rs_core::{
    CustomPermission, CycleState, EventBus, EventPayload, PermissionCoordinator, Resolution,
};
use permflow_rs_test_utils::{
    FakeManifestHost, RecordingEventSink, RecordingLauncher, ScriptedGuide, SwitchProbe,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const CAMERA: &str = "android.permission.CAMERA";

fn camera_host(granted: bool) -> Arc<FakeManifestHost> {
    Arc::new(
        FakeManifestHost::new()
            .with_granted(CAMERA, granted)
            .with_choice(CAMERA, true),
    )
}

#[tokio::test]
async fn late_subscriber_receives_latest_snapshot() {
    let host = camera_host(false);
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([CAMERA])
        .build()
        .expect("build");

    let cycle = coordinator.request_permission().expect("cycle");
    let cycle_id = cycle.cycle_id;
    cycle.finish().await.expect("result");

    let mut stream = coordinator.subscribe();
    let snapshot = stream.next().await.expect("snapshot");
    assert_eq!(snapshot.cycle_id, cycle_id);
    assert_eq!(snapshot.granted(), vec![CAMERA]);
    assert!(snapshot.all_granted());
}

#[tokio::test]
async fn early_subscriber_waits_for_first_publish() {
    let host = camera_host(true);
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([CAMERA])
        .build()
        .expect("build");
    let mut stream = coordinator.subscribe();

    let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
    assert!(pending.is_err());

    let cycle = coordinator.request_permission().expect("cycle");
    let cycle_id = cycle.cycle_id;
    let snapshot = stream.next().await.expect("snapshot");
    assert_eq!(snapshot.cycle_id, cycle_id);
    cycle.finish().await.expect("result");
}

#[tokio::test]
async fn each_cycle_replaces_previous_snapshot() {
    let host = camera_host(true);
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([CAMERA])
        .build()
        .expect("build");

    let first = coordinator.request_permission().expect("first");
    first.finish().await.expect("first result");
    let second = coordinator.request_permission().expect("second");
    let second_id = second.cycle_id;
    second.finish().await.expect("second result");

    let mut stream = coordinator.subscribe();
    let snapshot = stream.next().await.expect("snapshot");
    assert_eq!(snapshot.cycle_id, second_id);
    assert_eq!(
        coordinator.latest().map(|snapshot| snapshot.cycle_id),
        Some(second_id)
    );
}

#[tokio::test]
async fn cycle_events_follow_state_machine() {
    let host = camera_host(false);
    let overlay = SwitchProbe::new(false);
    let launcher: RecordingLauncher<u8> = RecordingLauncher::new().granting(overlay.clone());
    let events = RecordingEventSink::new();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([CAMERA])
        .custom(
            CustomPermission::new("overlay_draw", overlay.clone())
                .with_flow(ScriptedGuide::proceed(3_u8), launcher),
        )
        .event_sink(Arc::new(events.clone()))
        .build()
        .expect("build");

    let cycle = coordinator.request_permission().expect("cycle");
    let cycle_id = cycle.cycle_id;
    cycle.finish().await.expect("result");

    let recorded = events.events();
    assert!(recorded.iter().all(|event| event.cycle_id == cycle_id));
    let payloads = events.payloads();
    assert_eq!(
        payloads.first(),
        Some(&EventPayload::CycleStarted { denied_manifest: 1 })
    );
    let states: Vec<CycleState> = payloads
        .iter()
        .filter_map(|payload| match payload {
            EventPayload::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            CycleState::BatchPending,
            CycleState::CustomIterating,
            CycleState::CustomAwaitingGuide,
            CycleState::CustomAwaitingLaunch,
            CycleState::Published,
        ]
    );
    assert!(payloads.contains(&EventPayload::CustomResolved {
        name: "overlay_draw".to_string(),
        granted: true,
        resolution: Resolution::Launched,
    }));
    assert!(matches!(
        payloads.last(),
        Some(EventPayload::CyclePublished { results }) if results.len() == 2
    ));
}

#[tokio::test]
async fn event_bus_fans_out_to_subscribers() {
    let host = camera_host(true);
    let bus = EventBus::new(32);
    let mut receiver = bus.subscribe();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([CAMERA])
        .build()
        .expect("build");
    coordinator.set_event_sink(Some(Arc::new(bus.clone())));

    let cycle = coordinator.request_permission().expect("cycle");
    cycle.finish().await.expect("result");

    let mut kinds = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        kinds.push(event.payload);
    }
    assert!(matches!(
        kinds.first(),
        Some(EventPayload::CycleStarted { denied_manifest: 0 })
    ));
    assert!(matches!(
        kinds.last(),
        Some(EventPayload::CyclePublished { .. })
    ));

    let mut stream = bus.stream();
    coordinator
        .request_permission()
        .expect("second cycle")
        .finish()
        .await
        .expect("second result");
    let first = stream.next().await.expect("event").expect("not lagged");
    assert!(matches!(
        first.payload,
        EventPayload::CycleStarted { .. }
    ));
}
