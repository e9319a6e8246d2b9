//! Request cycle integration tests against a simulated host.

use permflow_rs_core::{
    CustomPermission, EventPayload, PermissionCoordinator, PermissionResultMap, Resolution,
};
use permflow_rs_test_utils::{
    FailingLauncher, FakeManifestHost, LaunchTracker, RecordingEventSink, RecordingLauncher,
    ScriptedGuide, SwitchProbe,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";
const COARSE: &str = "android.permission.ACCESS_COARSE_LOCATION";
const STORAGE: &str = "android.permission.WRITE_EXTERNAL_STORAGE";

fn result_map(entries: &[(&str, bool)]) -> PermissionResultMap {
    entries
        .iter()
        .map(|(name, granted)| (name.to_string(), *granted))
        .collect()
}

async fn run_once(coordinator: &PermissionCoordinator) -> PermissionResultMap {
    coordinator
        .request_permission()
        .expect("start cycle")
        .finish()
        .await
        .expect("cycle result")
}

/// A denied manifest permission and a custom permission whose launch flips
/// its probe both end up in the published map.
#[tokio::test]
async fn location_and_gps_resolve_end_to_end() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_choice(LOCATION, true),
    );
    let gps = SwitchProbe::new(false);
    let guide = ScriptedGuide::proceed("location_source_settings".to_string());
    let launcher: RecordingLauncher<String> = RecordingLauncher::new().granting(gps.clone());
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION])
        .custom(
            CustomPermission::new("GPS", gps.clone()).with_flow(guide.clone(), launcher.clone()),
        )
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[(LOCATION, true), ("GPS", true)]));
    assert_eq!(host.requests(), vec![vec![LOCATION.to_string()]]);
    assert_eq!(guide.presented(), 1);
    assert_eq!(launcher.payloads(), vec!["location_source_settings".to_string()]);
    assert_eq!(coordinator.latest().expect("snapshot").results, results);
}

#[tokio::test]
async fn every_declared_permission_gets_exactly_one_entry() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, true)
            .with_granted(STORAGE, false)
            .with_choice(STORAGE, false)
            .with_extra_answer("android.permission.CAMERA", true),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION, STORAGE])
        .custom(CustomPermission::new("battery_optimizations", || true))
        .custom(CustomPermission::new("overlay_draw", || false))
        .custom(
            CustomPermission::new("gps_setting", || false)
                .with_guide(ScriptedGuide::<()>::decline()),
        )
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(
        results,
        result_map(&[
            (LOCATION, true),
            (STORAGE, false),
            ("battery_optimizations", true),
            ("overlay_draw", false),
            ("gps_setting", false),
        ])
    );
    assert!(!results.contains_key("android.permission.CAMERA"));
}

#[tokio::test]
async fn granted_manifest_never_calls_requester() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, true)
            .with_granted(COARSE, true),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION, COARSE])
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(host.request_count(), 0);
    assert_eq!(results, result_map(&[(LOCATION, true), (COARSE, true)]));
    assert!(!coordinator.is_guidance_likely_shown());
}

#[tokio::test(start_paused = true)]
async fn launches_are_never_concurrent() {
    let host = Arc::new(FakeManifestHost::new());
    let tracker = LaunchTracker::new();
    let mut builder = PermissionCoordinator::builder(host.clone(), host.clone());
    for name in ["overlay_draw", "gps_setting", "notification_listener"] {
        let probe = SwitchProbe::new(false);
        let launcher: RecordingLauncher<&'static str> = RecordingLauncher::new()
            .with_tracker(tracker.clone())
            .with_delay(Duration::from_millis(100))
            .granting(probe.clone());
        builder = builder.custom(
            CustomPermission::new(name, probe).with_flow(ScriptedGuide::proceed(name), launcher),
        );
    }
    let coordinator = builder.build().expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(tracker.started(), 3);
    assert_eq!(tracker.max_pending(), 1);
    assert_eq!(tracker.pending(), 0);
    assert!(results.values().all(|granted| *granted));
}

#[tokio::test]
async fn launch_failure_uses_fresh_probe() {
    let host = Arc::new(FakeManifestHost::new());
    let flipped = SwitchProbe::new(false);
    let untouched = SwitchProbe::new(false);
    let flipping = FailingLauncher::new().setting(flipped.clone(), true);
    let failing = FailingLauncher::new();
    let events = RecordingEventSink::new();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .custom(
            CustomPermission::new("overlay_draw", flipped.clone())
                .with_flow(ScriptedGuide::proceed(1_u8), flipping.clone()),
        )
        .custom(
            CustomPermission::new("gps_setting", untouched.clone())
                .with_flow(ScriptedGuide::proceed(2_u8), failing.clone()),
        )
        .event_sink(Arc::new(events.clone()))
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(
        results,
        result_map(&[("overlay_draw", true), ("gps_setting", false)])
    );
    assert_eq!(flipping.attempts(), 1);
    assert_eq!(failing.attempts(), 1);
    let resolutions: Vec<_> = events
        .payloads()
        .into_iter()
        .filter_map(|payload| match payload {
            EventPayload::CustomResolved { resolution, .. } => Some(resolution),
            _ => None,
        })
        .collect();
    assert_eq!(
        resolutions,
        vec![Resolution::LaunchFailed, Resolution::LaunchFailed]
    );
}

#[tokio::test]
async fn guide_without_launcher_falls_back_to_probe() {
    let host = Arc::new(FakeManifestHost::new());
    let checks = Arc::new(AtomicUsize::new(0));
    let counted = checks.clone();
    // Denied on the first check, granted on every later one.
    let probe = move || counted.fetch_add(1, Ordering::SeqCst) > 0;
    let guide = ScriptedGuide::proceed("location_source_settings");
    let events = RecordingEventSink::new();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .custom(CustomPermission::new("gps_setting", probe).with_guide(guide.clone()))
        .event_sink(Arc::new(events.clone()))
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[("gps_setting", true)]));
    assert_eq!(guide.presented(), 1);
    assert_eq!(checks.load(Ordering::SeqCst), 2);
    assert!(events.payloads().contains(&EventPayload::CustomResolved {
        name: "gps_setting".to_string(),
        granted: true,
        resolution: Resolution::LaunchFailed,
    }));
}

#[tokio::test]
async fn declined_guide_skips_launcher() {
    let host = Arc::new(FakeManifestHost::new());
    let guide = ScriptedGuide::<u8>::decline();
    let launcher = FailingLauncher::new();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .custom(
            CustomPermission::new("gps_setting", || false)
                .with_flow(guide.clone(), launcher.clone()),
        )
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[("gps_setting", false)]));
    assert_eq!(guide.presented(), 1);
    assert_eq!(launcher.attempts(), 0);
}

#[tokio::test]
async fn dropped_guide_reply_counts_as_decline() {
    let host = Arc::new(FakeManifestHost::new());
    let launcher = FailingLauncher::new();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .custom(
            CustomPermission::new("gps_setting", || false)
                .with_flow(ScriptedGuide::<u8>::dropping(), launcher.clone()),
        )
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[("gps_setting", false)]));
    assert_eq!(launcher.attempts(), 0);
}

#[tokio::test]
async fn dropped_launch_reply_reprobes() {
    let host = Arc::new(FakeManifestHost::new());
    let probe = SwitchProbe::new(false);
    let launcher: RecordingLauncher<u8> = RecordingLauncher::new()
        .granting(probe.clone())
        .dropping_reply();
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .custom(
            CustomPermission::new("overlay_draw", probe.clone())
                .with_flow(ScriptedGuide::proceed(0_u8), launcher.clone()),
        )
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[("overlay_draw", true)]));
    assert_eq!(launcher.tracker().started(), 1);
}

#[tokio::test]
async fn satisfied_custom_permission_shows_no_guide() {
    let host = Arc::new(FakeManifestHost::new());
    let probe = SwitchProbe::new(true);
    let guide = ScriptedGuide::proceed(0_u8);
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .custom(CustomPermission::new("overlay_draw", probe.clone()).with_guide(guide.clone()))
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[("overlay_draw", true)]));
    assert_eq!(guide.presented(), 0);
}

#[tokio::test]
async fn batch_entry_missing_from_reply_is_probed() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_granted(STORAGE, false)
            .with_choice(LOCATION, true)
            .with_choice(STORAGE, false)
            .omitting(LOCATION),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION, STORAGE])
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[(LOCATION, true), (STORAGE, false)]));
}

#[tokio::test]
async fn dropped_batch_reply_is_probed() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_granted(COARSE, true)
            .dropping_replies(),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION, COARSE])
        .build()
        .expect("build");

    let results = run_once(&coordinator).await;

    assert_eq!(results, result_map(&[(LOCATION, false), (COARSE, true)]));
    assert_eq!(host.request_count(), 1);
    assert!(coordinator.last_batch_round_trip().is_some());
}

#[tokio::test(start_paused = true)]
async fn fast_batch_answer_means_guidance_not_shown() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_latency(Duration::from_millis(50)),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION])
        .build()
        .expect("build");

    run_once(&coordinator).await;

    let round_trip = coordinator.last_batch_round_trip().expect("round trip");
    assert!(round_trip >= Duration::from_millis(50));
    assert!(round_trip < coordinator.config().guidance_threshold());
    assert!(!coordinator.is_guidance_likely_shown());
}

#[tokio::test(start_paused = true)]
async fn slow_batch_answer_means_guidance_shown() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_latency(Duration::from_millis(500)),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION])
        .build()
        .expect("build");

    run_once(&coordinator).await;

    assert!(coordinator.is_guidance_likely_shown());
}

#[tokio::test(start_paused = true)]
async fn round_trip_resets_when_next_cycle_short_circuits() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_choice(LOCATION, true)
            .with_latency(Duration::from_millis(500)),
    );
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([LOCATION])
        .build()
        .expect("build");

    run_once(&coordinator).await;
    assert!(coordinator.is_guidance_likely_shown());

    run_once(&coordinator).await;
    assert_eq!(host.request_count(), 1);
    assert_eq!(coordinator.last_batch_round_trip(), None);
    assert!(!coordinator.is_guidance_likely_shown());
}

#[tokio::test]
async fn live_queries_follow_ground_truth() {
    let host = Arc::new(
        FakeManifestHost::new()
            .with_granted(LOCATION, false)
            .with_granted(STORAGE, true),
    );
    let overlay = SwitchProbe::new(false);
    let coordinator = PermissionCoordinator::builder(host.clone(), host.clone())
        .manifest([STORAGE, LOCATION])
        .custom(CustomPermission::new("overlay_draw", overlay.clone()))
        .custom(CustomPermission::new("battery_optimizations", || true))
        .build()
        .expect("build");

    let denied = coordinator.list_denied();
    assert_eq!(denied, vec![LOCATION.to_string(), "overlay_draw".to_string()]);
    assert_eq!(coordinator.list_denied(), denied);
    assert_eq!(
        coordinator.list_granted(),
        vec![STORAGE.to_string(), "battery_optimizations".to_string()]
    );

    host.set_granted(LOCATION, true);
    overlay.set(true);
    assert!(coordinator.list_denied().is_empty());
    assert_eq!(coordinator.list_granted().len(), 4);
    assert!(coordinator.latest().is_none());
}
