use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::Mutex;
use permflow_rs::config::PermflowConfig;
use permflow_rs::core::{
    BulkPermissionRequester, BulkReply, EventBus, GuideReply, LaunchError, LaunchOutcome,
    LaunchReply, ManifestProbe, PermissionGuide, PermissionLauncher,
};
use permflow_rs::{CustomPermission, PermissionCoordinator, ResultSnapshot, init_logging};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

const STORAGE: &str = "android.permission.WRITE_EXTERNAL_STORAGE";

/// Settings screens the simulated device can open.
#[derive(Debug, Clone, Copy)]
enum SettingsScreen {
    OverlayPermission,
    LocationSource,
}

#[derive(Default)]
struct DeviceState {
    granted: HashMap<String, bool>,
    /// Refused with "don't ask again"; the platform answers without a dialog.
    suppressed: HashSet<String>,
    overlay: bool,
    gps: bool,
}

/// Simulated phone with a scripted user behind the permission dialog.
#[derive(Clone, Default)]
struct Device {
    state: Arc<Mutex<DeviceState>>,
}

impl Device {
    fn overlay_enabled(&self) -> bool {
        self.state.lock().overlay
    }

    fn gps_enabled(&self) -> bool {
        self.state.lock().gps
    }

    fn open(&self, screen: SettingsScreen) {
        let mut state = self.state.lock();
        match screen {
            SettingsScreen::OverlayPermission => state.overlay = true,
            SettingsScreen::LocationSource => state.gps = true,
        }
    }
}

impl ManifestProbe for Device {
    fn is_granted(&self, name: &str) -> bool {
        self.state.lock().granted.get(name).copied().unwrap_or(false)
    }
}

impl BulkPermissionRequester for Device {
    fn request(&self, names: &[String], reply: BulkReply) {
        let state = self.state.clone();
        let names = names.to_vec();
        tokio::spawn(async move {
            let dialog_shown = {
                let state = state.lock();
                names.iter().any(|name| !state.suppressed.contains(name))
            };
            let delay = if dialog_shown { 600 } else { 20 };
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let mut state = state.lock();
            let mut answers = Vec::new();
            for name in names {
                if !state.suppressed.contains(&name) {
                    // The user allows location and refuses storage for good.
                    let granted = name != STORAGE;
                    state.granted.insert(name.clone(), granted);
                    if !granted {
                        state.suppressed.insert(name.clone());
                    }
                }
                let granted = state.granted.get(&name).copied().unwrap_or(false);
                answers.push((name, granted));
            }
            drop(state);
            reply.resolve(answers);
        });
    }
}

/// Console guide that sends the user to a settings screen, optionally after
/// being dismissed once.
struct ConsoleGuide {
    message: &'static str,
    screen: SettingsScreen,
    dismiss_first: AtomicBool,
}

impl PermissionGuide<SettingsScreen> for ConsoleGuide {
    fn present(&self, reply: GuideReply<SettingsScreen>) {
        println!("guide: {}", self.message);
        if self.dismiss_first.swap(false, Ordering::SeqCst) {
            println!("guide: dismissed by the user");
            reply.decline();
        } else {
            reply.proceed(self.screen);
        }
    }
}

struct SettingsLauncher {
    device: Arc<Device>,
}

impl PermissionLauncher<SettingsScreen> for SettingsLauncher {
    fn launch(&self, screen: SettingsScreen, reply: LaunchReply) -> Result<(), LaunchError> {
        println!("launch: opening {screen:?}");
        let device = self.device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            device.open(screen);
            reply.complete(LaunchOutcome::ok());
        });
        Ok(())
    }
}

fn report(coordinator: &PermissionCoordinator, snapshot: &ResultSnapshot) {
    println!("granted: {:?}", snapshot.granted());
    println!("denied: {:?}", snapshot.denied());

    let denied_manifest: Vec<String> = coordinator
        .list_denied()
        .into_iter()
        .filter(|name| coordinator.manifest_names().contains(name))
        .collect();
    if denied_manifest.is_empty() {
        return;
    }
    if coordinator.is_guidance_likely_shown() {
        println!("the permission dialog was shown; ask again later");
    } else {
        println!(
            "the permission dialog was suppressed; open the app settings screen to grant {denied_manifest:?}"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("permflow.json5");
    let config_display = config_path.display().to_string();
    let config = PermflowConfig::load_from_path(&config_path)
        .with_context(|| format!("failed to load config at {config_display}"))?;

    let device = Arc::new(Device::default());
    let event_bus = EventBus::new(config.coordinator.event_buffer);
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => println!("event: {:?}", event.payload),
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("event listener lagged (skipped={skipped})");
                }
            }
        }
    });

    let overlay_probe = device.clone();
    let gps_probe = device.clone();
    let coordinator = PermissionCoordinator::builder(device.clone(), device.clone())
        .from_config(&config)
        .custom(
            CustomPermission::new("overlay_draw", move || overlay_probe.overlay_enabled())
                .with_flow(
                    ConsoleGuide {
                        message: "allow drawing over other apps to show the floating map",
                        screen: SettingsScreen::OverlayPermission,
                        dismiss_first: AtomicBool::new(false),
                    },
                    SettingsLauncher {
                        device: device.clone(),
                    },
                ),
        )
        .custom(
            CustomPermission::new("gps_setting", move || gps_probe.gps_enabled()).with_flow(
                ConsoleGuide {
                    message: "turn on location services for accurate tracking",
                    screen: SettingsScreen::LocationSource,
                    dismiss_first: AtomicBool::new(true),
                },
                SettingsLauncher {
                    device: device.clone(),
                },
            ),
        )
        .event_sink(Arc::new(event_bus.clone()))
        .build()
        .context("failed to build permission coordinator")?;

    let mut snapshots = coordinator.subscribe();
    for round in 1..=2 {
        println!("== request round {round} ==");
        coordinator.request_permission()?.finish().await?;
        let snapshot = snapshots.next().await.context("result stream closed")?;
        report(&coordinator, &snapshot);
    }

    Ok(())
}
