//! Test helpers shared across permflow crates.

pub mod events;
pub mod host;
pub mod launcher;
pub mod probe;

pub use events::RecordingEventSink;
pub use host::FakeManifestHost;
pub use launcher::{FailingLauncher, LaunchTracker, RecordingLauncher, ScriptedGuide};
pub use probe::SwitchProbe;
