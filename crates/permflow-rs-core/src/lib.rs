//! Core coordinator for permflow.
//!
//! `PermissionCoordinator` requests a fixed set of manifest permissions in
//! one batched host call, then walks application-defined custom permissions
//! one at a time (probe, guide, launch, re-probe) and publishes a single
//! result map per cycle. Hosts plug in through the traits in [`capability`].

pub mod capability;
mod coordinator;
mod error;
mod events;
mod permission;
mod session;
mod stream;

pub use capability::{
    BulkPermissionRequester, BulkReply, GuideReply, LaunchError, LaunchReply, ManifestProbe,
    PermissionGuide, PermissionLauncher, PermissionProbe,
};
pub use coordinator::{CycleHandle, PermissionCoordinator, PermissionCoordinatorBuilder};
pub use error::{CoordinatorError, CycleError};
pub use events::EventBus;
pub use permission::CustomPermission;
pub use stream::ResultStream;

pub use permflow_rs_config::{CoordinatorConfig, PermflowConfig, ReentryPolicy};
pub use permflow_rs_protocol::{
    CycleId, CycleState, EventMsg, EventPayload, EventSink, LaunchOutcome, PermissionKind,
    PermissionResultMap, Resolution, ResultSnapshot,
};
