//! Shared types for permflow results, cycle events, and host outcomes.

mod outcome;

pub use outcome::LaunchOutcome;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a request cycle.
pub type CycleId = Uuid;

/// Granted state per permission name for one completed cycle.
pub type PermissionResultMap = BTreeMap<String, bool>;

/// Result map published at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    /// Cycle that produced the snapshot.
    pub cycle_id: CycleId,
    /// One entry per declared permission.
    pub results: PermissionResultMap,
    /// Timestamp when the snapshot was published.
    pub published_at: DateTime<Utc>,
}

impl ResultSnapshot {
    /// Names recorded as granted, in name order.
    pub fn granted(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names recorded as denied, in name order.
    pub fn denied(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, granted)| !**granted)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Whether every declared permission was granted.
    pub fn all_granted(&self) -> bool {
        self.results.values().all(|granted| *granted)
    }
}

/// Category of a declared permission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Platform permission requested through the batched host call.
    Manifest,
    /// Application-defined gate with its own probe, guide and launcher.
    Custom,
}

/// How a custom permission reached its final value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Probe reported the permission as satisfied before any UI.
    AlreadyGranted,
    /// No guide configured; recorded as declined.
    MissingGuide,
    /// Guide answered without a payload (or never answered).
    Declined,
    /// Launcher ran to completion and the probe was re-checked.
    Launched,
    /// Launcher could not be started; the probe was re-checked.
    LaunchFailed,
}

/// Lifecycle states of a request cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    Idle,
    BatchPending,
    CustomIterating,
    CustomAwaitingGuide,
    CustomAwaitingLaunch,
    Published,
}

/// Wrapper for events emitted by a coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMsg {
    /// Unique id for the event.
    pub id: Uuid,
    /// Cycle associated with the event.
    pub cycle_id: CycleId,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: EventPayload,
}

impl EventMsg {
    /// Wrap a payload with a fresh id and the current time.
    pub fn new(cycle_id: CycleId, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            cycle_id,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All events emitted during a request cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum EventPayload {
    /// Cycle started; `denied` manifest permissions were counted up front.
    CycleStarted { denied_manifest: usize },
    /// Batched manifest request issued to the host.
    BatchRequested { names: Vec<String> },
    /// Batched manifest request answered (or skipped when nothing was denied).
    BatchResolved {
        results: PermissionResultMap,
        round_trip_ms: Option<u64>,
    },
    /// Cycle moved to a new state.
    StateChanged {
        state: CycleState,
        #[serde(default)]
        permission: Option<String>,
    },
    /// A custom permission was resolved.
    CustomResolved {
        name: String,
        granted: bool,
        resolution: Resolution,
    },
    /// Snapshot pushed to subscribers.
    CyclePublished { results: PermissionResultMap },
    /// Cycle aborted before publishing.
    CycleCancelled { reason: String },
    /// A new cycle was refused because another one is running.
    ReentryRejected { active: CycleId },
}

/// Sink interface for coordinator events.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners.
    fn emit(&self, event: EventMsg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn snapshot(entries: &[(&str, bool)]) -> ResultSnapshot {
        ResultSnapshot {
            cycle_id: Uuid::nil(),
            results: entries
                .iter()
                .map(|(name, granted)| (name.to_string(), *granted))
                .collect(),
            published_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_splits_granted_and_denied() {
        let snapshot = snapshot(&[("gps_setting", false), ("camera", true), ("storage", true)]);

        assert_eq!(snapshot.granted(), vec!["camera", "storage"]);
        assert_eq!(snapshot.denied(), vec!["gps_setting"]);
        assert!(!snapshot.all_granted());
    }

    #[test]
    fn empty_snapshot_counts_as_all_granted() {
        assert!(snapshot(&[]).all_granted());
    }

    #[test]
    fn custom_resolved_uses_tagged_layout() {
        let payload = EventPayload::CustomResolved {
            name: "overlay_draw".to_string(),
            granted: false,
            resolution: Resolution::LaunchFailed,
        };
        let encoded = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(
            encoded,
            json!({
                "type": "custom_resolved",
                "payload": {
                    "name": "overlay_draw",
                    "granted": false,
                    "resolution": "launch_failed"
                }
            })
        );
    }
}
