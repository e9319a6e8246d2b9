//! Configuration schema for permflow.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root config for a permflow host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PermflowConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl PermflowConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> PermflowConfigBuilder {
        PermflowConfigBuilder::new()
    }
}

/// Builder for assembling a `PermflowConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct PermflowConfigBuilder {
    config: PermflowConfig,
}

impl PermflowConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: PermflowConfig::default(),
        }
    }

    /// Replace the coordinator configuration.
    pub fn coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.config.coordinator = coordinator;
        self
    }

    /// Replace the declared permissions.
    pub fn permissions(mut self, permissions: PermissionsConfig) -> Self {
        self.config.permissions = permissions;
        self
    }

    /// Finalize and return the built `PermflowConfig`.
    pub fn build(self) -> PermflowConfig {
        self.config
    }
}

/// Tuning for the permission coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Batch round trip above which the host dialog is assumed to have shown.
    #[serde(default = "default_guidance_threshold_ms")]
    pub guidance_threshold_ms: u64,
    #[serde(default)]
    pub reentry: ReentryPolicy,
    /// Upper bound for each awaited host callback; unset waits forever.
    #[serde(default)]
    pub await_timeout_ms: Option<u64>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl CoordinatorConfig {
    pub fn guidance_threshold(&self) -> Duration {
        Duration::from_millis(self.guidance_threshold_ms)
    }

    pub fn await_timeout(&self) -> Option<Duration> {
        self.await_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            guidance_threshold_ms: default_guidance_threshold_ms(),
            reentry: ReentryPolicy::default(),
            await_timeout_ms: None,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Default batch round trip threshold in milliseconds.
fn default_guidance_threshold_ms() -> u64 {
    300
}

/// Default broadcast buffer size for coordinator events.
fn default_event_buffer() -> usize {
    64
}

/// What to do when a cycle is requested while another one is running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReentryPolicy {
    /// Refuse the new request and keep the running cycle.
    #[default]
    Reject,
    /// Abort the running cycle and start a new one.
    CancelPrevious,
}

/// Permissions declared through config.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PermissionsConfig {
    /// Manifest permission names requested in one batched host call.
    #[serde(default)]
    pub manifest: Vec<String>,
}
