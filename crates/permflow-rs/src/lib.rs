//! Public SDK surface for permflow.
//!
//! This crate re-exports the coordinator, configuration and protocol crates
//! and provides a small logging helper for hosts and demos.

/// Re-export for convenience.
pub use permflow_rs_config as config;
pub use permflow_rs_core as core;
/// Re-export for convenience.
pub use permflow_rs_protocol as protocol;

pub use permflow_rs_core::{
    CustomPermission, CycleHandle, PermissionCoordinator, PermissionResultMap, ResultSnapshot,
};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// Without the feature this only records that logging was left to the host.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
    #[cfg(not(feature = "logging"))]
    {
        log::trace!("permflow logging left to the host");
    }
}
