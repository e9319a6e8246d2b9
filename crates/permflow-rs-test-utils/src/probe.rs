use permflow_rs_core::PermissionProbe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Shared on/off probe; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct SwitchProbe {
    granted: Arc<AtomicBool>,
    checks: Arc<AtomicUsize>,
}

impl SwitchProbe {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: Arc::new(AtomicBool::new(granted)),
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    /// Number of times the coordinator asked this probe.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl PermissionProbe for SwitchProbe {
    fn is_granted(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.get()
    }
}
