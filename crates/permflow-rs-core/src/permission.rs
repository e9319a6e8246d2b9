//! Declared permissions.

use crate::capability::{
    GuideReply, LaunchError, LaunchReply, PermissionGuide, PermissionLauncher, PermissionProbe,
};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Launch prepared from a guide payload, waiting for the launch lock.
pub(crate) type PendingLaunch = Box<dyn FnOnce(LaunchReply) -> Result<(), LaunchError> + Send>;

/// Guide plus launcher with the payload type erased.
pub(crate) trait GuidedFlow: Send + Sync {
    /// Present the guide; `answer` receives the prepared launch, or `None`
    /// when the user declined.
    fn present(&self, answer: oneshot::Sender<Option<PendingLaunch>>);
}

struct TypedFlow<P> {
    guide: Arc<dyn PermissionGuide<P>>,
    launcher: Option<Arc<dyn PermissionLauncher<P>>>,
}

impl<P: Send + 'static> GuidedFlow for TypedFlow<P> {
    fn present(&self, answer: oneshot::Sender<Option<PendingLaunch>>) {
        let launcher = self.launcher.clone();
        let reply = GuideReply::new(move |payload: Option<P>| {
            let pending = payload.map(|payload| -> PendingLaunch {
                Box::new(move |reply: LaunchReply| match launcher {
                    Some(launcher) => launcher.launch(payload, reply),
                    None => Err(LaunchError::Unavailable),
                })
            });
            let _ = answer.send(pending);
        });
        self.guide.present(reply);
    }
}

/// Application-defined permission with its own probe, guide and launcher.
#[derive(Clone)]
pub struct CustomPermission {
    name: String,
    probe: Arc<dyn PermissionProbe>,
    flow: Option<Arc<dyn GuidedFlow>>,
}

impl CustomPermission {
    /// Permission that is only checked; it has no guide and is recorded as
    /// declined unless the probe reports it satisfied.
    pub fn new(name: impl Into<String>, probe: impl PermissionProbe + 'static) -> Self {
        Self {
            name: name.into(),
            probe: Arc::new(probe),
            flow: None,
        }
    }

    /// Attach a guide and the launcher that consumes its payload.
    pub fn with_flow<P, G, L>(mut self, guide: G, launcher: L) -> Self
    where
        P: Send + 'static,
        G: PermissionGuide<P> + 'static,
        L: PermissionLauncher<P> + 'static,
    {
        self.flow = Some(Arc::new(TypedFlow {
            guide: Arc::new(guide),
            launcher: Some(Arc::new(launcher)),
        }));
        self
    }

    /// Attach a guide without a launcher; a payload from the guide then
    /// resolves the permission from its probe.
    pub fn with_guide<P, G>(mut self, guide: G) -> Self
    where
        P: Send + 'static,
        G: PermissionGuide<P> + 'static,
    {
        self.flow = Some(Arc::new(TypedFlow {
            guide: Arc::new(guide),
            launcher: None,
        }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-check the probe.
    pub fn is_granted(&self) -> bool {
        self.probe.is_granted()
    }

    pub fn has_guide(&self) -> bool {
        self.flow.is_some()
    }

    pub(crate) fn flow(&self) -> Option<&Arc<dyn GuidedFlow>> {
        self.flow.as_ref()
    }
}

impl std::fmt::Debug for CustomPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomPermission")
            .field("name", &self.name)
            .field("has_guide", &self.flow.is_some())
            .finish()
    }
}
