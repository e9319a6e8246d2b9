use crate::probe::SwitchProbe;
use parking_lot::Mutex;
use permflow_rs_core::{
    GuideReply, LaunchError, LaunchOutcome, LaunchReply, PermissionGuide, PermissionLauncher,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum GuideScript<P> {
    Proceed(P),
    Decline,
    Drop,
}

/// Guide that answers every presentation the same way.
#[derive(Debug, Clone)]
pub struct ScriptedGuide<P> {
    script: GuideScript<P>,
    presented: Arc<AtomicUsize>,
}

impl<P> ScriptedGuide<P> {
    fn scripted(script: GuideScript<P>) -> Self {
        Self {
            script,
            presented: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn proceed(payload: P) -> Self {
        Self::scripted(GuideScript::Proceed(payload))
    }

    pub fn decline() -> Self {
        Self::scripted(GuideScript::Decline)
    }

    /// Drop the reply without answering.
    pub fn dropping() -> Self {
        Self::scripted(GuideScript::Drop)
    }

    pub fn presented(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }
}

impl<P> PermissionGuide<P> for ScriptedGuide<P>
where
    P: Clone + Send + Sync,
{
    fn present(&self, reply: GuideReply<P>) {
        self.presented.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            GuideScript::Proceed(payload) => reply.proceed(payload.clone()),
            GuideScript::Decline => reply.decline(),
            GuideScript::Drop => drop(reply),
        }
    }
}

/// Pending/total launch counters, shareable between launchers.
#[derive(Debug, Clone, Default)]
pub struct LaunchTracker {
    pending: Arc<AtomicUsize>,
    max_pending: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
}

impl LaunchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pending.fetch_max(pending, Ordering::SeqCst);
    }

    fn end(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Highest number of launches that were pending at the same time.
    pub fn max_pending(&self) -> usize {
        self.max_pending.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

/// Launcher that records payloads and completes after a delay, optionally
/// granting a probe before it reports back.
#[derive(Debug, Clone)]
pub struct RecordingLauncher<P> {
    payloads: Arc<Mutex<Vec<P>>>,
    tracker: LaunchTracker,
    delay: Duration,
    grants: Option<SwitchProbe>,
    outcome: LaunchOutcome,
    drop_reply: bool,
}

impl<P> Default for RecordingLauncher<P> {
    fn default() -> Self {
        Self {
            payloads: Arc::new(Mutex::new(Vec::new())),
            tracker: LaunchTracker::new(),
            delay: Duration::ZERO,
            grants: None,
            outcome: LaunchOutcome::ok(),
            drop_reply: false,
        }
    }
}

impl<P: Clone> RecordingLauncher<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(mut self, tracker: LaunchTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Grant `probe` when the flow completes.
    pub fn granting(mut self, probe: SwitchProbe) -> Self {
        self.grants = Some(probe);
        self
    }

    pub fn with_outcome(mut self, outcome: LaunchOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Finish the flow without ever answering the reply.
    pub fn dropping_reply(mut self) -> Self {
        self.drop_reply = true;
        self
    }

    pub fn payloads(&self) -> Vec<P> {
        self.payloads.lock().clone()
    }

    pub fn tracker(&self) -> &LaunchTracker {
        &self.tracker
    }
}

impl<P> PermissionLauncher<P> for RecordingLauncher<P>
where
    P: Clone + Send + 'static,
{
    fn launch(&self, payload: P, reply: LaunchReply) -> Result<(), LaunchError> {
        self.payloads.lock().push(payload);
        self.tracker.begin();
        let tracker = self.tracker.clone();
        let grants = self.grants.clone();
        let outcome = self.outcome.clone();
        let delay = self.delay;
        let drop_reply = self.drop_reply;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(probe) = grants {
                probe.set(true);
            }
            tracker.end();
            if drop_reply {
                drop(reply);
            } else {
                reply.complete(outcome);
            }
        });
        Ok(())
    }
}

/// Launcher that refuses to start, optionally changing a probe first.
#[derive(Debug, Clone, Default)]
pub struct FailingLauncher {
    attempts: Arc<AtomicUsize>,
    sets: Option<(SwitchProbe, bool)>,
}

impl FailingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `probe` to `granted` before failing.
    pub fn setting(mut self, probe: SwitchProbe, granted: bool) -> Self {
        self.sets = Some((probe, granted));
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<P> PermissionLauncher<P> for FailingLauncher {
    fn launch(&self, _payload: P, _reply: LaunchReply) -> Result<(), LaunchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some((probe, granted)) = &self.sets {
            probe.set(*granted);
        }
        Err(LaunchError::Failed("activity not found".to_string()))
    }
}
