//! Sequential permission negotiation.
//!
//! A request cycle asks the host for every manifest permission in one
//! batched call, then walks the custom permissions in declaration order,
//! one guide/launch at a time, and finally publishes one result per declared
//! permission to a replay-1 stream.

use crate::capability::{BulkPermissionRequester, BulkReply, LaunchReply, ManifestProbe};
use crate::error::{CoordinatorError, CycleError};
use crate::permission::CustomPermission;
use crate::session::RequestSession;
use crate::stream::ResultStream;
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use permflow_rs_config::{CoordinatorConfig, PermflowConfig, ReentryPolicy};
use permflow_rs_protocol::{
    CycleId, CycleState, EventMsg, EventPayload, EventSink, LaunchOutcome, PermissionKind,
    PermissionResultMap, Resolution, ResultSnapshot,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use uuid::Uuid;

/// Handle for one spawned request cycle.
pub struct CycleHandle {
    /// Id of the cycle, as seen in events and snapshots.
    pub cycle_id: CycleId,
    handle: JoinHandle<PermissionResultMap>,
}

impl CycleHandle {
    /// Await the published result map of this cycle.
    pub async fn finish(self) -> Result<PermissionResultMap, CycleError> {
        match self.handle.await {
            Ok(results) => Ok(results),
            Err(err) if err.is_cancelled() => Err(CycleError::Cancelled(self.cycle_id)),
            Err(err) => Err(CycleError::Failed(err.to_string())),
        }
    }

    /// Whether the cycle task has stopped (published or cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct ActiveCycle {
    cycle_id: CycleId,
    abort: AbortHandle,
}

enum LaunchWait {
    Completed(LaunchOutcome),
    Dropped,
    TimedOut(Duration),
}

/// Launch lock together with the host reply it is held for.
///
/// Dropping it before the host answered (timeout, aborted cycle) hands both
/// to a background waiter, so the lock stays held until the host flow ends.
struct OpenLaunch {
    gate: Option<OwnedMutexGuard<()>>,
    outcome: Option<oneshot::Receiver<LaunchOutcome>>,
}

impl OpenLaunch {
    fn new(gate: OwnedMutexGuard<()>, outcome: oneshot::Receiver<LaunchOutcome>) -> Self {
        Self {
            gate: Some(gate),
            outcome: Some(outcome),
        }
    }

    async fn wait(&mut self, limit: Option<Duration>) -> LaunchWait {
        let Some(receiver) = self.outcome.as_mut() else {
            return LaunchWait::Dropped;
        };
        let answer = match limit {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(answer) => answer,
                Err(_) => return LaunchWait::TimedOut(limit),
            },
            None => receiver.await,
        };
        self.outcome = None;
        self.gate = None;
        match answer {
            Ok(outcome) => LaunchWait::Completed(outcome),
            Err(_) => LaunchWait::Dropped,
        }
    }
}

impl Drop for OpenLaunch {
    fn drop(&mut self) {
        let (Some(gate), Some(outcome)) = (self.gate.take(), self.outcome.take()) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("launch still open; holding launch lock until the host answers");
                runtime.spawn(async move {
                    let _ = outcome.await;
                    drop(gate);
                });
            }
            Err(_) => drop(gate),
        }
    }
}

struct Inner {
    config: CoordinatorConfig,
    manifest: Vec<String>,
    custom: Vec<CustomPermission>,
    probe: Arc<dyn ManifestProbe>,
    requester: Arc<dyn BulkPermissionRequester>,
    /// Held from launcher start until the host answers or drops the reply,
    /// and once before publish.
    launch_gate: Arc<tokio::sync::Mutex<()>>,
    snapshots: watch::Sender<Option<ResultSnapshot>>,
    last_round_trip: Mutex<Option<Duration>>,
    active: Mutex<Option<ActiveCycle>>,
    event_sink: RwLock<Option<Arc<dyn EventSink>>>,
}

/// Drives manifest and custom permissions to a complete result map.
#[derive(Clone)]
pub struct PermissionCoordinator {
    inner: Arc<Inner>,
}

impl PermissionCoordinator {
    /// Start building a coordinator around the host's manifest capabilities.
    pub fn builder(
        probe: Arc<dyn ManifestProbe>,
        requester: Arc<dyn BulkPermissionRequester>,
    ) -> PermissionCoordinatorBuilder {
        PermissionCoordinatorBuilder::new(probe, requester)
    }

    /// Start a request cycle.
    ///
    /// Fails only when the cycle cannot start: another cycle is running and
    /// the re-entry policy rejects it, or no tokio runtime is available.
    pub fn request_permission(&self) -> Result<CycleHandle, CoordinatorError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;
        // Events run user code; emit only after the active slot is unlocked.
        let mut cancelled = None;
        let cycle_id = Uuid::new_v4();
        let handle = {
            let mut active = self.inner.active.lock();
            if let Some(current) = active.take() {
                if current.abort.is_finished() {
                    debug!("clearing finished cycle (cycle_id={})", current.cycle_id);
                } else {
                    match self.inner.config.reentry {
                        ReentryPolicy::Reject => {
                            let running = current.cycle_id;
                            *active = Some(current);
                            drop(active);
                            warn!(
                                "request rejected; cycle already in progress (cycle_id={})",
                                running
                            );
                            self.inner
                                .emit(running, EventPayload::ReentryRejected { active: running });
                            return Err(CoordinatorError::CycleInProgress(running));
                        }
                        ReentryPolicy::CancelPrevious => {
                            info!("cancelling previous cycle (cycle_id={})", current.cycle_id);
                            current.abort.abort();
                            cancelled = Some(current.cycle_id);
                        }
                    }
                }
            }

            let inner = self.inner.clone();
            let handle = runtime.spawn(async move {
                let results = inner.run_cycle(cycle_id).await;
                inner.clear_active(cycle_id);
                results
            });
            *active = Some(ActiveCycle {
                cycle_id,
                abort: handle.abort_handle(),
            });
            handle
        };

        if let Some(previous) = cancelled {
            self.inner.emit(
                previous,
                EventPayload::CycleCancelled {
                    reason: "superseded by a new request".to_string(),
                },
            );
        }
        Ok(CycleHandle { cycle_id, handle })
    }

    /// Heuristic: whether the host's batch permission dialog was probably
    /// shown to the user during the last cycle.
    ///
    /// Some platforms stop showing the dialog after repeated denials and
    /// answer almost instantly; a real prompt takes noticeably longer. Only
    /// the batch round trip is compared against the configured threshold,
    /// so very fast or very slow devices can be misjudged.
    pub fn is_guidance_likely_shown(&self) -> bool {
        let threshold = self.inner.config.guidance_threshold();
        self.inner
            .last_round_trip
            .lock()
            .is_some_and(|round_trip| round_trip > threshold)
    }

    /// Round trip of the last batched manifest request, if one was issued.
    pub fn last_batch_round_trip(&self) -> Option<Duration> {
        *self.inner.last_round_trip.lock()
    }

    /// Declared permissions that are currently denied, checked live.
    pub fn list_denied(&self) -> Vec<String> {
        self.inner.list_by_state(false)
    }

    /// Declared permissions that are currently granted, checked live.
    pub fn list_granted(&self) -> Vec<String> {
        self.inner.list_by_state(true)
    }

    /// Subscribe to published snapshots; replays the latest one.
    pub fn subscribe(&self) -> ResultStream {
        ResultStream::new(self.inner.snapshots.subscribe())
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> Option<ResultSnapshot> {
        self.inner.snapshots.borrow().clone()
    }

    /// Id of the running cycle, if any.
    pub fn active_cycle(&self) -> Option<CycleId> {
        self.inner
            .active
            .lock()
            .as_ref()
            .filter(|active| !active.abort.is_finished())
            .map(|active| active.cycle_id)
    }

    /// All declared permissions with their kind, in declaration order.
    pub fn permission_names(&self) -> Vec<(String, PermissionKind)> {
        self.inner
            .manifest
            .iter()
            .map(|name| (name.clone(), PermissionKind::Manifest))
            .chain(
                self.inner
                    .custom
                    .iter()
                    .map(|permission| (permission.name().to_string(), PermissionKind::Custom)),
            )
            .collect()
    }

    pub fn manifest_names(&self) -> &[String] {
        &self.inner.manifest
    }

    pub fn custom_names(&self) -> Vec<&str> {
        self.inner
            .custom
            .iter()
            .map(|permission| permission.name())
            .collect()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Attach or replace the event sink.
    pub fn set_event_sink(&self, sink: Option<Arc<dyn EventSink>>) {
        *self.inner.event_sink.write() = sink;
    }
}

impl Inner {
    async fn run_cycle(&self, cycle_id: CycleId) -> PermissionResultMap {
        let mut session = RequestSession::new(cycle_id);
        *self.last_round_trip.lock() = None;

        let denied_manifest = self
            .manifest
            .iter()
            .filter(|name| !self.probe.is_granted(name))
            .count();
        info!(
            "request cycle started (cycle_id={}, manifest={}, denied={}, custom={})",
            cycle_id,
            self.manifest.len(),
            denied_manifest,
            self.custom.len()
        );
        self.emit(cycle_id, EventPayload::CycleStarted { denied_manifest });

        if denied_manifest == 0 {
            for name in &self.manifest {
                session.record(name, true);
            }
            self.emit(
                cycle_id,
                EventPayload::BatchResolved {
                    results: session.results().clone(),
                    round_trip_ms: None,
                },
            );
        } else {
            self.request_batch(&mut session).await;
        }

        self.change_state(&mut session, CycleState::CustomIterating, None);
        for permission in &self.custom {
            let (granted, resolution) = self.resolve_custom(&mut session, permission).await;
            debug!(
                "custom permission resolved (cycle_id={}, name={}, granted={}, resolution={:?})",
                cycle_id,
                permission.name(),
                granted,
                resolution
            );
            session.record(permission.name(), granted);
            self.emit(
                cycle_id,
                EventPayload::CustomResolved {
                    name: permission.name().to_string(),
                    granted,
                    resolution,
                },
            );
        }

        // Publish only once no launch is outstanding.
        let _gate = self.launch_gate.lock().await;
        self.change_state(&mut session, CycleState::Published, None);
        let results = session.into_results();
        self.snapshots.send_replace(Some(ResultSnapshot {
            cycle_id,
            results: results.clone(),
            published_at: Utc::now(),
        }));
        info!(
            "request cycle published (cycle_id={}, entries={})",
            cycle_id,
            results.len()
        );
        self.emit(
            cycle_id,
            EventPayload::CyclePublished {
                results: results.clone(),
            },
        );
        results
    }

    async fn request_batch(&self, session: &mut RequestSession) {
        let cycle_id = session.cycle_id();
        session.begin_batch(Instant::now());
        self.emit(
            cycle_id,
            EventPayload::StateChanged {
                state: session.state(),
                permission: None,
            },
        );
        self.emit(
            cycle_id,
            EventPayload::BatchRequested {
                names: self.manifest.clone(),
            },
        );

        let (reply, receiver) = BulkReply::channel();
        self.requester.request(&self.manifest, reply);
        let answered = self.await_reply(cycle_id, receiver, "batch request").await;
        let round_trip = session.end_batch(Instant::now());
        *self.last_round_trip.lock() = session.batch_round_trip();
        debug!(
            "batch request answered (cycle_id={}, round_trip_ms={})",
            cycle_id,
            round_trip.as_millis()
        );

        let answered = answered.unwrap_or_default();
        for name in &self.manifest {
            let granted = match answered.get(name) {
                Some(granted) => *granted,
                None => {
                    debug!(
                        "batch answer missing permission; probing (cycle_id={}, name={})",
                        cycle_id, name
                    );
                    self.probe.is_granted(name)
                }
            };
            session.record(name, granted);
        }
        let batch_results = self
            .manifest
            .iter()
            .filter_map(|name| {
                session
                    .results()
                    .get(name)
                    .map(|granted| (name.clone(), *granted))
            })
            .collect();
        self.emit(
            cycle_id,
            EventPayload::BatchResolved {
                results: batch_results,
                round_trip_ms: Some(u64::try_from(round_trip.as_millis()).unwrap_or(u64::MAX)),
            },
        );
    }

    async fn resolve_custom(
        &self,
        session: &mut RequestSession,
        permission: &CustomPermission,
    ) -> (bool, Resolution) {
        if permission.is_granted() {
            return (true, Resolution::AlreadyGranted);
        }
        let Some(flow) = permission.flow() else {
            return (false, Resolution::MissingGuide);
        };

        let cycle_id = session.cycle_id();
        self.change_state(
            session,
            CycleState::CustomAwaitingGuide,
            Some(permission.name()),
        );
        let (answer, receiver) = oneshot::channel();
        flow.present(answer);
        let pending = self
            .await_reply(cycle_id, receiver, "guide")
            .await
            .flatten();
        let Some(pending) = pending else {
            self.change_state(session, CycleState::CustomIterating, None);
            return (false, Resolution::Declined);
        };

        let gate = self.launch_gate.clone().lock_owned().await;
        session.begin_launch(permission.name());
        self.emit(
            cycle_id,
            EventPayload::StateChanged {
                state: session.state(),
                permission: session.awaiting_launch().map(str::to_string),
            },
        );
        let (reply, outcome) = LaunchReply::channel();
        match pending(reply) {
            Ok(()) => {
                let mut launch = OpenLaunch::new(gate, outcome);
                match launch.wait(self.config.await_timeout()).await {
                    LaunchWait::Completed(outcome) => debug!(
                        "launch outcome (cycle_id={}, name={}, outcome={:?})",
                        cycle_id,
                        permission.name(),
                        outcome
                    ),
                    LaunchWait::Dropped => warn!(
                        "host launch dropped without answering (cycle_id={}, name={})",
                        cycle_id,
                        permission.name()
                    ),
                    LaunchWait::TimedOut(limit) => warn!(
                        "host launch timed out (cycle_id={}, name={}, timeout_ms={})",
                        cycle_id,
                        permission.name(),
                        limit.as_millis()
                    ),
                }
                drop(launch);
                session.end_launch();
                (permission.is_granted(), Resolution::Launched)
            }
            Err(err) => {
                drop(gate);
                session.end_launch();
                warn!(
                    "launch failed to start; probing instead (cycle_id={}, name={}, err={})",
                    cycle_id,
                    permission.name(),
                    err
                );
                (permission.is_granted(), Resolution::LaunchFailed)
            }
        }
    }

    /// Await a host answer; `None` when the host dropped it or it timed out.
    async fn await_reply<T>(
        &self,
        cycle_id: CycleId,
        receiver: oneshot::Receiver<T>,
        what: &str,
    ) -> Option<T> {
        let answer = match self.config.await_timeout() {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(
                        "host {} timed out (cycle_id={}, timeout_ms={})",
                        what,
                        cycle_id,
                        limit.as_millis()
                    );
                    return None;
                }
            },
            None => receiver.await,
        };
        match answer {
            Ok(answer) => Some(answer),
            Err(_) => {
                warn!(
                    "host {} dropped without answering (cycle_id={})",
                    what, cycle_id
                );
                None
            }
        }
    }

    fn change_state(
        &self,
        session: &mut RequestSession,
        state: CycleState,
        permission: Option<&str>,
    ) {
        if session.state() == state {
            return;
        }
        session.transition(state);
        self.emit(
            session.cycle_id(),
            EventPayload::StateChanged {
                state,
                permission: permission.map(str::to_string),
            },
        );
    }

    fn list_by_state(&self, granted: bool) -> Vec<String> {
        self.manifest
            .iter()
            .filter(|name| self.probe.is_granted(name) == granted)
            .cloned()
            .chain(
                self.custom
                    .iter()
                    .filter(|permission| permission.is_granted() == granted)
                    .map(|permission| permission.name().to_string()),
            )
            .collect()
    }

    fn clear_active(&self, cycle_id: CycleId) {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|current| current.cycle_id == cycle_id)
        {
            *active = None;
        }
    }

    fn emit(&self, cycle_id: CycleId, payload: EventPayload) {
        let sink = self.event_sink.read().clone();
        if let Some(sink) = sink {
            sink.emit(EventMsg::new(cycle_id, payload));
        }
    }
}

/// Builder for a `PermissionCoordinator`.
pub struct PermissionCoordinatorBuilder {
    probe: Arc<dyn ManifestProbe>,
    requester: Arc<dyn BulkPermissionRequester>,
    config: CoordinatorConfig,
    manifest: Vec<String>,
    custom: Vec<CustomPermission>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl PermissionCoordinatorBuilder {
    fn new(probe: Arc<dyn ManifestProbe>, requester: Arc<dyn BulkPermissionRequester>) -> Self {
        Self {
            probe,
            requester,
            config: CoordinatorConfig::default(),
            manifest: Vec::new(),
            custom: Vec::new(),
            event_sink: None,
        }
    }

    /// Apply coordinator settings and the manifest permissions from config.
    pub fn from_config(mut self, config: &PermflowConfig) -> Self {
        self.config = config.coordinator.clone();
        self.manifest
            .extend(config.permissions.manifest.iter().cloned());
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare manifest permissions, in request order.
    pub fn manifest<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare a custom permission; custom permissions resolve in
    /// declaration order.
    pub fn custom(mut self, permission: CustomPermission) -> Self {
        self.custom.push(permission);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Validate names and settings and build the coordinator.
    pub fn build(self) -> Result<PermissionCoordinator, CoordinatorError> {
        if self.config.guidance_threshold_ms == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "guidance_threshold_ms must be greater than zero".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let names = self
            .manifest
            .iter()
            .map(String::as_str)
            .chain(self.custom.iter().map(CustomPermission::name));
        for name in names {
            if name.trim().is_empty() {
                return Err(CoordinatorError::EmptyPermissionName);
            }
            if !seen.insert(name) {
                return Err(CoordinatorError::DuplicatePermission(name.to_string()));
            }
        }

        debug!(
            "coordinator built (manifest={}, custom={}, reentry={:?})",
            self.manifest.len(),
            self.custom.len(),
            self.config.reentry
        );
        let (snapshots, _) = watch::channel(None);
        Ok(PermissionCoordinator {
            inner: Arc::new(Inner {
                config: self.config,
                manifest: self.manifest,
                custom: self.custom,
                probe: self.probe,
                requester: self.requester,
                launch_gate: Arc::new(tokio::sync::Mutex::new(())),
                snapshots,
                last_round_trip: Mutex::new(None),
                active: Mutex::new(None),
                event_sink: RwLock::new(self.event_sink),
            }),
        })
    }
}
