//! Per-cycle bookkeeping owned by the running cycle task.

use log::debug;
use permflow_rs_protocol::{CycleId, CycleState, PermissionResultMap};
use std::time::Duration;
use tokio::time::Instant;

/// State of one in-flight request cycle.
#[derive(Debug)]
pub(crate) struct RequestSession {
    cycle_id: CycleId,
    state: CycleState,
    results: PermissionResultMap,
    /// Custom permission currently waiting on its launch outcome.
    awaiting_launch: Option<String>,
    batch_started: Option<Instant>,
    batch_round_trip: Option<Duration>,
}

impl RequestSession {
    pub(crate) fn new(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            state: CycleState::Idle,
            results: PermissionResultMap::new(),
            awaiting_launch: None,
            batch_started: None,
            batch_round_trip: None,
        }
    }

    pub(crate) fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    pub(crate) fn state(&self) -> CycleState {
        self.state
    }

    pub(crate) fn transition(&mut self, state: CycleState) {
        debug!(
            "cycle state change (cycle_id={}, from={:?}, to={:?})",
            self.cycle_id, self.state, state
        );
        self.state = state;
    }

    /// Record the final value for a permission; first write wins.
    pub(crate) fn record(&mut self, name: &str, granted: bool) {
        if self.results.contains_key(name) {
            debug!(
                "ignoring repeated result (cycle_id={}, name={})",
                self.cycle_id, name
            );
            return;
        }
        self.results.insert(name.to_string(), granted);
    }

    pub(crate) fn results(&self) -> &PermissionResultMap {
        &self.results
    }

    pub(crate) fn into_results(self) -> PermissionResultMap {
        self.results
    }

    pub(crate) fn begin_launch(&mut self, name: &str) {
        self.awaiting_launch = Some(name.to_string());
        self.transition(CycleState::CustomAwaitingLaunch);
    }

    pub(crate) fn end_launch(&mut self) -> Option<String> {
        self.transition(CycleState::CustomIterating);
        self.awaiting_launch.take()
    }

    pub(crate) fn awaiting_launch(&self) -> Option<&str> {
        self.awaiting_launch.as_deref()
    }

    pub(crate) fn begin_batch(&mut self, now: Instant) {
        self.batch_started = Some(now);
        self.batch_round_trip = None;
        self.transition(CycleState::BatchPending);
    }

    /// Close the batch and return the measured round trip.
    pub(crate) fn end_batch(&mut self, now: Instant) -> Duration {
        let round_trip = self
            .batch_started
            .take()
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        self.batch_round_trip = Some(round_trip);
        round_trip
    }

    pub(crate) fn batch_round_trip(&self) -> Option<Duration> {
        self.batch_round_trip
    }
}
