use parking_lot::Mutex;
use permflow_rs_core::{BulkPermissionRequester, BulkReply, ManifestProbe};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// How the fake host answers a batched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReplyMode {
    #[default]
    Answer,
    /// Drop the reply without answering.
    Drop,
    /// Keep the reply alive and never answer.
    Hold,
}

#[derive(Default)]
struct HostState {
    granted: HashMap<String, bool>,
    /// What the simulated user picks in the dialog, per name.
    choices: HashMap<String, bool>,
    omitted: HashSet<String>,
    extra: Vec<(String, bool)>,
    requests: Vec<Vec<String>>,
    held: Vec<BulkReply>,
}

/// Simulated platform: manifest probe plus a batched dialog that answers
/// after a fixed latency.
#[derive(Clone, Default)]
pub struct FakeManifestHost {
    state: Arc<Mutex<HostState>>,
    latency: Duration,
    mode: ReplyMode,
}

impl FakeManifestHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current platform state for `name`; unknown names are denied.
    pub fn with_granted(self, name: impl Into<String>, granted: bool) -> Self {
        self.state.lock().granted.insert(name.into(), granted);
        self
    }

    /// Answer the dialog for `name` with `granted`; unscripted names keep
    /// their current state.
    pub fn with_choice(self, name: impl Into<String>, granted: bool) -> Self {
        self.state.lock().choices.insert(name.into(), granted);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Leave `name` out of the reply map (its state is still updated).
    pub fn omitting(self, name: impl Into<String>) -> Self {
        self.state.lock().omitted.insert(name.into());
        self
    }

    /// Add an entry the coordinator never asked for.
    pub fn with_extra_answer(self, name: impl Into<String>, granted: bool) -> Self {
        self.state.lock().extra.push((name.into(), granted));
        self
    }

    pub fn dropping_replies(mut self) -> Self {
        self.mode = ReplyMode::Drop;
        self
    }

    pub fn holding_replies(mut self) -> Self {
        self.mode = ReplyMode::Hold;
        self
    }

    pub fn set_granted(&self, name: &str, granted: bool) {
        self.state.lock().granted.insert(name.to_string(), granted);
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.state.lock().requests.clone()
    }
}

impl ManifestProbe for FakeManifestHost {
    fn is_granted(&self, name: &str) -> bool {
        self.state.lock().granted.get(name).copied().unwrap_or(false)
    }
}

impl BulkPermissionRequester for FakeManifestHost {
    fn request(&self, names: &[String], reply: BulkReply) {
        let mut state = self.state.lock();
        state.requests.push(names.to_vec());
        match self.mode {
            ReplyMode::Drop => return,
            ReplyMode::Hold => {
                state.held.push(reply);
                return;
            }
            ReplyMode::Answer => {}
        }
        drop(state);

        let names = names.to_vec();
        let state = self.state.clone();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let answers = {
                let mut state = state.lock();
                let mut answers = Vec::new();
                for name in &names {
                    let granted = match state.choices.get(name) {
                        Some(choice) => *choice,
                        None => state.granted.get(name).copied().unwrap_or(false),
                    };
                    state.granted.insert(name.clone(), granted);
                    if !state.omitted.contains(name) {
                        answers.push((name.clone(), granted));
                    }
                }
                answers.extend(state.extra.iter().cloned());
                answers
            };
            reply.resolve(answers);
        });
    }
}
