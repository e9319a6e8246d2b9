//! Host capabilities the coordinator calls into.
//!
//! Every asynchronous host interaction answers through a single-shot reply
//! object. Replies are consumed when resolved, so a host can answer at most
//! once; dropping a reply without answering counts as no answer.

use permflow_rs_protocol::LaunchOutcome;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;

/// Live state of a manifest permission.
pub trait ManifestProbe: Send + Sync {
    /// Whether the named permission is currently granted. Must not block.
    fn is_granted(&self, name: &str) -> bool;
}

impl<F> ManifestProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_granted(&self, name: &str) -> bool {
        self(name)
    }
}

/// Host call that requests every manifest permission in one interaction.
pub trait BulkPermissionRequester: Send + Sync {
    /// Start the request; answer through `reply` once the host calls back.
    fn request(&self, names: &[String], reply: BulkReply);
}

/// Live state of a custom permission.
pub trait PermissionProbe: Send + Sync {
    fn is_granted(&self) -> bool;
}

impl<F> PermissionProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_granted(&self) -> bool {
        self()
    }
}

/// Guidance shown before a custom permission is requested.
pub trait PermissionGuide<P>: Send + Sync {
    /// Present the guidance; answer with a launch payload or decline.
    fn present(&self, reply: GuideReply<P>);
}

impl<P, F> PermissionGuide<P> for F
where
    F: Fn(GuideReply<P>) + Send + Sync,
{
    fn present(&self, reply: GuideReply<P>) {
        self(reply)
    }
}

/// Host flow that resolves a custom permission (settings screen, intent...).
pub trait PermissionLauncher<P>: Send + Sync {
    /// Start the flow. Returning an error means nothing was started and
    /// `reply` will never be answered.
    fn launch(&self, payload: P, reply: LaunchReply) -> Result<(), LaunchError>;
}

impl<P, F> PermissionLauncher<P> for F
where
    F: Fn(P, LaunchReply) -> Result<(), LaunchError> + Send + Sync,
{
    fn launch(&self, payload: P, reply: LaunchReply) -> Result<(), LaunchError> {
        self(payload, reply)
    }
}

/// Reasons a launcher could not start its flow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// No launcher is configured for the permission.
    #[error("no launcher configured")]
    Unavailable,
    /// The host refused to start the flow (e.g. malformed payload).
    #[error("launch failed: {0}")]
    Failed(String),
}

/// Single-shot answer to a batched manifest request.
#[derive(Debug)]
pub struct BulkReply {
    sender: oneshot::Sender<HashMap<String, bool>>,
}

impl BulkReply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<HashMap<String, bool>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Deliver granted state per permission name.
    pub fn resolve<I, S>(self, results: I)
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let results = results
            .into_iter()
            .map(|(name, granted)| (name.into(), granted))
            .collect();
        let _ = self.sender.send(results);
    }
}

/// Single-shot answer from a guide.
pub struct GuideReply<P> {
    deliver: Box<dyn FnOnce(Option<P>) + Send>,
}

impl<P> GuideReply<P> {
    pub(crate) fn new(deliver: impl FnOnce(Option<P>) + Send + 'static) -> Self {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// Continue with a launch using `payload`.
    pub fn proceed(self, payload: P) {
        self.resolve(Some(payload));
    }

    /// User closed or declined the guidance.
    pub fn decline(self) {
        self.resolve(None);
    }

    pub fn resolve(self, payload: Option<P>) {
        (self.deliver)(payload);
    }
}

impl<P> std::fmt::Debug for GuideReply<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuideReply").finish_non_exhaustive()
    }
}

/// Single-shot answer from a launched host flow.
#[derive(Debug)]
pub struct LaunchReply {
    sender: oneshot::Sender<LaunchOutcome>,
}

impl LaunchReply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<LaunchOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Report the raw host outcome.
    pub fn complete(self, outcome: LaunchOutcome) {
        let _ = self.sender.send(outcome);
    }
}
