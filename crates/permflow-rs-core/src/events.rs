//! Event fan-out for coordinator observers.

use log::debug;
use permflow_rs_protocol::{EventMsg, EventSink};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Broadcast-backed event bus for coordinator events.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EventMsg>,
}

impl EventBus {
    /// Create a new event bus with the given channel buffer size.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        debug!("event bus initialized (buffer={})", buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventMsg> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`; lagged receivers yield an error item.
    pub fn stream(&self) -> BroadcastStream<EventMsg> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: EventMsg) {
        let _ = self.sender.send(event);
    }
}
