use tokio::sync::broadcast;

use super::types::EngineEvent;

/// Publish-only broadcast of engine lifecycle events.
///
/// Subscribers come and go without affecting engine operation; dropping a
/// receiver simply stops delivery to it.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<EngineEvent>,
}

impl ProgressReporter {
    /// Create a new reporter with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing with zero subscribers is not an error; events are simply
    /// dropped.
    pub fn publish(&self, event: EngineEvent) {
        // send() errors only when there are no receivers, which is fine here
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(1000)
    }
}
