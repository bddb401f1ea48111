use super::{DispatchEvent, NotificationSink};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Fans dispatch events out to in-process subscribers (email, dashboards)
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    sender: broadcast::Sender<DispatchEvent>,
}

impl BroadcastNotificationSink {
    /// Create a new sink with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn notify(&self, event: DispatchEvent) {
        // No subscribers is fine; events are advisory
        let _ = self.sender.send(event);
    }
}
