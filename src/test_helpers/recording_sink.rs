//! Notification sink that keeps every event for later assertions.

use crate::events::{DispatchEvent, NotificationSink};
use crate::models::OrderKey;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().clone()
    }

    /// Events whose [`DispatchEvent::name`] matches, e.g. `order.dispatched`
    pub fn count_named(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn events_for(&self, order_key: OrderKey) -> Vec<DispatchEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.order_key() == order_key)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, event: DispatchEvent) {
        self.events.lock().push(event);
    }
}
