//! # Dispatch Events
//!
//! Side-effect notifications emitted by the dispatch core. Sinks are
//! fire-and-forget: the core calls them and never looks at the outcome.

pub mod publisher;

use crate::models::{CourierRef, OrderKey};
use crate::state_machine::LifecycleStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use publisher::BroadcastNotificationSink;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Courier accepted the order
    Dispatched {
        order_key: OrderKey,
        external_id: String,
        courier_ref: CourierRef,
        occurred_at: DateTime<Utc>,
    },
    /// Courier rejected the order; needs an operator
    DispatchFailed {
        order_key: OrderKey,
        external_id: String,
        reason: String,
        retryable: bool,
        occurred_at: DateTime<Utc>,
    },
    /// Reconciliation corrected the local lifecycle status
    StatusChanged {
        order_key: OrderKey,
        external_id: String,
        from: LifecycleStatus,
        to: LifecycleStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dispatched { .. } => "order.dispatched",
            Self::DispatchFailed { .. } => "order.dispatch_failed",
            Self::StatusChanged { .. } => "order.status_changed",
        }
    }

    pub fn order_key(&self) -> OrderKey {
        match self {
            Self::Dispatched { order_key, .. }
            | Self::DispatchFailed { order_key, .. }
            | Self::StatusChanged { order_key, .. } => *order_key,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, event: DispatchEvent);
}

/// Writes every event to the log; the default sink
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, event: DispatchEvent) {
        match &event {
            DispatchEvent::DispatchFailed {
                order_key, reason, ..
            } => warn!(
                event = event.name(),
                order_key = %order_key,
                reason = %reason,
                "Dispatch failure notification"
            ),
            _ => info!(
                event = event.name(),
                order_key = %event.order_key(),
                "Dispatch notification"
            ),
        }
    }
}
