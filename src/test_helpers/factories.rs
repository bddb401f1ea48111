//! Order builders for tests.

use crate::models::{CourierRef, Order, OrderKind};
use crate::state_machine::{DispatchState, LifecycleStatus};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_external_id(prefix: &str) -> String {
    format!("{prefix}-{}", SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

pub struct OrderFactory;

impl OrderFactory {
    /// Delivery order due `minutes` after `now`
    pub fn delivery_due_in(now: DateTime<Utc>, minutes: i64) -> Order {
        Order::new(next_external_id("dlv"), OrderKind::Delivery)
            .with_delivery_time(now + Duration::minutes(minutes))
    }

    pub fn delivery_without_time() -> Order {
        Order::new(next_external_id("dlv"), OrderKind::Delivery)
    }

    pub fn pickup() -> Order {
        Order::new(next_external_id("pck"), OrderKind::Pickup)
    }

    /// Delivery order accepted at `accepted_at`
    pub fn accepted_delivery(now: DateTime<Utc>, minutes: i64, accepted_at: DateTime<Utc>) -> Order {
        let mut order = Self::delivery_due_in(now, minutes);
        order.lifecycle_status = LifecycleStatus::Accepted;
        order.accepted_at = Some(accepted_at);
        order
    }

    /// Delivery order the courier already holds under `courier_id`
    pub fn dispatched(courier_id: &str, tracking_url: Option<&str>) -> Order {
        let mut order = Self::delivery_without_time();
        order.lifecycle_status = LifecycleStatus::Accepted;
        order.dispatch_state = DispatchState::Dispatched;
        order.courier_ref = Some(CourierRef::new(courier_id, tracking_url.map(str::to_string)));
        order
    }

    pub fn with_lifecycle(mut order: Order, status: LifecycleStatus) -> Order {
        order.lifecycle_status = status;
        order
    }
}
